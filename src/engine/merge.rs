//! Folding one page's extraction into the accumulated document state.
//!
//! ## Two tiers
//!
//! **Sender tier** ([`SENDER_FIELDS`] plus the confidence meta values) is
//! gated on the model's self-reported sender confidence. A late page with a
//! weaker signal (a CC line, a quoted earlier letter, a footer) must not
//! erase a strong signature-block match from an earlier page:
//!
//! | condition                                         | outcome                         |
//! |---------------------------------------------------|---------------------------------|
//! | `old − new ≥ retain_gap` and `old ≥ retain_floor` | keep every old sender field     |
//! | `new > old + adopt_margin`                        | take every new sender field     |
//! | otherwise                                         | per-field gap-fill, max(conf)   |
//!
//! **Content tier** (every other schema field) is recency-wins: a non-null
//! value on the new page overwrites, a null keeps what was known.
//!
//! [`merge`] is pure. Given the same state and page it always returns the
//! same new state, which makes runs replayable page by page.

use crate::engine::confidence::UNSPECIFIED_REASON;
use crate::record::{AccumulatedState, PageExtraction};
use crate::schema::FieldSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fields describing the letter's author and their contact details.
pub const SENDER_FIELDS: &[&str] = &[
    "name",
    "designation",
    "organisation",
    "mobile",
    "email",
    "address",
    "country",
    "state",
    "cityName",
    "pincode",
    "phone",
    "fax",
];

/// Reason attached when sender fields exist without any confidence.
pub const UNSPECIFIED_CONFIDENCE_REASON: &str = "confidence not specified";

const MERGED_REASON_SUFFIX: &str = "; merged with page data";

// Thresholds are written as decimals; 1.0 - 0.8 must count as a 0.2 gap.
const EPSILON: f64 = 1e-9;

pub fn is_sender_field(name: &str) -> bool {
    SENDER_FIELDS.contains(&name)
}

/// Tunable thresholds of the sender-tier policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergePolicy {
    /// Minimum drop in confidence treated as noise when the old value is strong. Default: 0.2.
    pub retain_gap: f64,
    /// Old confidence at or above which a weaker page cannot touch sender fields. Default: 0.8.
    pub retain_floor: f64,
    /// Improvement above which the new page's sender block replaces the old one. Default: 0.3.
    pub adopt_margin: f64,
    /// Confidence assigned when sender fields are present but unscored. Default: 0.5.
    pub default_confidence: f64,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            retain_gap: 0.2,
            retain_floor: 0.8,
            adopt_margin: 0.3,
            default_confidence: 0.5,
        }
    }
}

/// Which sender-tier rule a merge applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderDecision {
    /// Existing block kept; the new page was weaker than a strong prior.
    Retained,
    /// New block adopted wholesale.
    Adopted,
    /// Field-by-field gap-fill.
    GapFilled,
}

impl MergePolicy {
    /// Pick the sender-tier rule for the two confidences (absent = 0.0).
    pub fn decide(&self, old_conf: f64, new_conf: f64) -> SenderDecision {
        if old_conf - new_conf + EPSILON >= self.retain_gap && old_conf + EPSILON >= self.retain_floor {
            SenderDecision::Retained
        } else if new_conf - old_conf > self.adopt_margin + EPSILON {
            SenderDecision::Adopted
        } else {
            SenderDecision::GapFilled
        }
    }
}

/// Merge `page` into `state`, returning the new state and the sender rule used.
///
/// Only schema data fields are carried; the result holds exactly one value
/// per field (null when no page has produced one yet).
pub fn merge(
    state: &AccumulatedState,
    page: &PageExtraction,
    schema: &FieldSchema,
    policy: &MergePolicy,
) -> (AccumulatedState, SenderDecision) {
    let old_conf = state.sender_confidence.unwrap_or(0.0);
    let new_conf = page.sender_confidence.unwrap_or(0.0);
    let decision = policy.decide(old_conf, new_conf);

    let mut next = AccumulatedState::new();

    // ── Sender tier ──────────────────────────────────────────────────────
    for (name, _) in schema.data_fields().filter(|(k, _)| is_sender_field(k)) {
        let old = state.get(name).cloned().unwrap_or_default();
        let new = page.get(name).cloned().unwrap_or_default();
        let value = match decision {
            SenderDecision::Retained => old,
            SenderDecision::Adopted => new,
            SenderDecision::GapFilled => {
                if new.is_present() {
                    new
                } else {
                    old
                }
            }
        };
        next.fields.insert(name.to_string(), value);
    }

    match decision {
        SenderDecision::Retained => {
            next.sender_confidence = state.sender_confidence;
            next.sender_confidence_reason = state.sender_confidence_reason.clone();
        }
        SenderDecision::Adopted => {
            next.sender_confidence = page.sender_confidence;
            next.sender_confidence_reason = page.sender_confidence_reason.clone();
        }
        SenderDecision::GapFilled => {
            next.sender_confidence = match (state.sender_confidence, page.sender_confidence) {
                (None, None) => None,
                _ => Some(old_conf.max(new_conf)),
            };
            next.sender_confidence_reason = if old_conf > new_conf {
                let old_reason = state
                    .sender_confidence_reason
                    .as_deref()
                    .unwrap_or(UNSPECIFIED_REASON);
                Some(format!("{old_reason}{MERGED_REASON_SUFFIX}"))
            } else {
                page.sender_confidence_reason
                    .clone()
                    .or_else(|| state.sender_confidence_reason.clone())
            };
        }
    }

    // ── Content tier ─────────────────────────────────────────────────────
    for (name, _) in schema.data_fields().filter(|(k, _)| !is_sender_field(k)) {
        let value = match page.get(name) {
            Some(v) if v.is_present() => v.clone(),
            _ => state.get(name).cloned().unwrap_or_default(),
        };
        next.fields.insert(name.to_string(), value);
    }

    apply_confidence_default(&mut next, policy);

    debug!(
        "Merge: sender rule {:?} (old conf {:.2}, new conf {:.2}) → conf {:?}",
        decision, old_conf, new_conf, next.sender_confidence
    );

    (next, decision)
}

/// Give an unscored sender block the policy's default confidence.
fn apply_confidence_default(state: &mut AccumulatedState, policy: &MergePolicy) {
    let has_sender = state
        .fields
        .iter()
        .any(|(k, v)| is_sender_field(k) && v.is_present());
    if has_sender && state.sender_confidence.is_none() {
        state.sender_confidence = Some(policy.default_confidence);
        state.sender_confidence_reason = Some(UNSPECIFIED_CONFIDENCE_REASON.to_string());
    }
}

/// End-of-run cleanup: blank and textual-null values become explicit nulls.
///
/// Idempotent.
pub fn finalize(state: &AccumulatedState) -> AccumulatedState {
    state.normalized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use crate::schema::{FieldDescriptor, FieldType};

    fn schema() -> FieldSchema {
        ["name", "designation", "organisation", "email", "subject", "letterDate", "letterRefNo"]
            .into_iter()
            .fold(FieldSchema::new(), |s, f| {
                s.with_field(f, FieldDescriptor::new(FieldType::Text))
            })
    }

    fn state_from(page: &PageExtraction) -> AccumulatedState {
        merge(&AccumulatedState::new(), page, &schema(), &MergePolicy::default()).0
    }

    #[test]
    fn decide_thresholds() {
        let p = MergePolicy::default();
        assert_eq!(p.decide(0.9, 0.5), SenderDecision::Retained);
        assert_eq!(p.decide(1.0, 0.8), SenderDecision::Retained);
        assert_eq!(p.decide(0.7, 0.3), SenderDecision::GapFilled);
        assert_eq!(p.decide(0.2, 0.6), SenderDecision::Adopted);
        assert_eq!(p.decide(0.3, 0.6), SenderDecision::GapFilled);
        assert_eq!(p.decide(0.6, 0.65), SenderDecision::GapFilled);
        assert_eq!(p.decide(0.0, 0.0), SenderDecision::GapFilled);
    }

    #[test]
    fn strong_prior_retains_sender_block() {
        let prior = state_from(
            &PageExtraction::new()
                .with_field("name", "A. Kumar")
                .with_null("email")
                .with_field("designation", "Joint Secretary")
                .with_confidence(0.9, "signature block"),
        );
        let page = PageExtraction::new()
            .with_field("name", "B. Singh")
            .with_field("email", "b@example.org")
            .with_null("designation")
            .with_confidence(0.5, "cc line");

        let (next, decision) = merge(&prior, &page, &schema(), &MergePolicy::default());

        assert_eq!(decision, SenderDecision::Retained);
        for f in ["name", "designation", "organisation", "email"] {
            assert_eq!(next.get(f), prior.get(f), "field {f}");
        }
        assert_eq!(next.sender_confidence, Some(0.9));
        assert_eq!(next.sender_confidence_reason.as_deref(), Some("signature block"));
    }

    #[test]
    fn decisive_improvement_adopts_nulls_too() {
        let prior = state_from(
            &PageExtraction::new()
                .with_field("name", "Desk Officer")
                .with_field("organisation", "Ministry of XYZ")
                .with_confidence(0.2, "header only"),
        );
        let page = PageExtraction::new()
            .with_field("name", "A. Kumar")
            .with_null("organisation")
            .with_confidence(0.6, "typed name under Sd/-");

        let (next, decision) = merge(&prior, &page, &schema(), &MergePolicy::default());

        assert_eq!(decision, SenderDecision::Adopted);
        assert_eq!(next.get("name"), Some(&FieldValue::text("A. Kumar")));
        assert_eq!(next.get("organisation"), Some(&FieldValue::Null));
        assert_eq!(next.sender_confidence, Some(0.6));
    }

    #[test]
    fn close_confidence_gap_fills() {
        let prior = state_from(
            &PageExtraction::new()
                .with_field("name", "A. Kumar")
                .with_field("designation", "Director")
                .with_confidence(0.6, "first"),
        );
        let page = PageExtraction::new()
            .with_null("name")
            .with_field("designation", "Deputy Director")
            .with_confidence(0.65, "second");

        let (next, decision) = merge(&prior, &page, &schema(), &MergePolicy::default());

        assert_eq!(decision, SenderDecision::GapFilled);
        assert_eq!(next.get("name"), Some(&FieldValue::text("A. Kumar")));
        assert_eq!(next.get("designation"), Some(&FieldValue::text("Deputy Director")));
        assert_eq!(next.sender_confidence, Some(0.65));
        assert_eq!(next.sender_confidence_reason.as_deref(), Some("second"));
    }

    #[test]
    fn gap_fill_keeps_higher_old_confidence_with_merged_reason() {
        let prior = state_from(
            &PageExtraction::new()
                .with_field("name", "A. Kumar")
                .with_confidence(0.7, "signature"),
        );
        let page = PageExtraction::new()
            .with_field("email", "a@example.org")
            .with_confidence(0.6, "letterhead");

        let (next, _) = merge(&prior, &page, &schema(), &MergePolicy::default());

        assert_eq!(next.sender_confidence, Some(0.7));
        assert_eq!(
            next.sender_confidence_reason.as_deref(),
            Some("signature; merged with page data")
        );
        assert_eq!(next.get("email"), Some(&FieldValue::text("a@example.org")));
    }

    #[test]
    fn content_tier_recency_wins_and_never_regresses() {
        let prior = state_from(
            &PageExtraction::new()
                .with_field("subject", "Old subject")
                .with_field("letterDate", "15 July 2024"),
        );
        let page = PageExtraction::new()
            .with_field("subject", "New subject")
            .with_null("letterDate")
            .with_field("letterRefNo", "  ");

        let (next, _) = merge(&prior, &page, &schema(), &MergePolicy::default());

        assert_eq!(next.get("subject"), Some(&FieldValue::text("New subject")));
        assert_eq!(next.get("letterDate"), Some(&FieldValue::text("15 July 2024")));
        assert_eq!(next.get("letterRefNo"), Some(&FieldValue::Null));
    }

    #[test]
    fn result_covers_every_schema_field() {
        let (next, _) = merge(
            &AccumulatedState::new(),
            &PageExtraction::new(),
            &schema(),
            &MergePolicy::default(),
        );
        assert_eq!(next.fields.len(), schema().len());
        assert!(next.fields.values().all(|v| *v == FieldValue::Null));
        assert_eq!(next.sender_confidence, None);
    }

    #[test]
    fn unscored_sender_gets_default_confidence() {
        let next = state_from(&PageExtraction::new().with_field("name", "A. Kumar"));
        assert_eq!(next.sender_confidence, Some(0.5));
        assert_eq!(
            next.sender_confidence_reason.as_deref(),
            Some(UNSPECIFIED_CONFIDENCE_REASON)
        );
    }

    #[test]
    fn merge_does_not_mutate_inputs() {
        let prior = state_from(&PageExtraction::new().with_field("subject", "S"));
        let page = PageExtraction::new().with_field("subject", "T");
        let (prior_copy, page_copy) = (prior.clone(), page.clone());
        let _ = merge(&prior, &page, &schema(), &MergePolicy::default());
        assert_eq!(prior, prior_copy);
        assert_eq!(page, page_copy);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut state = state_from(
            &PageExtraction::new()
                .with_field("name", "A. Kumar")
                .with_field("subject", "null"),
        );
        state.fields.insert("letterRefNo".into(), FieldValue::text("   "));
        let once = finalize(&state);
        let twice = finalize(&once);
        assert_eq!(once, twice);
        assert_eq!(once.get("subject"), Some(&FieldValue::Null));
        assert_eq!(once.get("letterRefNo"), Some(&FieldValue::Null));
    }

    #[test]
    fn end_to_end_signature_then_cc() {
        let s = schema();
        let p = MergePolicy::default();
        let page1 = PageExtraction::new()
            .with_field("name", "A. Kumar")
            .with_null("subject")
            .with_confidence(1.0, "signed");
        let page2 = PageExtraction::new()
            .with_field("name", "B. Singh")
            .with_field("subject", "Infrastructure request")
            .with_confidence(0.4, "mentioned in body");

        let (after1, _) = merge(&AccumulatedState::new(), &page1, &s, &p);
        let (after2, decision) = merge(&after1, &page2, &s, &p);

        assert_eq!(decision, SenderDecision::Retained);
        assert_eq!(after2.get("name"), Some(&FieldValue::text("A. Kumar")));
        assert_eq!(after2.sender_confidence, Some(1.0));
        assert_eq!(
            after2.get("subject"),
            Some(&FieldValue::text("Infrastructure request"))
        );
    }
}
