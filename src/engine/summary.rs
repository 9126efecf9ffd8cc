//! Compact per-page digests carried forward as prompt context.
//!
//! A summary lists the page's most important non-null fields first (sender
//! identity, dates, reference number, subject) and then fills up to a fixed
//! item cap with the remaining non-null fields in sorted key order, whatever
//! order the model emitted them in.

use crate::record::PageExtraction;
use serde::{Deserialize, Serialize};

/// Fields listed first in every summary, in this order.
pub const PRIORITY_FIELDS: &[&str] = &[
    "name",
    "designation",
    "organisation",
    "letterDate",
    "diaryDate",
    "receivedDate",
    "letterRefNo",
    "subject",
];

/// Default maximum number of `field: value` items per summary.
pub const DEFAULT_ITEM_CAP: usize = 15;

/// Summary text for a page that produced no non-null field.
pub const NO_DATA_SENTINEL: &str = "no meaningful data extracted";

const ERROR_DETAIL_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Success,
    Error,
}

/// Digest of one page, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub page: usize,
    pub status: PageStatus,
    pub text: String,
}

/// Builds summaries and keeps the append-only summary history of a run.
#[derive(Debug, Clone)]
pub struct PageSummaryBuilder {
    item_cap: usize,
    history: Vec<PageSummary>,
}

impl Default for PageSummaryBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_ITEM_CAP)
    }
}

impl PageSummaryBuilder {
    pub fn new(item_cap: usize) -> Self {
        Self {
            item_cap: item_cap.max(1),
            history: Vec::new(),
        }
    }

    /// Render the digest text for a page. Deterministic; does not touch
    /// the history.
    pub fn summarize(&self, page_result: &PageExtraction) -> String {
        let mut items: Vec<String> = Vec::new();

        for &field in PRIORITY_FIELDS {
            if items.len() == self.item_cap {
                break;
            }
            if let Some(v) = page_result.get(field).filter(|v| v.is_present()) {
                items.push(format!("{field}: {v}"));
            }
        }

        let rest = page_result
            .fields
            .iter()
            .filter(|(k, v)| !PRIORITY_FIELDS.contains(&k.as_str()) && v.is_present());
        for (k, v) in rest {
            if items.len() == self.item_cap {
                break;
            }
            items.push(format!("{k}: {v}"));
        }

        if items.is_empty() {
            NO_DATA_SENTINEL.to_string()
        } else {
            items.join("; ")
        }
    }

    /// Append the success summary for `page_num`.
    pub fn push_success(&mut self, page_result: &PageExtraction, page_num: usize) -> &PageSummary {
        let text = self.summarize(page_result);
        self.push(PageSummary {
            page: page_num,
            status: PageStatus::Success,
            text,
        })
    }

    /// Append an error summary for `page_num`; `detail` is truncated.
    pub fn push_failure(&mut self, page_num: usize, detail: &str) -> &PageSummary {
        let truncated: String = detail.chars().take(ERROR_DETAIL_MAX_CHARS).collect();
        let text = if truncated.len() < detail.len() {
            format!("processing failed: {truncated}…")
        } else {
            format!("processing failed: {truncated}")
        };
        self.push(PageSummary {
            page: page_num,
            status: PageStatus::Error,
            text,
        })
    }

    pub fn history(&self) -> &[PageSummary] {
        &self.history
    }

    pub fn into_history(self) -> Vec<PageSummary> {
        self.history
    }

    fn push(&mut self, summary: PageSummary) -> &PageSummary {
        self.history.push(summary);
        &self.history[self.history.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;

    #[test]
    fn priority_fields_come_first() {
        let page = PageExtraction::new()
            .with_field("category", "Infrastructure")
            .with_field("subject", "Road repair")
            .with_field("name", "A. Kumar")
            .with_null("designation")
            .with_field("letterRefNo", "D.O. 12/2024");
        let text = PageSummaryBuilder::default().summarize(&page);
        assert_eq!(
            text,
            "name: A. Kumar; letterRefNo: D.O. 12/2024; subject: Road repair; category: Infrastructure"
        );
    }

    #[test]
    fn item_cap_bounds_the_digest() {
        let mut page = PageExtraction::new();
        for i in 0..30 {
            page = page.with_field(format!("field{i:02}"), FieldValue::from(i as i64));
        }
        let text = PageSummaryBuilder::new(5).summarize(&page);
        assert_eq!(text.split("; ").count(), 5);
        assert!(text.starts_with("field00: 0"));
    }

    #[test]
    fn remaining_fields_fill_in_sorted_key_order() {
        let page = PageExtraction::new()
            .with_field("zone", "North")
            .with_field("category", "Roads")
            .with_field("name", "B. Singh")
            .with_field("amount", 1200i64);
        let text = PageSummaryBuilder::default().summarize(&page);
        assert_eq!(text, "name: B. Singh; amount: 1200; category: Roads; zone: North");
    }

    #[test]
    fn blank_page_uses_sentinel() {
        let page = PageExtraction::new().with_null("name").with_field("subject", "  ");
        assert_eq!(PageSummaryBuilder::default().summarize(&page), NO_DATA_SENTINEL);
    }

    #[test]
    fn history_is_append_only_and_ordered() {
        let mut b = PageSummaryBuilder::default();
        b.push_success(&PageExtraction::new().with_field("name", "X"), 1);
        b.push_failure(2, "timeout");
        b.push_success(&PageExtraction::new(), 3);

        let h = b.history();
        assert_eq!(h.len(), 3);
        assert_eq!(h.iter().map(|s| s.page).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(h[1].status, PageStatus::Error);
        assert_eq!(h[1].text, "processing failed: timeout");
        assert_eq!(h[2].text, NO_DATA_SENTINEL);
    }

    #[test]
    fn long_failure_detail_is_truncated() {
        let mut b = PageSummaryBuilder::default();
        let detail = "x".repeat(300);
        let s = b.push_failure(1, &detail);
        assert!(s.text.ends_with('…'));
        assert!(s.text.chars().count() < 130);
    }
}
