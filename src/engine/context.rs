//! Per-page prompt context assembled from run history.
//!
//! Page 1 gets a one-line instruction. Every later page gets up to three
//! named sections:
//!
//! ~~~text
//! Page 3 of 5.
//!
//! === SUMMARY OF ALL PREVIOUS PAGES ===
//! Page 1: name: A. Kumar; subject: Road repair
//! Page 2 [error]: processing failed: timeout
//!
//! === SENDER CONFIDENCE HISTORY ===
//! Page 1: 0.90 (name in signature block)
//!
//! === PREVIOUS PAGE STRUCTURED DATA ===
//! ```json
//! { ... key-sorted JSON of the last successful page ... }
//! ```
//! ~~~
//!
//! Images of earlier pages are never included; only their textual traces.

use crate::engine::confidence::ConfidenceTracker;
use crate::engine::summary::{PageStatus, PageSummary};
use crate::record::PageExtraction;
use std::fmt::Write as _;

/// Default number of trailing confidence records shown to the model.
pub const DEFAULT_CONFIDENCE_WINDOW: usize = 3;

/// Builds the context string for page `n`. Reads its inputs, never mutates them.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    confidence_window: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_WINDOW)
    }
}

impl ContextAssembler {
    pub fn new(confidence_window: usize) -> Self {
        Self { confidence_window }
    }

    /// Assemble the context for `page_num` (1-based) of `total_pages`.
    ///
    /// `previous_page` is the raw extraction of the most recent page that
    /// succeeded, if any.
    pub fn assemble(
        &self,
        page_num: usize,
        total_pages: usize,
        previous_page: Option<&PageExtraction>,
        summaries: &[PageSummary],
        confidence: &ConfidenceTracker,
    ) -> String {
        if page_num <= 1 {
            return format!(
                "Page 1 of {total_pages}. Extract information for the form schema."
            );
        }

        let mut out = format!("Page {page_num} of {total_pages}.");

        if !summaries.is_empty() {
            out.push_str("\n\n=== SUMMARY OF ALL PREVIOUS PAGES ===");
            for s in summaries {
                match s.status {
                    PageStatus::Success => {
                        let _ = write!(out, "\nPage {}: {}", s.page, s.text);
                    }
                    PageStatus::Error => {
                        let _ = write!(out, "\nPage {} [error]: {}", s.page, s.text);
                    }
                }
            }
        }

        let recent = confidence.recent(self.confidence_window);
        if !recent.is_empty() {
            out.push_str("\n\n=== SENDER CONFIDENCE HISTORY ===");
            for r in recent {
                let _ = write!(out, "\nPage {}: {:.2} ({})", r.page, r.confidence, r.reason);
            }
        }

        if let Some(prev) = previous_page {
            let json = serde_json::to_string_pretty(&prev.to_canonical_json())
                .unwrap_or_else(|_| "{}".to_string());
            out.push_str("\n\n=== PREVIOUS PAGE STRUCTURED DATA ===\n```json\n");
            out.push_str(&json);
            out.push_str("\n```");
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(pages: impl IntoIterator<Item = (usize, f64)>) -> ConfidenceTracker {
        let mut t = ConfidenceTracker::new();
        for (page, confidence) in pages {
            t.record(
                &PageExtraction::new().with_confidence(confidence, format!("reason {page}")),
                page,
            );
        }
        t
    }

    #[test]
    fn first_page_is_minimal() {
        let ctx = ContextAssembler::default().assemble(1, 4, None, &[], &ConfidenceTracker::new());
        assert_eq!(ctx, "Page 1 of 4. Extract information for the form schema.");
    }

    #[test]
    fn later_pages_have_all_sections() {
        let summaries = vec![
            PageSummary {
                page: 1,
                status: PageStatus::Success,
                text: "name: A. Kumar".into(),
            },
            PageSummary {
                page: 2,
                status: PageStatus::Error,
                text: "processing failed: timeout".into(),
            },
        ];
        let history = tracker([(1, 0.9)]);
        let prev = PageExtraction::new()
            .with_field("subject", "Roads")
            .with_field("name", "A. Kumar")
            .with_confidence(0.9, "signature");

        let ctx = ContextAssembler::default().assemble(3, 3, Some(&prev), &summaries, &history);

        assert!(ctx.starts_with("Page 3 of 3."));
        assert!(ctx.contains("=== SUMMARY OF ALL PREVIOUS PAGES ===\nPage 1: name: A. Kumar\nPage 2 [error]: processing failed: timeout"));
        assert!(ctx.contains("=== SENDER CONFIDENCE HISTORY ===\nPage 1: 0.90 (reason 1)"));
        assert!(ctx.contains("=== PREVIOUS PAGE STRUCTURED DATA ==="));
        // Key-sorted: "name" precedes "subject".
        let name_at = ctx.find("\"name\"").unwrap();
        let subject_at = ctx.find("\"subject\"").unwrap();
        assert!(name_at < subject_at);
    }

    #[test]
    fn confidence_window_keeps_last_three() {
        let history = tracker((1..=5).map(|p| (p, 0.5)));
        let ctx = ContextAssembler::default().assemble(6, 6, None, &[], &history);
        assert!(!ctx.contains("Page 2: 0.50"));
        assert!(ctx.contains("Page 3: 0.50"));
        assert!(ctx.contains("Page 5: 0.50"));
        assert!(!ctx.contains("PREVIOUS PAGE STRUCTURED DATA"));
    }

    #[test]
    fn assembling_does_not_mutate_inputs() {
        let summaries = vec![PageSummary {
            page: 1,
            status: PageStatus::Success,
            text: "x".into(),
        }];
        let history = tracker([(1, 0.2)]);
        let before = (summaries.clone(), history.records().to_vec());
        let assembler = ContextAssembler::default();
        let a = assembler.assemble(2, 2, None, &summaries, &history);
        let b = assembler.assemble(2, 2, None, &summaries, &history);
        assert_eq!(a, b);
        assert_eq!((summaries, history.records().to_vec()), before);
    }
}
