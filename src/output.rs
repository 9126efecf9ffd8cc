//! Result types returned by the `extract*` entry points.

use crate::engine::confidence::ConfidenceRecord;
use crate::engine::sequential::{ExtractionRun, PageFailure};
use crate::engine::summary::PageSummary;
use crate::record::AccumulatedState;
use serde::Serialize;

/// Everything one extraction produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutput {
    /// The merged record: one value per schema field plus the final
    /// `senderConfidence` / `senderConfidenceReason`.
    pub fields: AccumulatedState,
    /// Per-page summaries, successes and failures, in page order.
    pub pages: Vec<PageSummary>,
    /// Sender confidence of every merged page, in page order.
    pub confidence_history: Vec<ConfidenceRecord>,
    /// The single most confident page, if any page merged.
    pub best_page_confidence: Option<ConfidenceRecord>,
    pub failures: Vec<PageFailure>,
    pub stats: ExtractionStats,
}

/// Counters and timings for one extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionStats {
    /// Pages handed to the extractor (after page selection).
    pub total_pages: usize,
    pub attempted_pages: usize,
    pub merged_pages: usize,
    pub failed_pages: usize,
    pub cancelled: bool,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub render_duration_ms: u64,
    pub extraction_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl ExtractionOutput {
    /// Assemble the output from a finished run; timings and token counts are
    /// filled in by the caller.
    pub fn from_run(run: ExtractionRun) -> Self {
        let best_page_confidence = run.best_confidence().cloned();
        let stats = ExtractionStats {
            total_pages: run.total_pages,
            attempted_pages: run.attempted_pages,
            merged_pages: run.merged_pages,
            failed_pages: run.failures.len(),
            cancelled: run.cancelled,
            ..Default::default()
        };
        Self {
            fields: run.state,
            pages: run.summaries,
            confidence_history: run.confidence.into_records(),
            best_page_confidence,
            failures: run.failures,
            stats,
        }
    }

    /// The merged record as a key-sorted JSON object, the shape a form
    /// front-end consumes.
    pub fn record_json(&self) -> serde_json::Value {
        self.fields.to_canonical_json()
    }
}
