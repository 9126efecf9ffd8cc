//! Per-page sender-confidence history.

use crate::record::PageExtraction;
use serde::{Deserialize, Serialize};

/// Reason recorded when the model gave a confidence without explaining it.
pub const UNSPECIFIED_REASON: &str = "not specified";

/// Sender confidence reported for one successfully extracted page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRecord {
    pub page: usize,
    pub confidence: f64,
    pub reason: String,
}

/// Append-only log of [`ConfidenceRecord`]s for one run.
///
/// Failed pages never reach the tracker, so `records().len()` equals the
/// number of successfully extracted pages.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceTracker {
    records: Vec<ConfidenceRecord>,
}

impl ConfidenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the page's confidence. Calling twice for a page appends twice.
    pub fn record(&mut self, page_result: &PageExtraction, page_num: usize) -> &ConfidenceRecord {
        let record = ConfidenceRecord {
            page: page_num,
            confidence: page_result.sender_confidence.unwrap_or(0.0),
            reason: page_result
                .sender_confidence_reason
                .clone()
                .unwrap_or_else(|| UNSPECIFIED_REASON.to_string()),
        };
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    /// Highest confidence so far; the earliest page wins ties.
    pub fn best(&self) -> Option<&ConfidenceRecord> {
        self.records.iter().fold(None, |best, r| match best {
            Some(b) if b.confidence >= r.confidence => Some(b),
            _ => Some(r),
        })
    }

    /// The last `n` records (fewer if the history is shorter), oldest first.
    pub fn recent(&self, n: usize) -> &[ConfidenceRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    pub fn records(&self) -> &[ConfidenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<ConfidenceRecord> {
        self.records
    }
}
