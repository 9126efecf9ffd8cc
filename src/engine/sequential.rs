//! The page loop: context → client → confidence + summary → merge, strictly
//! in page order.
//!
//! ```text
//! Idle ─▶ ProcessingPage(1) ─┬─▶ PageSucceeded(1) ─┬─▶ ProcessingPage(2) ─▶ …
//!                            └─▶ PageFailed(1) ────┘                        └─▶ Done
//! ```
//!
//! A page failure never aborts the run. The failed page leaves the state,
//! the confidence history and the "previous page" context untouched; it only
//! adds an error summary and an entry to [`ExtractionRun::failures`].

use crate::engine::client::{ExtractionClient, PageImage};
use crate::engine::confidence::{ConfidenceRecord, ConfidenceTracker};
use crate::engine::context::ContextAssembler;
use crate::engine::merge::{self, MergePolicy};
use crate::engine::summary::{PageSummary, PageSummaryBuilder, DEFAULT_ITEM_CAP};
use crate::error::ExtractionFailure;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::record::{AccumulatedState, PageExtraction};
use crate::schema::FieldSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the extractor is in the page loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ProcessingPage(usize),
    PageSucceeded(usize),
    PageFailed(usize),
    Done,
}

impl RunState {
    fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle, ProcessingPage(1)) | (Idle, Done) => true,
            (ProcessingPage(n), PageSucceeded(m)) | (ProcessingPage(n), PageFailed(m)) => n == m,
            // Cancellation abandons the in-flight page.
            (ProcessingPage(_), Done) => true,
            (PageSucceeded(n), ProcessingPage(m)) | (PageFailed(n), ProcessingPage(m)) => m == n + 1,
            (PageSucceeded(_), Done) | (PageFailed(_), Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::ProcessingPage(n) => write!(f, "processing page {n}"),
            RunState::PageSucceeded(n) => write!(f, "page {n} succeeded"),
            RunState::PageFailed(n) => write!(f, "page {n} failed"),
            RunState::Done => f.write_str("done"),
        }
    }
}

/// A page that produced no usable extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFailure {
    /// 1-based position in the run.
    pub page: usize,
    /// 1-based page number in the source PDF.
    pub pdf_page: usize,
    pub error: ExtractionFailure,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct ExtractionRun {
    /// Normalised merged record.
    pub state: AccumulatedState,
    /// One summary per attempted page, in page order.
    pub summaries: Vec<PageSummary>,
    /// Sender confidence of every merged page, in page order.
    pub confidence: ConfidenceTracker,
    pub failures: Vec<PageFailure>,
    pub total_pages: usize,
    /// Pages whose client call finished (successfully or not).
    pub attempted_pages: usize,
    pub merged_pages: usize,
    /// True when the run stopped early on a cancel request.
    pub cancelled: bool,
}

impl ExtractionRun {
    /// Highest-confidence page record; the earliest page wins ties.
    pub fn best_confidence(&self) -> Option<&ConfidenceRecord> {
        self.confidence.best()
    }
}

/// Drives one document through the extraction client page by page.
///
/// # Example
/// ```rust,ignore
/// let extractor = SequentialExtractor::new(client, schema)
///     .with_page_timeout(Duration::from_secs(60));
/// let run = extractor.run(&pages).await;
/// println!("{}", serde_json::to_string_pretty(&run.state)?);
/// ```
pub struct SequentialExtractor {
    client: Arc<dyn ExtractionClient>,
    schema: FieldSchema,
    policy: MergePolicy,
    assembler: ContextAssembler,
    summary_item_cap: usize,
    page_timeout: Option<Duration>,
    progress: ProgressCallback,
}

impl fmt::Debug for SequentialExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialExtractor")
            .field("client", &"<dyn ExtractionClient>")
            .field("fields", &self.schema.len())
            .field("policy", &self.policy)
            .field("assembler", &self.assembler)
            .field("summary_item_cap", &self.summary_item_cap)
            .field("page_timeout", &self.page_timeout)
            .finish()
    }
}

impl SequentialExtractor {
    pub fn new(client: Arc<dyn ExtractionClient>, schema: FieldSchema) -> Self {
        Self {
            client,
            schema,
            policy: MergePolicy::default(),
            assembler: ContextAssembler::default(),
            summary_item_cap: DEFAULT_ITEM_CAP,
            page_timeout: None,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_summary_item_cap(mut self, cap: usize) -> Self {
        self.summary_item_cap = cap;
        self
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = Some(timeout);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Process every page in order and return the merged record.
    pub async fn run(&self, pages: &[PageImage]) -> ExtractionRun {
        self.run_with_cancel(pages, &CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), stopping early once `cancel` fires.
    ///
    /// The in-flight client call is dropped, its page is neither merged nor
    /// summarised, and the returned state reflects the last completed page.
    pub async fn run_with_cancel(
        &self,
        pages: &[PageImage],
        cancel: &CancellationToken,
    ) -> ExtractionRun {
        let total_pages = pages.len();
        let mut phase = RunState::Idle;
        let mut state = AccumulatedState::new();
        let mut tracker = ConfidenceTracker::new();
        let mut summaries = PageSummaryBuilder::new(self.summary_item_cap);
        let mut previous_page: Option<PageExtraction> = None;
        let mut failures = Vec::new();
        let mut attempted_pages = 0;
        let mut merged_pages = 0;
        let mut cancelled = false;

        info!(
            "Sequential extraction: {} pages, {} schema fields",
            total_pages,
            self.schema.len()
        );
        self.progress.on_extraction_start(total_pages);

        for (idx, page) in pages.iter().enumerate() {
            let page_num = idx + 1;
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            advance(&mut phase, RunState::ProcessingPage(page_num));
            self.progress.on_page_start(page_num, total_pages);

            let context = self.assembler.assemble(
                page_num,
                total_pages,
                previous_page.as_ref(),
                summaries.history(),
                &tracker,
            );
            debug!("Page {}: context is {} chars", page_num, context.len());

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.extract_page(page_num, page, &context) => Some(r),
            };
            let Some(result) = outcome else {
                warn!("Page {}: cancelled while waiting for the model", page_num);
                cancelled = true;
                break;
            };
            attempted_pages += 1;

            match result {
                Ok(extraction) => {
                    advance(&mut phase, RunState::PageSucceeded(page_num));
                    let record = tracker.record(&extraction, page_num);
                    debug!(
                        "Page {}: sender confidence {:.2} ({})",
                        page_num, record.confidence, record.reason
                    );
                    summaries.push_success(&extraction, page_num);

                    let (next, decision) =
                        merge::merge(&state, &extraction, &self.schema, &self.policy);
                    info!("Page {}/{} merged (sender rule: {:?})", page_num, total_pages, decision);
                    state = next;
                    merged_pages += 1;

                    self.progress
                        .on_page_merged(page_num, total_pages, extraction.sender_confidence);
                    previous_page = Some(extraction);
                }
                Err(err) => {
                    advance(&mut phase, RunState::PageFailed(page_num));
                    warn!("Page {}/{} failed: {}", page_num, total_pages, err);
                    summaries.push_failure(page_num, &err.detail());
                    self.progress
                        .on_page_error(page_num, total_pages, &err.to_string());
                    failures.push(PageFailure {
                        page: page_num,
                        pdf_page: page.pdf_page,
                        error: err,
                    });
                }
            }
        }

        advance(&mut phase, RunState::Done);
        let state = merge::finalize(&state);

        info!(
            "Sequential extraction {}: {}/{} pages merged, {} failed",
            if cancelled { "cancelled" } else { "complete" },
            merged_pages,
            total_pages,
            failures.len()
        );
        self.progress.on_extraction_complete(total_pages, merged_pages);

        ExtractionRun {
            state,
            summaries: summaries.into_history(),
            confidence: tracker,
            failures,
            total_pages,
            attempted_pages,
            merged_pages,
            cancelled,
        }
    }

    async fn extract_page(
        &self,
        page_num: usize,
        page: &PageImage,
        context: &str,
    ) -> Result<PageExtraction, ExtractionFailure> {
        let call = self.client.extract(page, &self.schema, context);
        match self.page_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| {
                    Err(ExtractionFailure::Timeout {
                        page: page_num,
                        secs: limit.as_secs(),
                    })
                }),
            None => call.await,
        }
    }
}

fn advance(phase: &mut RunState, next: RunState) {
    debug_assert!(
        phase.can_advance_to(next),
        "illegal transition {phase} → {next}"
    );
    debug!("Extractor: {} → {}", phase, next);
    *phase = next;
}
