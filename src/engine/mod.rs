//! The sequential, context-carrying extraction engine.
//!
//! Nothing in this module touches pdfium or the network; the model sits
//! behind the [`ExtractionClient`] trait.
//!
//! ## Data Flow
//!
//! ```text
//!             ┌────────────── per page n ───────────────┐
//! pages ──▶   context ──▶ client ──▶ confidence+summary ──▶ merge ──▶ state
//!             ▲                                                   │
//!             └──────── summaries, confidence, page n−1 ◀─────────┘
//! ```
//!
//! 1. [`context`]    — textual context for page n from earlier pages
//! 2. [`client`]     — the `(image, schema, context) → PageExtraction` contract
//! 3. [`confidence`] — append-only sender-confidence history
//! 4. [`summary`]    — compact per-page digests
//! 5. [`merge`]      — confidence-gated fold into the accumulated record
//! 6. [`sequential`] — the page loop tying it together

pub mod client;
pub mod confidence;
pub mod context;
pub mod merge;
pub mod sequential;
pub mod summary;

pub use client::{ExtractionClient, PageImage};
pub use confidence::{ConfidenceRecord, ConfidenceTracker};
pub use context::ContextAssembler;
pub use merge::{merge, MergePolicy, SenderDecision, SENDER_FIELDS};
pub use sequential::{ExtractionRun, PageFailure, RunState, SequentialExtractor};
pub use summary::{PageStatus, PageSummary, PageSummaryBuilder};
