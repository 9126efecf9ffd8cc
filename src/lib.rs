//! # edgequake-letter2json
//!
//! Extract structured form fields from scanned multi-page official letters
//! using Vision Language Models (VLMs).
//!
//! Each page is rasterised and read by a VLM against a caller-supplied field
//! schema. Pages are processed strictly in order: every page sees a summary
//! of the earlier pages, the recent sender-confidence history and the
//! previous page's structured result, and its answer is folded into one
//! document-level record by a confidence-gated merge. A strong signature
//! block on page 2 is not overwritten by a CC line on page 4.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    validate path and %PDF magic
//!  ├─ 2. Render   rasterise every selected page via pdfium (spawn_blocking)
//!  ├─ 3. Encode   PNG → base64 ImageData
//!  ├─ 4. Extract  per page, in order: context → VLM → parse
//!  ├─ 5. Merge    sender tier (confidence-gated) + content tier (recency)
//!  └─ 6. Output   merged record + page summaries + confidence history
//! ```
//!
//! [`summarize`] and [`summarize_stream`] read the same rendered pages
//! without a schema: one narrative summary of the whole letter with
//! descriptions of its images, or a per-page description stream.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_letter2json::{extract, ExtractionConfig, FieldSchema};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = FieldSchema::from_json_str(r#"{
//!         "name":       {"type": "text"},
//!         "letterDate": {"type": "date", "required": true},
//!         "subject":    {"type": "text"}
//!     }"#)?;
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let output = extract("letter.pdf", &schema, &ExtractionConfig::default()).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.record_json())?);
//!     eprintln!("{} of {} pages merged", output.stats.merged_pages, output.stats.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `letter2json` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod schema;
pub mod summarize;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection};
pub use engine::{
    ConfidenceRecord, ExtractionClient, MergePolicy, PageImage, PageSummary, SequentialExtractor,
};
pub use error::{ExtractionFailure, Letter2JsonError};
pub use extract::{
    extract, extract_document, extract_from_bytes, extract_sync, extract_to_file,
    extract_with_cancel,
};
pub use output::{ExtractionOutput, ExtractionStats};
pub use pipeline::render::{PageRenderer, PdfiumRenderer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{AccumulatedState, FieldValue, PageExtraction};
pub use schema::{FieldDescriptor, FieldSchema, FieldType};
pub use summarize::{
    describe_pages, summarize, summarize_document, summarize_from_bytes, summarize_stream,
    DescriptionStream,
    DocumentSummary, PageDescription, SummaryClient,
};
pub use tokio_util::sync::CancellationToken;
