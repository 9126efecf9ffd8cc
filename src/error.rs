//! Error types for the edgequake-letter2json library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Letter2JsonError`] — **Fatal**: the extraction cannot proceed at all
//!   (unreadable input, PDF that cannot be rendered, provider not
//!   configured, invalid schema). Returned as `Err(Letter2JsonError)` from
//!   the top-level `extract*` functions.
//!
//! * [`ExtractionFailure`] — **Non-fatal**: a single page produced no usable
//!   extraction (empty or malformed model output, schema violation, API
//!   error). The page is skipped and recorded in
//!   [`crate::output::ExtractionOutput::failures`]; the run continues with
//!   the state accumulated from earlier pages.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-letter2json library.
#[derive(Debug, Error)]
pub enum Letter2JsonError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Render errors ─────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The page selection matched no page of the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Schema errors ─────────────────────────────────────────────────────
    /// The caller-supplied field schema cannot be used.
    #[error("Invalid field schema: {0}")]
    InvalidSchema(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Pages were attempted but none produced a usable extraction, and the
    /// caller asked for at least one success.
    #[error("None of the {attempted} pages could be extracted.\nFirst error: {first_error}")]
    NoPagesExtracted {
        attempted: usize,
        first_error: String,
    },

    // ── Summary errors ────────────────────────────────────────────────────
    /// The document rendered to zero pages, so there is nothing to summarise.
    #[error("PDF '{path}' has no pages to summarise")]
    EmptyDocument { path: PathBuf },

    /// The whole-document summary call failed.
    #[error("Document summary failed: {0}")]
    SummaryFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Letter2JsonError {
    /// True for errors raised while opening or rasterising the document,
    /// i.e. before any page reached the model.
    pub fn is_render_failure(&self) -> bool {
        matches!(
            self,
            Letter2JsonError::FileNotFound { .. }
                | Letter2JsonError::PermissionDenied { .. }
                | Letter2JsonError::NotAPdf { .. }
                | Letter2JsonError::CorruptPdf { .. }
                | Letter2JsonError::PasswordRequired { .. }
                | Letter2JsonError::WrongPassword { .. }
                | Letter2JsonError::PageOutOfRange { .. }
                | Letter2JsonError::RasterisationFailed { .. }
                | Letter2JsonError::PdfiumBindingFailed(_)
        )
    }
}

/// A non-fatal error for a single page.
///
/// The page contributes nothing to the accumulated state: no merge, no
/// confidence record, only an error summary in the page history.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractionFailure {
    /// The model answered with nothing usable.
    #[error("Page {page}: model returned an empty response")]
    EmptyResponse { page: usize },

    /// No parseable JSON object could be located in the response.
    #[error("Page {page}: malformed model response: {detail}")]
    MalformedResponse { page: usize, detail: String },

    /// The JSON object does not match the declared schema.
    #[error("Page {page}: schema violation (unexpected keys: {unexpected:?}, missing required keys: {missing:?}, repeated keys: {duplicated:?})")]
    SchemaViolation {
        page: usize,
        unexpected: Vec<String>,
        missing: Vec<String>,
        /// Keys that appear more than once in the response object.
        #[serde(default)]
        duplicated: Vec<String>,
    },

    /// A field carried an array or object instead of a scalar.
    #[error("Page {page}: field '{field}' has a non-scalar value")]
    NonScalarValue { page: usize, field: String },

    /// LLM call failed after retries.
    #[error("Page {page}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// LLM call exceeded the per-page timeout.
    #[error("Page {page}: LLM call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl ExtractionFailure {
    /// 1-based page position the failure belongs to.
    pub fn page(&self) -> usize {
        match self {
            ExtractionFailure::EmptyResponse { page }
            | ExtractionFailure::MalformedResponse { page, .. }
            | ExtractionFailure::SchemaViolation { page, .. }
            | ExtractionFailure::NonScalarValue { page, .. }
            | ExtractionFailure::LlmFailed { page, .. }
            | ExtractionFailure::Timeout { page, .. } => *page,
        }
    }

    /// The failure message without the `Page n:` prefix, as shown in the
    /// page-summary history.
    pub fn detail(&self) -> String {
        match self {
            ExtractionFailure::EmptyResponse { .. } => "model returned an empty response".into(),
            ExtractionFailure::MalformedResponse { detail, .. } => {
                format!("malformed model response: {detail}")
            }
            ExtractionFailure::SchemaViolation {
                unexpected,
                missing,
                duplicated,
                ..
            } => {
                let mut parts = Vec::new();
                if !unexpected.is_empty() {
                    parts.push(format!("unexpected keys {}", unexpected.join(", ")));
                }
                if !missing.is_empty() {
                    parts.push(format!("missing required keys {}", missing.join(", ")));
                }
                if !duplicated.is_empty() {
                    parts.push(format!("repeated keys {}", duplicated.join(", ")));
                }
                format!("schema violation: {}", parts.join("; "))
            }
            ExtractionFailure::NonScalarValue { field, .. } => {
                format!("schema violation: field '{field}' is not a scalar")
            }
            ExtractionFailure::LlmFailed { retries, detail, .. } => {
                format!("LLM call failed after {retries} retries: {detail}")
            }
            ExtractionFailure::Timeout { secs, .. } => format!("timed out after {secs}s"),
        }
    }

    /// Schema violations are the subset of failures where the model output
    /// parsed but did not fit the declared field set.
    pub fn is_schema_violation(&self) -> bool {
        matches!(
            self,
            ExtractionFailure::SchemaViolation { .. } | ExtractionFailure::NonScalarValue { .. }
        )
    }
}
