//! Document-level entry points: validate input, render every page, run the
//! sequential extractor, and package the result.
//!
//! ```text
//! input ──▶ render (all pages) ──▶ SequentialExtractor ──▶ ExtractionOutput
//! ```
//!
//! Rendering finishes before the first model call. A document that cannot be
//! rendered is an `Err`; pages that fail extraction are not.

use crate::config::ExtractionConfig;
use crate::engine::client::ExtractionClient;
use crate::engine::context::ContextAssembler;
use crate::engine::sequential::SequentialExtractor;
use crate::error::Letter2JsonError;
use crate::output::{ExtractionOutput, ExtractionStats};
use crate::pipeline::llm::{TokenUsage, VisionExtractionClient};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::pipeline::input;
use crate::schema::FieldSchema;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Extract the schema's fields from a PDF letter.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(ExtractionOutput)` even if some pages failed (see `output.failures`).
///
/// # Errors
/// Returns `Err(Letter2JsonError)` only for fatal errors:
/// - invalid schema or provider not configured
/// - file not found, not a PDF, or not renderable
/// - every attempted page failed while `require_success` is set
///
/// # Example
/// ```rust,no_run
/// use edgequake_letter2json::{extract, ExtractionConfig, FieldSchema};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let schema = FieldSchema::from_json_str(&std::fs::read_to_string("schema.json")?)?;
/// let output = extract("letter.pdf", &schema, &ExtractionConfig::default()).await?;
/// println!("{}", serde_json::to_string_pretty(&output.record_json())?);
/// # Ok(())
/// # }
/// ```
pub async fn extract(
    input: impl AsRef<Path>,
    schema: &FieldSchema,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Letter2JsonError> {
    extract_with_cancel(input, schema, config, &CancellationToken::new()).await
}

/// Like [`extract`], stopping early once `cancel` fires.
///
/// A cancelled run still returns `Ok` with the record as of the last
/// completed page and `stats.cancelled = true`.
pub async fn extract_with_cancel(
    input: impl AsRef<Path>,
    schema: &FieldSchema,
    config: &ExtractionConfig,
    cancel: &CancellationToken,
) -> Result<ExtractionOutput, Letter2JsonError> {
    schema.validate()?;
    let pdf_path = input::resolve_local(input)?;
    info!("Starting extraction: {}", pdf_path.display());

    let (client, usage) = resolve_client(config).await?;
    let renderer = PdfiumRenderer::from_config(config);

    let mut output = extract_document(&renderer, client, &pdf_path, schema, config, cancel).await?;
    if let Some(usage) = usage {
        output.stats.total_input_tokens = usage.input_tokens();
        output.stats.total_output_tokens = usage.output_tokens();
    }
    Ok(output)
}

/// Run the whole pipeline with caller-supplied collaborators.
///
/// Nothing here touches the network or pdfium unless `renderer` or `client`
/// do, which makes this the seam for tests and for hosts that render pages
/// themselves.
pub async fn extract_document(
    renderer: &dyn PageRenderer,
    client: Arc<dyn ExtractionClient>,
    pdf_path: &Path,
    schema: &FieldSchema,
    config: &ExtractionConfig,
    cancel: &CancellationToken,
) -> Result<ExtractionOutput, Letter2JsonError> {
    let total_start = Instant::now();

    // ── Step 1: Rasterise every page ─────────────────────────────────────
    let render_start = Instant::now();
    let pages = renderer.render(pdf_path).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!("Rendered {} pages in {}ms", pages.len(), render_duration_ms);

    // ── Step 2: Sequential extraction ────────────────────────────────────
    let mut extractor = SequentialExtractor::new(client, schema.clone())
        .with_policy(config.merge_policy)
        .with_assembler(ContextAssembler::new(config.confidence_history_window))
        .with_summary_item_cap(config.summary_item_cap)
        .with_page_timeout(Duration::from_secs(config.api_timeout_secs));
    if let Some(ref cb) = config.progress_callback {
        extractor = extractor.with_progress(Arc::clone(cb));
    }
    debug!("{:?}", extractor);

    let extraction_start = Instant::now();
    let run = extractor.run_with_cancel(&pages, cancel).await;
    let extraction_duration_ms = extraction_start.elapsed().as_millis() as u64;

    // ── Step 3: Success policy ───────────────────────────────────────────
    if config.require_success && run.merged_pages == 0 && run.attempted_pages > 0 {
        let first_error = run
            .failures
            .first()
            .map(|f| f.error.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(Letter2JsonError::NoPagesExtracted {
            attempted: run.attempted_pages,
            first_error,
        });
    }

    let mut output = ExtractionOutput::from_run(run);
    output.stats.render_duration_ms = render_duration_ms;
    output.stats.extraction_duration_ms = extraction_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Extraction complete: {}/{} pages merged, {}ms total",
        output.stats.merged_pages, output.stats.total_pages, output.stats.total_duration_ms
    );
    Ok(output)
}

/// Extract from PDF bytes held in memory.
///
/// The bytes are written to a managed [`tempfile`] that is removed on return.
pub async fn extract_from_bytes(
    bytes: &[u8],
    schema: &FieldSchema,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Letter2JsonError> {
    input::check_magic(bytes, Path::new("<bytes>"))?;
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| Letter2JsonError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| Letter2JsonError::Internal(format!("tempfile write: {e}")))?;
    // `tmp` is dropped (and the file deleted) when `extract` returns
    extract(tmp.path(), schema, config).await
}

/// Extract and write the merged record as pretty JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    schema: &FieldSchema,
    config: &ExtractionConfig,
) -> Result<ExtractionStats, Letter2JsonError> {
    let output = extract(input, schema, config).await?;
    let json = serde_json::to_string_pretty(&output.record_json())
        .map_err(|e| Letter2JsonError::Internal(format!("serialise record: {e}")))?;
    write_atomic(output_path.as_ref(), json.as_bytes()).await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input: impl AsRef<Path>,
    schema: &FieldSchema,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Letter2JsonError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Letter2JsonError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input, schema, config))
}

/// Write `bytes` to `path` via a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Letter2JsonError> {
    let write_failed = |e: std::io::Error| Letter2JsonError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Pick the extraction client: an injected client wins, otherwise a vision
/// client over the resolved provider.
async fn resolve_client(
    config: &ExtractionConfig,
) -> Result<(Arc<dyn ExtractionClient>, Option<Arc<TokenUsage>>), Letter2JsonError> {
    if let Some(ref client) = config.client {
        return Ok((Arc::clone(client), None));
    }
    let provider = resolve_provider(config).await?;
    debug!("LLM provider resolved");
    let client = VisionExtractionClient::new(provider, config);
    let usage = client.usage();
    Ok((Arc::new(client), Some(usage)))
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Letter2JsonError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Letter2JsonError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. pre-built `config.provider`
/// 2. `config.provider_name` + `config.model`
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
/// 4. OpenAI when `OPENAI_API_KEY` is set
/// 5. [`ProviderFactory::from_env`]
pub(crate) async fn resolve_provider(
    config: &ExtractionConfig,
) -> Result<Arc<dyn LLMProvider>, Letter2JsonError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Letter2JsonError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Default vision model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
