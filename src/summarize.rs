//! Whole-document summaries with image descriptions.
//!
//! Two shapes, neither of which touches the field schema or the merge:
//!
//! - [`summarize`] sends every page image in one request and returns one
//!   narrative summary of the document.
//! - [`summarize_stream`] describes the pages one at a time, in page order,
//!   yielding each description as soon as it is ready.
//!
//! ```text
//! input ──▶ render (all pages) ──┬──▶ one request, all images ──▶ DocumentSummary
//!                                └──▶ one request per page ─────▶ Stream<PageDescription>
//! ```

use crate::config::ExtractionConfig;
use crate::error::{ExtractionFailure, Letter2JsonError};
use crate::extract::resolve_provider;
use crate::pipeline::input;
use crate::pipeline::llm::VisionExtractionClient;
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::prompts::{DOCUMENT_SUMMARY_PROMPT, PAGE_DESCRIPTION_PROMPT};
use edgequake_llm::ImageData;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::Stream;
use tracing::info;

/// A model that turns page images plus an instruction into free text.
///
/// `first_page` is the 1-based position of `images[0]`; failures are
/// attributed to it.
pub trait SummaryClient: Send + Sync {
    fn summarize<'a>(
        &'a self,
        first_page: usize,
        images: &'a [ImageData],
        instruction: &'a str,
    ) -> BoxFuture<'a, Result<String, ExtractionFailure>>;
}

/// Result of [`summarize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub text: String,
    pub pages_processed: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub duration_ms: u64,
}

/// One item of [`summarize_stream`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageDescription {
    /// 1-based position after page selection.
    pub page_num: usize,
    /// 1-based page number in the source PDF.
    pub pdf_page: usize,
    pub text: String,
}

/// A boxed stream of page descriptions, in page order.
pub type DescriptionStream =
    Pin<Box<dyn Stream<Item = Result<PageDescription, ExtractionFailure>> + Send>>;

/// Summarise a PDF in a single model request over all selected pages.
///
/// # Errors
/// Input and render errors as for [`crate::extract`], plus
/// [`Letter2JsonError::EmptyDocument`] and
/// [`Letter2JsonError::SummaryFailed`].
pub async fn summarize(
    input: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<DocumentSummary, Letter2JsonError> {
    let pdf_path = input::resolve_local(input)?;
    let provider = resolve_provider(config).await?;
    let client = VisionExtractionClient::new(provider, config);
    let usage = client.usage();
    let renderer = PdfiumRenderer::from_config(config);

    let mut summary = summarize_document(&renderer, &client, &pdf_path).await?;
    summary.total_input_tokens = usage.input_tokens();
    summary.total_output_tokens = usage.output_tokens();
    Ok(summary)
}

/// Summarise a PDF held in memory.
pub async fn summarize_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<DocumentSummary, Letter2JsonError> {
    input::check_magic(bytes, Path::new("<bytes>"))?;
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| Letter2JsonError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| Letter2JsonError::Internal(format!("tempfile write: {e}")))?;
    summarize(tmp.path(), config).await
}

/// [`summarize`] with caller-supplied collaborators.
pub async fn summarize_document(
    renderer: &dyn PageRenderer,
    client: &dyn SummaryClient,
    pdf_path: &Path,
) -> Result<DocumentSummary, Letter2JsonError> {
    let start = Instant::now();
    let pages = renderer.render(pdf_path).await?;
    let Some(first) = pages.first() else {
        return Err(Letter2JsonError::EmptyDocument {
            path: pdf_path.to_path_buf(),
        });
    };

    let images: Vec<ImageData> = pages.iter().map(|p| p.image.clone()).collect();
    info!("Summarising {} pages in one request", images.len());

    let text = client
        .summarize(first.page_num, &images, DOCUMENT_SUMMARY_PROMPT)
        .await
        .map_err(|e| Letter2JsonError::SummaryFailed(e.detail()))?;

    Ok(DocumentSummary {
        text,
        pages_processed: pages.len(),
        total_input_tokens: 0,
        total_output_tokens: 0,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Describe each selected page, streaming descriptions in page order.
///
/// Pages are rendered before the stream is returned. A page whose request
/// fails yields an `Err` item and the stream moves on to the next page.
pub async fn summarize_stream(
    input: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<DescriptionStream, Letter2JsonError> {
    let pdf_path = input::resolve_local(input)?;
    let provider = resolve_provider(config).await?;
    let client: Arc<dyn SummaryClient> = Arc::new(VisionExtractionClient::new(provider, config));
    let renderer = PdfiumRenderer::from_config(config);
    describe_pages(&renderer, client, &pdf_path).await
}

/// [`summarize_stream`] with caller-supplied collaborators.
pub async fn describe_pages(
    renderer: &dyn PageRenderer,
    client: Arc<dyn SummaryClient>,
    pdf_path: &Path,
) -> Result<DescriptionStream, Letter2JsonError> {
    let pages = renderer.render(pdf_path).await?;
    info!("Describing {} pages one at a time", pages.len());

    let s = stream::iter(pages).then(move |page| {
        let client = Arc::clone(&client);
        async move {
            let (page_num, pdf_page) = (page.page_num, page.pdf_page);
            let images = [page.image];
            client
                .summarize(page_num, &images, PAGE_DESCRIPTION_PROMPT)
                .await
                .map(|text| PageDescription {
                    page_num,
                    pdf_page,
                    text,
                })
        }
    });

    Ok(Box::pin(s))
}
