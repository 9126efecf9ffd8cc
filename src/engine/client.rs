//! Collaborator contracts: the page image handed to the model and the
//! extraction client that turns it into a [`PageExtraction`].

use crate::error::ExtractionFailure;
use crate::record::PageExtraction;
use crate::schema::FieldSchema;
use edgequake_llm::ImageData;
use futures::future::BoxFuture;

/// One rendered page, ready for a vision model.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based position in the rendered sequence. This is the page number
    /// used in context, summaries and confidence records.
    pub page_num: usize,
    /// 1-based page number in the source PDF (differs from `page_num` when a
    /// page selection is active).
    pub pdf_page: usize,
    /// Base64 PNG payload.
    pub image: ImageData,
}

/// Ask a model to fill the schema from one page image plus textual context.
///
/// Implementations must return a [`PageExtraction`] holding every schema data
/// field exactly once, or an [`ExtractionFailure`]; never a partial or guessed
/// record. They must not mutate any shared state beyond the remote call.
///
/// The returned future is boxed so the trait stays object-safe and the
/// extractor can hold an `Arc<dyn ExtractionClient>` injected by the caller.
pub trait ExtractionClient: Send + Sync {
    fn extract<'a>(
        &'a self,
        page: &'a PageImage,
        schema: &'a FieldSchema,
        context: &'a str,
    ) -> BoxFuture<'a, Result<PageExtraction, ExtractionFailure>>;
}
