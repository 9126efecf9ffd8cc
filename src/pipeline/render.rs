//! PDF rasterisation: document → ordered [`PageImage`]s.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and must not run on a Tokio worker. All pdfium work happens inside
//! `tokio::task::spawn_blocking`.
//!
//! Every page is rendered and encoded before the first model call. A document
//! that cannot be opened or rasterised fails the whole run here, so the
//! extractor never sees a partial page sequence.

use crate::config::{ExtractionConfig, PageSelection};
use crate::engine::client::PageImage;
use crate::error::Letter2JsonError;
use crate::pipeline::encode;
use futures::future::BoxFuture;
use futures::FutureExt;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Turns a document into page images, in document order.
///
/// A document with zero pages renders to an empty sequence. Any failure to
/// open or rasterise the document is fatal.
pub trait PageRenderer: Send + Sync {
    fn render<'a>(&'a self, pdf_path: &'a Path)
        -> BoxFuture<'a, Result<Vec<PageImage>, Letter2JsonError>>;
}

/// [`PageRenderer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub password: Option<String>,
    pub pages: PageSelection,
}

impl PdfiumRenderer {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
            pages: config.pages.clone(),
        }
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render<'a>(
        &'a self,
        pdf_path: &'a Path,
    ) -> BoxFuture<'a, Result<Vec<PageImage>, Letter2JsonError>> {
        let path = pdf_path.to_path_buf();
        let this = self.clone();
        async move {
            tokio::task::spawn_blocking(move || this.render_blocking(&path))
                .await
                .map_err(|e| Letter2JsonError::Internal(format!("Render task panicked: {}", e)))?
        }
        .boxed()
    }
}

impl PdfiumRenderer {
    fn render_blocking(&self, pdf_path: &Path) -> Result<Vec<PageImage>, Letter2JsonError> {
        let pdfium = bind_pdfium()?;

        let document = pdfium
            .load_pdf_from_file(pdf_path, self.password.as_deref())
            .map_err(|e| classify_load_error(pdf_path, self.password.is_some(), e))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);

        let indices = select_indices(&self.pages, total_pages)?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.target_width())
            .set_maximum_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let mut out = Vec::with_capacity(indices.len());
        for (position, &idx) in indices.iter().enumerate() {
            let rasterisation_failed = |detail: String| Letter2JsonError::RasterisationFailed {
                page: idx + 1,
                detail,
            };

            let page = pages
                .get(idx as u16)
                .map_err(|e| rasterisation_failed(format!("{:?}", e)))?;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| rasterisation_failed(format!("{:?}", e)))?;
            let image: DynamicImage = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );

            let data = encode::encode_page(&image)
                .map_err(|e| rasterisation_failed(format!("Image encoding failed: {}", e)))?;
            out.push(PageImage {
                page_num: position + 1,
                pdf_page: idx + 1,
                image: data,
            });
        }

        Ok(out)
    }

    /// Width in pixels for an A4 portrait page at the configured DPI,
    /// bounded by the pixel cap.
    fn target_width(&self) -> i32 {
        // A4 is 8.27 inches wide.
        let w = self.dpi * 827 / 100;
        w.min(self.max_rendered_pixels) as i32
    }
}

/// Resolve the page selection against the document length.
///
/// An empty document yields no pages; a non-empty document whose selection
/// matches nothing is [`Letter2JsonError::PageOutOfRange`].
pub fn select_indices(
    selection: &PageSelection,
    total_pages: usize,
) -> Result<Vec<usize>, Letter2JsonError> {
    if total_pages == 0 {
        return Ok(Vec::new());
    }
    let indices = selection.to_indices(total_pages);
    if indices.is_empty() {
        let page = match selection {
            PageSelection::All => 0,
            PageSelection::Single(p) => *p,
            PageSelection::Range(start, _) => *start,
            PageSelection::Set(pages) => pages.first().copied().unwrap_or(0),
        };
        return Err(Letter2JsonError::PageOutOfRange {
            page,
            total: total_pages,
        });
    }
    Ok(indices)
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` (file or directory) first, then the
/// system library.
fn bind_pdfium() -> Result<Pdfium, Letter2JsonError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => {
            let path = PathBuf::from(p);
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib)
        }
        _ => Pdfium::bind_to_system_library(),
    };
    bindings
        .map(Pdfium::new)
        .map_err(|e| Letter2JsonError::PdfiumBindingFailed(e.to_string()))
}

fn classify_load_error(pdf_path: &Path, had_password: bool, e: PdfiumError) -> Letter2JsonError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if had_password {
            Letter2JsonError::WrongPassword {
                path: pdf_path.to_path_buf(),
            }
        } else {
            Letter2JsonError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }
        }
    } else {
        Letter2JsonError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: err_str,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_selects_nothing_without_error() {
        assert!(select_indices(&PageSelection::All, 0).unwrap().is_empty());
        assert!(select_indices(&PageSelection::Single(4), 0).unwrap().is_empty());
    }

    #[test]
    fn unmatched_selection_is_out_of_range() {
        let err = select_indices(&PageSelection::Single(9), 3).unwrap_err();
        assert!(matches!(
            err,
            Letter2JsonError::PageOutOfRange { page: 9, total: 3 }
        ));
        assert!(err.is_render_failure());
    }

    #[test]
    fn selection_keeps_document_order() {
        let idx = select_indices(&PageSelection::Set(vec![3, 1]), 5).unwrap();
        assert_eq!(idx, vec![0, 2]);
    }

    #[test]
    fn target_width_respects_pixel_cap() {
        let mut r = PdfiumRenderer::from_config(&ExtractionConfig::default());
        assert_eq!(r.target_width(), 1240);
        r.dpi = 400;
        assert_eq!(r.target_width(), 2000);
    }
}
