//! PDF page rendering with pdfium
//!
//! Pages are rasterized with `pdfium-render`; embedded image objects are
//! reported as structural blocks so the detector can use them directly.

use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use visual_region_common::BBox;

use crate::renderer::{BlockKind, PageRenderer, RenderError, RenderedPage, StructuralBlock};

/// [`PageRenderer`] for PDF documents
pub struct PdfiumRenderer {
    pdfium: Pdfium,
}

impl PdfiumRenderer {
    /// Bind pdfium from the working directory, falling back to the system library
    ///
    /// # Errors
    /// Returns [`RenderError::Unavailable`] when no pdfium library can be loaded
    pub fn new() -> Result<Self, RenderError> {
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| RenderError::Unavailable(format!("Failed to bind pdfium library: {e}")))?;

        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    fn open<'a>(&'a self, path: &Path) -> Result<PdfDocument<'a>, RenderError> {
        self.pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| RenderError::Document {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Image objects on `page`, converted from PDF points (bottom-left origin)
    /// to pixels of a raster rendered at `scale`
    fn image_blocks(page: &PdfPage, scale: f32) -> Vec<StructuralBlock> {
        let page_height = page.height().value;
        let mut blocks = Vec::new();

        for object in page.objects().iter() {
            if object.object_type() != PdfPageObjectType::Image {
                continue;
            }
            let Ok(bounds) = object.bounds() else {
                continue;
            };

            let to_px = |v: f32| (v * scale).round() as i64;
            let bbox = BBox::new(
                to_px(bounds.left().value),
                to_px(page_height - bounds.top().value),
                to_px(bounds.right().value),
                to_px(page_height - bounds.bottom().value),
            );
            blocks.push(StructuralBlock {
                bbox,
                kind: BlockKind::Image,
            });
        }

        blocks
    }
}

impl PageRenderer for PdfiumRenderer {
    fn page_count(&self, path: &Path) -> Result<usize, RenderError> {
        let document = self.open(path)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        path: &Path,
        page_index: usize,
        scale: f32,
    ) -> Result<RenderedPage, RenderError> {
        let document = self.open(path)?;
        let count = document.pages().len() as usize;
        let page = document
            .pages()
            .iter()
            .nth(page_index)
            .ok_or(RenderError::PageOutOfRange {
                index: page_index,
                count,
            })?;

        let bitmap = page
            .render_with_config(
                &PdfRenderConfig::new()
                    .scale_page_by_factor(scale)
                    .render_form_data(true)
                    .render_annotations(true),
            )
            .map_err(|e| RenderError::Render {
                index: page_index,
                reason: e.to_string(),
            })?;

        let image: DynamicImage = bitmap.as_image();
        let blocks = Self::image_blocks(&page, scale);

        tracing::debug!(
            "Rendered page {} at {}x{} with {} image blocks",
            page_index + 1,
            image.width(),
            image.height(),
            blocks.len()
        );

        Ok(RenderedPage { image, blocks })
    }
}
