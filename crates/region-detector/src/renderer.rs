//! Page rendering interface
//!
//! The detector never parses document formats itself; it asks a
//! [`PageRenderer`] for a raster of each page plus any structural hints.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use visual_region_common::{BBox, RegionError};

/// Errors that can occur while rendering document pages
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Renderer unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to open document {path}: {reason}")]
    Document { path: String, reason: String },

    #[error("Page {index} out of range (document has {count} pages)")]
    PageOutOfRange { index: usize, count: usize },

    #[error("Failed to render page {index}: {reason}")]
    Render { index: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RenderError> for RegionError {
    fn from(err: RenderError) -> Self {
        RegionError::CollaboratorUnavailable(err.to_string())
    }
}

/// Kind of structural block reported by a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// Embedded raster or figure object
    Image,
}

/// A native block on a page, already in page-image pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralBlock {
    pub bbox: BBox,
    pub kind: BlockKind,
}

/// One rendered page: its raster and the blocks the renderer knows about
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub image: DynamicImage,
    pub blocks: Vec<StructuralBlock>,
}

impl RenderedPage {
    /// A page with no structural hints
    #[must_use]
    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            image,
            blocks: Vec::new(),
        }
    }
}

/// Rasterizes document pages
pub trait PageRenderer {
    /// Number of pages in the document
    fn page_count(&self, path: &Path) -> Result<usize, RenderError>;

    /// Render one page at `scale` times its natural size.
    ///
    /// Block coordinates must be expressed in the returned image's pixels.
    fn render_page(
        &self,
        path: &Path,
        page_index: usize,
        scale: f32,
    ) -> Result<RenderedPage, RenderError>;
}
