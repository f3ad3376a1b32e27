//! Common types shared by the visual region detection and matching crates
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Degradation taxonomy for the region pipeline.
///
/// None of these abort flashcard generation; they explain why a document
/// produced fewer (or no) illustrated questions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegionError {
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("No match above confidence floor {floor:.2} (best score {best:.3})")]
    QualityFloorMiss { best: f32, floor: f32 },

    #[error("Processing cancelled")]
    Cancelled,
}

impl RegionError {
    /// Whether the error describes missing or failing infrastructure
    /// rather than a property of the document itself.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            RegionError::CollaboratorUnavailable(_) | RegionError::ResourceExhausted(_)
        )
    }
}

/// Result type for region operations
pub type Result<T> = std::result::Result<T, RegionError>;

/// Axis-aligned rectangle in page-image pixel coordinates.
///
/// `x1`/`y1` are exclusive, so `width() == x1 - x0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl BBox {
    #[must_use]
    pub const fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Build a box from a top-left corner and a size
    #[must_use]
    pub const fn from_xywh(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    #[must_use]
    pub const fn width(&self) -> i64 {
        self.x1 - self.x0
    }

    #[must_use]
    pub const fn height(&self) -> i64 {
        self.y1 - self.y0
    }

    /// Area in square pixels; zero for degenerate boxes
    #[must_use]
    pub fn area(&self) -> i64 {
        self.width().max(0) * self.height().max(0)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    #[must_use]
    pub const fn center(&self) -> (i64, i64) {
        ((self.x0 + self.x1) / 2, (self.y0 + self.y1) / 2)
    }

    /// Whether the box lies fully within `[0, width] x [0, height]`
    #[must_use]
    pub const fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x0 >= 0
            && self.y0 >= 0
            && self.x1 <= width as i64
            && self.y1 <= height as i64
            && !self.is_empty()
    }
}

/// Informational classification of a detected region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    /// Ruled grid found by line detection, or a generic structural region
    Table,
    /// Native image object reported by the document renderer
    Figure,
    /// Connected ink component (graphs, diagrams, formulas)
    Diagram,
}

impl RegionKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RegionKind::Table => "table",
            RegionKind::Figure => "figure",
            RegionKind::Diagram => "diagram",
        }
    }
}

impl std::fmt::Display for RegionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected candidate sub-area of one document page.
///
/// Regions are created by the detector and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct VisualRegion {
    bbox: BBox,
    page_index: usize,
    kind: RegionKind,
    confidence: f32,
    image: DynamicImage,
}

impl VisualRegion {
    /// Create a region; `confidence` is clamped into `[0, 1]`
    #[must_use]
    pub fn new(
        bbox: BBox,
        page_index: usize,
        kind: RegionKind,
        confidence: f32,
        image: DynamicImage,
    ) -> Self {
        Self {
            bbox,
            page_index,
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            image,
        }
    }

    #[must_use]
    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    #[must_use]
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    #[must_use]
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Geometric desirability score (not a match score)
    #[must_use]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    #[must_use]
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Serializable view without pixel data
    #[must_use]
    pub fn summary(&self) -> RegionSummary {
        RegionSummary {
            page_index: self.page_index,
            bbox: self.bbox,
            kind: self.kind,
            confidence: self.confidence,
            width: self.image.width(),
            height: self.image.height(),
        }
    }
}

/// Pixel-free description of a region, for reports and manifests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSummary {
    pub page_index: usize,
    pub bbox: BBox,
    pub kind: RegionKind,
    pub confidence: f32,
    pub width: u32,
    pub height: u32,
}

/// One accepted question/region pairing produced by the matcher
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub question_index: usize,
    pub region_index: usize,
    pub score: f32,
}

/// Pipeline output: a question index paired with the region that illustrates it
#[derive(Debug, Clone)]
pub struct RegionMatch {
    pub question_index: usize,
    pub region: VisualRegion,
    pub score: f32,
}

/// Document families the detector knows how to scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Word,
    Unsupported,
}

const PDF_MIME: &str = "application/pdf";
const WORD_MIMES: [&str; 2] = [
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/msword",
];

impl DocumentKind {
    /// Classify a document by MIME type, falling back to its file extension
    #[must_use]
    pub fn detect(path: &Path, mime_type: Option<&str>) -> Self {
        if let Some(mime) = mime_type {
            let mime = mime.trim().to_ascii_lowercase();
            if mime == PDF_MIME {
                return DocumentKind::Pdf;
            }
            if WORD_MIMES.contains(&mime.as_str()) {
                return DocumentKind::Word;
            }
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pdf") => DocumentKind::Pdf,
            Some("docx" | "doc") => DocumentKind::Word,
            _ => DocumentKind::Unsupported,
        }
    }
}

/// Cooperative cancellation shared between a caller and one pipeline run.
///
/// Checked between pages, between regions and between embedding batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that trips automatically once `timeout` has elapsed
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(RegionError::Cancelled)` once the token has tripped
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RegionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Text carried by a payload caught with `std::panic::catch_unwind`
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
