//! Text surrogates for visual regions
//!
//! Every detected region needs *some* text before it can be embedded and
//! compared with flashcard questions. [`RegionTextDescriber`] runs OCR on the
//! region crop and falls back to a synthetic description when OCR finds too
//! little text.
//!
//! # Features
//! - Pluggable OCR through [`OcrBackend`]
//! - Tesseract backend behind the `tesseract` feature
//! - Retry with an alternate page layout mode when the first pass is too short
//! - Transparent crops composited onto white before recognition
//!
//! # Example
//! ```no_run
//! use visual_region_ocr::{DescriberConfig, NoopOcr, RegionTextDescriber};
//!
//! let describer = RegionTextDescriber::new(DescriberConfig::default(), Box::new(NoopOcr));
//! # let regions: Vec<visual_region_common::VisualRegion> = Vec::new();
//! for region in &regions {
//!     println!("{}", describer.describe(region));
//! }
//! ```

#[cfg(feature = "tesseract")]
pub mod tesseract;

use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};
use visual_region_common::{panic_message, CancellationToken, RegionError, VisualRegion};

#[cfg(feature = "tesseract")]
pub use tesseract::TesseractOcr;

/// Errors that can occur during OCR processing
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Failed to initialize OCR engine: {0}")]
    InitError(String),

    #[error("Failed to run OCR: {0}")]
    RecognitionError(String),

    #[error("Invalid image dimensions: {0}")]
    InvalidImageDimensions(String),
}

impl From<OcrError> for RegionError {
    fn from(err: OcrError) -> Self {
        RegionError::CollaboratorUnavailable(err.to_string())
    }
}

/// Page layout assumption handed to the OCR engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// Fully automatic page segmentation
    Auto,
    /// A single uniform block of text
    SingleBlock,
    /// As much text as possible, in no particular order
    SparseText,
}

impl LayoutMode {
    /// Tesseract page segmentation mode number
    #[must_use]
    pub const fn psm(&self) -> u32 {
        match self {
            LayoutMode::Auto => 3,
            LayoutMode::SingleBlock => 6,
            LayoutMode::SparseText => 11,
        }
    }
}

/// Text recognition for a single RGB image
pub trait OcrBackend {
    /// Recognise the text in `image` using `mode`.
    ///
    /// Images without text must yield an empty string, not an error.
    fn extract_text(&self, image: &RgbImage, mode: LayoutMode) -> Result<String, OcrError>;
}

/// Backend that never recognises anything; every region gets its synthetic description
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOcr;

impl OcrBackend for NoopOcr {
    fn extract_text(&self, _image: &RgbImage, _mode: LayoutMode) -> Result<String, OcrError> {
        Ok(String::new())
    }
}

/// Configuration for region description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriberConfig {
    /// Tesseract language codes (e.g., "eng", "eng+deu")
    pub language: String,
    pub primary_layout: LayoutMode,
    /// Second attempt when the primary pass is too short; `None` disables the retry
    pub fallback_layout: Option<LayoutMode>,
    /// OCR text shorter than this (after trimming) counts as insufficient
    pub min_text_chars: usize,
}

impl Default for DescriberConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            primary_layout: LayoutMode::SingleBlock,
            fallback_layout: Some(LayoutMode::SparseText),
            min_text_chars: 10,
        }
    }
}

/// Produces an embeddable text surrogate for each region
pub struct RegionTextDescriber {
    config: DescriberConfig,
    ocr: Box<dyn OcrBackend>,
}

impl RegionTextDescriber {
    #[must_use]
    pub fn new(config: DescriberConfig, ocr: Box<dyn OcrBackend>) -> Self {
        Self { config, ocr }
    }

    #[must_use]
    pub fn config(&self) -> &DescriberConfig {
        &self.config
    }

    /// Describe one region; always returns non-empty text
    #[must_use]
    pub fn describe(&self, region: &VisualRegion) -> String {
        self.describe_reporting(region).0
    }

    /// Describe one region, also returning the first OCR failure it hit.
    ///
    /// A failing or panicking OCR call counts as "no text", so the region still
    /// gets a description (at worst the synthetic one).
    pub fn describe_reporting(&self, region: &VisualRegion) -> (String, Option<RegionError>) {
        let image = flatten_onto_white(region.image());
        let mut failure = None;

        let mut best = self.recognize(&image, self.config.primary_layout, &mut failure);
        if best.chars().count() < self.config.min_text_chars {
            if let Some(fallback) = self.config.fallback_layout {
                let retry = self.recognize(&image, fallback, &mut failure);
                if retry.chars().count() > best.chars().count() {
                    best = retry;
                }
            }
        }

        if best.chars().count() < self.config.min_text_chars {
            let synthetic = synthetic_description(region);
            debug!(
                "OCR text too short for region on page {} ({} chars), using '{}'",
                region.page_index() + 1,
                best.chars().count(),
                synthetic
            );
            return (synthetic, failure);
        }

        debug!(
            "OCR described region on page {}: '{}'",
            region.page_index() + 1,
            best
        );
        (best, failure)
    }

    /// Describe regions in order, stopping early when `cancel` trips.
    ///
    /// The second element is the first degradation seen. On cancellation it is
    /// [`RegionError::Cancelled`] and fewer descriptions than regions come back;
    /// OCR failures leave the list complete.
    pub fn describe_all(
        &self,
        regions: &[VisualRegion],
        cancel: &CancellationToken,
    ) -> (Vec<String>, Option<RegionError>) {
        let mut descriptions = Vec::with_capacity(regions.len());
        let mut degradation = None;
        for region in regions {
            if let Err(e) = cancel.check() {
                warn!(
                    "Region description cancelled after {}/{} regions",
                    descriptions.len(),
                    regions.len()
                );
                return (descriptions, degradation.or(Some(e)));
            }
            let (text, failure) = self.describe_reporting(region);
            if degradation.is_none() {
                degradation = failure;
            }
            descriptions.push(text);
        }
        (descriptions, degradation)
    }

    /// Run OCR once; failures and panics count as no text
    fn recognize(
        &self,
        image: &RgbImage,
        mode: LayoutMode,
        failure: &mut Option<RegionError>,
    ) -> String {
        let result = catch_unwind(AssertUnwindSafe(|| self.ocr.extract_text(image, mode)))
            .unwrap_or_else(|payload| {
                Err(OcrError::RecognitionError(format!(
                    "OCR backend panicked: {}",
                    panic_message(&*payload)
                )))
            });

        match result {
            Ok(text) => normalize_whitespace(&text),
            Err(e) => {
                warn!("OCR failed (psm {}): {}", mode.psm(), e);
                failure.get_or_insert(e.into());
                String::new()
            }
        }
    }
}

/// Placeholder text for regions OCR could not read
#[must_use]
pub fn synthetic_description(region: &VisualRegion) -> String {
    format!(
        "{} visual element on page {}",
        region.kind(),
        region.page_index() + 1
    )
}

/// Convert any image to RGB, compositing transparent pixels onto white
#[must_use]
pub fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let alpha = u32::from(src[3]);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        *dst = Rgb([blend(src[0]), blend(src[1]), blend(src[2])]);
    }
    out
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
