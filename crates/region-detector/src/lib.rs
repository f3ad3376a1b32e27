//! Visual region detection for rendered document pages
//!
//! Finds bounded sub-regions of a page that are likely to hold tables,
//! graphs or diagrams, and crops them out as [`VisualRegion`]s.
//!
//! # Strategies
//! Three independent strategies run on every page and their results are unioned:
//! - **Structural blocks**: image objects reported by the renderer
//! - **Connected components**: ink blobs of a binarised page, filtered by area and aspect ratio
//! - **Line grid**: ruling lines isolated by morphological opening with long
//!   horizontal and vertical structuring elements
//!
//! Every raw box then passes through [`RegionGeometry`]: clamp, oversize
//! rejection, minimum-size enforcement, blank rejection and confidence scoring.
//!
//! Word documents skip geometric detection entirely: each embedded picture is
//! one region.
//!
//! # Example
//! ```no_run
//! use visual_region_detector::{DetectorConfig, RegionDetector};
//! use visual_region_common::{CancellationToken, DocumentKind};
//! use std::path::Path;
//!
//! let detector = RegionDetector::new(DetectorConfig::default(), None);
//! let path = Path::new("lecture.docx");
//! let detection = detector.detect(path, DocumentKind::Word, &CancellationToken::new());
//! println!("{} regions", detection.regions.len());
//! ```

pub mod docx;
pub mod geometry;
#[cfg(feature = "pdf")]
pub mod pdf;
pub mod renderer;
pub mod vision;

use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, error, info, warn};
use visual_region_common::{
    panic_message, BBox, CancellationToken, DocumentKind, RegionError, RegionKind, VisualRegion,
};

pub use geometry::RegionGeometry;
#[cfg(feature = "pdf")]
pub use pdf::PdfiumRenderer;
pub use renderer::{BlockKind, PageRenderer, RenderError, RenderedPage, StructuralBlock};
pub use vision::{ImageprocVision, VisionError, VisionOps};

/// Configuration for region detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Upscaling factor applied when rendering PDF pages
    pub render_scale: f32,
    /// Minimum raw bounding-box area for component and grid candidates (px²)
    pub min_region_area: u64,
    /// Accepted width/height ratio range for component candidates
    pub aspect_ratio_range: (f32, f32),
    /// Length of the line structuring elements used for grid detection
    pub line_kernel_length: u32,
    /// Confidence assigned to every embedded Word picture
    pub embedded_image_confidence: f32,
    pub use_structural_blocks: bool,
    pub use_connected_components: bool,
    pub use_line_grid: bool,
    /// Validation and scoring thresholds
    pub geometry: RegionGeometry,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            render_scale: 2.0,
            min_region_area: 2500,
            aspect_ratio_range: (0.2, 5.0),
            line_kernel_length: 40,
            embedded_image_confidence: 0.8,
            use_structural_blocks: true,
            use_connected_components: true,
            use_line_grid: true,
            geometry: RegionGeometry::default(),
        }
    }
}

/// Regions found in one document, plus the degradation that cut detection short, if any
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub regions: Vec<VisualRegion>,
    pub degradation: Option<RegionError>,
}

impl Detection {
    fn failed(err: RegionError) -> Self {
        Self {
            regions: Vec::new(),
            degradation: Some(err),
        }
    }
}

/// Detects visual regions in PDF and Word documents
pub struct RegionDetector {
    config: DetectorConfig,
    renderer: Option<Box<dyn PageRenderer>>,
    vision: Box<dyn VisionOps>,
}

impl RegionDetector {
    /// Create a detector using the `imageproc` vision backend.
    ///
    /// Without a renderer, PDF documents yield no regions.
    #[must_use]
    pub fn new(config: DetectorConfig, renderer: Option<Box<dyn PageRenderer>>) -> Self {
        Self::with_vision(config, renderer, Box::new(ImageprocVision))
    }

    #[must_use]
    pub fn with_vision(
        config: DetectorConfig,
        renderer: Option<Box<dyn PageRenderer>>,
        vision: Box<dyn VisionOps>,
    ) -> Self {
        Self {
            config,
            renderer,
            vision,
        }
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect regions in a document of the given kind.
    ///
    /// Never fails: unsupported documents and collaborator failures produce an
    /// empty (or partial) region list with the cause in `degradation`.
    pub fn detect(&self, path: &Path, kind: DocumentKind, cancel: &CancellationToken) -> Detection {
        match kind {
            DocumentKind::Pdf => self.detect_regions_in_pdf(path, cancel),
            DocumentKind::Word => self.detect_regions_in_docx(path),
            DocumentKind::Unsupported => {
                info!("Unsupported document type for region detection: {}", path.display());
                Detection::failed(RegionError::UnsupportedInput(path.display().to_string()))
            }
        }
    }

    /// Render every page and run the detection strategies on it.
    ///
    /// A page that fails to render contributes no regions; the remaining pages
    /// are still processed.
    pub fn detect_regions_in_pdf(&self, path: &Path, cancel: &CancellationToken) -> Detection {
        let Some(renderer) = self.renderer.as_deref() else {
            warn!("No page renderer available, cannot detect regions in {}", path.display());
            return Detection::failed(RegionError::CollaboratorUnavailable(
                "page renderer not configured".to_string(),
            ));
        };

        let page_count = match renderer.page_count(path) {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to open PDF for region detection: {}", e);
                return Detection::failed(e.into());
            }
        };

        info!("Processing {} pages for visual region detection", page_count);

        let mut detection = Detection::default();
        for page_index in 0..page_count {
            if let Err(e) = cancel.check() {
                warn!("Region detection cancelled before page {}", page_index + 1);
                detection.degradation = Some(e);
                break;
            }

            match self.process_page(renderer, path, page_index) {
                Ok(page_regions) => {
                    info!(
                        "Page {}/{}: found {} visual regions",
                        page_index + 1,
                        page_count,
                        page_regions.len()
                    );
                    detection.regions.extend(page_regions);
                }
                Err(e) => {
                    warn!("Skipping page {}/{}: {}", page_index + 1, page_count, e);
                    detection.degradation.get_or_insert(e.into());
                }
            }
        }

        detection
    }

    /// Render and scan one page; a panic inside the renderer or the vision
    /// backend fails this page only.
    fn process_page(
        &self,
        renderer: &dyn PageRenderer,
        path: &Path,
        page_index: usize,
    ) -> Result<Vec<VisualRegion>, RenderError> {
        catch_unwind(AssertUnwindSafe(|| {
            renderer
                .render_page(path, page_index, self.config.render_scale)
                .map(|page| self.detect_regions_on_page(&page, page_index))
        }))
        .unwrap_or_else(|payload| {
            error!("Page {} processing panicked", page_index + 1);
            Err(RenderError::Render {
                index: page_index,
                reason: format!("panicked: {}", panic_message(&*payload)),
            })
        })
    }

    /// Treat each embedded picture of a Word document as one region
    pub fn detect_regions_in_docx(&self, path: &Path) -> Detection {
        let media = match docx::read_media_images(path) {
            Ok(media) => media,
            Err(e) => {
                warn!("Failed to read Word document media: {}", e);
                return Detection::failed(e.into());
            }
        };

        let regions: Vec<VisualRegion> = media
            .into_iter()
            .map(|media| {
                let (width, height) = (media.image.width(), media.image.height());
                let bbox = BBox::new(0, 0, i64::from(width), i64::from(height));
                debug!("Word picture {} -> region {}", media.name, media.ordinal);
                VisualRegion::new(
                    bbox,
                    media.ordinal,
                    RegionKind::Figure,
                    self.config.embedded_image_confidence,
                    media.image,
                )
            })
            .collect();

        info!("Found {} embedded pictures in {}", regions.len(), path.display());
        Detection {
            regions,
            degradation: None,
        }
    }

    /// Run every enabled strategy on one rendered page
    pub fn detect_regions_on_page(
        &self,
        page: &RenderedPage,
        page_index: usize,
    ) -> Vec<VisualRegion> {
        let rgb = page.image.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            warn!("Page {} rendered to an empty image", page_index + 1);
            return Vec::new();
        }

        let mut candidates: Vec<(BBox, RegionKind)> = Vec::new();

        if self.config.use_structural_blocks {
            candidates.extend(
                page.blocks
                    .iter()
                    .filter(|b| b.kind == BlockKind::Image)
                    .map(|b| (b.bbox, RegionKind::Figure)),
            );
        }

        let gray = image::imageops::grayscale(&rgb);
        let mask = match self.vision.binarize(&gray) {
            Ok(mask) => Some(mask),
            Err(e) => {
                warn!("Binarisation failed on page {}: {}", page_index + 1, e);
                None
            }
        };

        if let Some(mask) = &mask {
            if self.config.use_connected_components {
                candidates.extend(
                    self.component_candidates(mask)
                        .into_iter()
                        .map(|b| (b, RegionKind::Diagram)),
                );
            }
            if self.config.use_line_grid {
                match self.line_grid_candidates(mask) {
                    Ok(boxes) => {
                        candidates.extend(boxes.into_iter().map(|b| (b, RegionKind::Table)));
                    }
                    Err(e) => {
                        warn!("Table line detection failed on page {}: {}", page_index + 1, e);
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        let mut regions = Vec::new();
        for (bbox, kind) in candidates {
            if let Some(region) = self.region_from_bbox(bbox, &rgb, page_index, kind) {
                if seen.insert(region.bbox()) {
                    regions.push(region);
                }
            }
        }
        regions
    }

    /// Bounding boxes of ink components passing the area and aspect filters
    fn component_candidates(&self, mask: &image::GrayImage) -> Vec<BBox> {
        let page_area = u64::from(mask.width()) * u64::from(mask.height());
        let (min_aspect, max_aspect) = self.config.aspect_ratio_range;

        self.vision
            .connected_components(mask)
            .into_iter()
            .filter(|b| self.passes_area_filter(b, page_area))
            .filter(|b| {
                let aspect = b.width() as f32 / b.height() as f32;
                (min_aspect..=max_aspect).contains(&aspect)
            })
            .collect()
    }

    /// Boxes around ruled grids: opened horizontal and vertical line masks, unioned
    fn line_grid_candidates(&self, mask: &image::GrayImage) -> Result<Vec<BBox>, VisionError> {
        let length = self.config.line_kernel_length;
        let horizontal = self.vision.morphological_open(mask, length, 1)?;
        let vertical = self.vision.morphological_open(mask, 1, length)?;
        let grid = vision::union_masks(&horizontal, &vertical);

        let page_area = u64::from(mask.width()) * u64::from(mask.height());
        Ok(self
            .vision
            .contour_boxes(&grid)
            .into_iter()
            .filter(|b| self.passes_area_filter(b, page_area))
            .collect())
    }

    fn passes_area_filter(&self, bbox: &BBox, page_area: u64) -> bool {
        let area = bbox.area() as u64;
        if area < self.config.min_region_area {
            return false;
        }
        let max_ratio = f64::from(self.config.geometry.max_area_ratio);
        page_area > 0 && (area as f64 / page_area as f64) <= max_ratio
    }

    /// Validate a raw box against the page and crop it into a region.
    ///
    /// Returns `None` when any geometry rule rejects the box.
    pub fn region_from_bbox(
        &self,
        bbox: BBox,
        page: &RgbImage,
        page_index: usize,
        kind: RegionKind,
    ) -> Option<VisualRegion> {
        let geometry = &self.config.geometry;
        let (page_w, page_h) = page.dimensions();

        let bbox = geometry.clamp_and_validate(bbox, page_w, page_h)?;
        if geometry.reject_if_oversized(bbox, page_w, page_h) {
            return None;
        }

        let bbox = geometry.enforce_minimum_size(
            bbox,
            page_w,
            page_h,
            geometry.min_width,
            geometry.min_height,
        )?;
        // Growing can push a box past the limits on very small pages
        if geometry.reject_if_oversized(bbox, page_w, page_h) {
            return None;
        }

        let crop = DynamicImage::ImageRgb8(
            image::imageops::crop_imm(
                page,
                bbox.x0 as u32,
                bbox.y0 as u32,
                bbox.width() as u32,
                bbox.height() as u32,
            )
            .to_image(),
        );
        if geometry.is_blank(&crop) {
            return None;
        }

        let page_area = u64::from(page_w) * u64::from(page_h);
        let confidence = geometry.score_confidence(bbox.area() as u64, page_area);

        Some(VisualRegion::new(bbox, page_index, kind, confidence, crop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
    use imageproc::rect::Rect;

    fn blank_page(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([255, 255, 255]))
    }

    /// A ruled 4x3 table with cell borders 6px thick
    fn draw_table(page: &mut RgbImage, x: i32, y: i32, w: u32, h: u32) {
        let black = Rgb([0u8, 0, 0]);
        for row in 0..=3 {
            let ry = y + (h as i32 * row) / 3;
            draw_filled_rect_mut(page, Rect::at(x, ry).of_size(w, 6), black);
        }
        for col in 0..=4 {
            let cx = x + (w as i32 * col) / 4;
            draw_filled_rect_mut(page, Rect::at(cx, y).of_size(6, h + 6), black);
        }
    }

    fn detector() -> RegionDetector {
        RegionDetector::new(DetectorConfig::default(), None)
    }

    #[test]
    fn test_detector_config_default() {
        let config = DetectorConfig::default();
        assert_eq!(config.render_scale, 2.0);
        assert_eq!(config.min_region_area, 2500);
        assert_eq!(config.aspect_ratio_range, (0.2, 5.0));
        assert!((config.embedded_image_confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_region_from_bbox_rejects_full_page() {
        let mut page = blank_page(1000, 1000);
        draw_table(&mut page, 20, 20, 940, 940);
        let region =
            detector().region_from_bbox(BBox::new(0, 0, 1000, 950), &page, 0, RegionKind::Table);
        assert!(region.is_none());
    }

    #[test]
    fn test_region_from_bbox_rejects_blank_crop() {
        let page = blank_page(1000, 1000);
        let bbox = BBox::new(100, 100, 400, 300);
        let region = detector().region_from_bbox(bbox, &page, 0, RegionKind::Diagram);
        assert!(region.is_none());
    }

    #[test]
    fn test_region_from_bbox_grows_small_box() {
        let mut page = blank_page(2000, 2000);
        draw_table(&mut page, 980, 980, 60, 60);
        let region = detector()
            .region_from_bbox(BBox::from_xywh(985, 985, 50, 40), &page, 3, RegionKind::Table)
            .expect("small box with content should be grown");

        let bbox = region.bbox();
        assert!(bbox.width() >= 120 && bbox.height() >= 80);
        assert_eq!(region.page_index(), 3);
        assert_eq!(region.image().width() as i64, bbox.width());
    }

    #[test]
    fn test_detect_regions_on_page_finds_table() {
        let mut page = blank_page(1200, 1600);
        draw_table(&mut page, 200, 300, 600, 400);
        let rendered = RenderedPage::from_image(DynamicImage::ImageRgb8(page));

        let regions = detector().detect_regions_on_page(&rendered, 0);
        assert!(!regions.is_empty(), "ruled table should be detected");

        for region in &regions {
            assert!(region.bbox().fits_within(1200, 1600));
            assert!(region.confidence() >= 0.3 && region.confidence() <= 1.0);
        }
        assert!(regions
            .iter()
            .any(|r| r.bbox().x0 <= 205 && r.bbox().x1 >= 795 && r.bbox().y0 <= 305));
    }

    #[test]
    fn test_detect_regions_on_page_uses_structural_blocks() {
        let mut page = blank_page(1000, 1000);
        let frame = Rect::at(100, 100).of_size(300, 200);
        draw_hollow_rect_mut(&mut page, frame, Rgb([20, 20, 20]));
        draw_line_segment_mut(&mut page, (100.0, 300.0), (400.0, 100.0), Rgb([20, 20, 20]));
        draw_filled_rect_mut(&mut page, Rect::at(150, 200).of_size(120, 80), Rgb([60, 90, 200]));

        let rendered = RenderedPage {
            image: DynamicImage::ImageRgb8(page),
            blocks: vec![StructuralBlock {
                bbox: BBox::new(100, 100, 400, 300),
                kind: BlockKind::Image,
            }],
        };

        let config = DetectorConfig {
            use_connected_components: false,
            use_line_grid: false,
            ..Default::default()
        };
        let regions = RegionDetector::new(config, None).detect_regions_on_page(&rendered, 1);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind(), RegionKind::Figure);
        assert_eq!(regions[0].bbox(), BBox::new(100, 100, 400, 300));
    }

    #[test]
    fn test_pdf_without_renderer_is_degraded() {
        let detection =
            detector().detect(Path::new("doc.pdf"), DocumentKind::Pdf, &CancellationToken::new());
        assert!(detection.regions.is_empty());
        assert!(matches!(
            detection.degradation,
            Some(RegionError::CollaboratorUnavailable(_))
        ));
    }

    #[test]
    fn test_unsupported_document() {
        let detection = detector().detect(
            Path::new("slides.key"),
            DocumentKind::Unsupported,
            &CancellationToken::new(),
        );
        assert!(detection.regions.is_empty());
        assert!(matches!(detection.degradation, Some(RegionError::UnsupportedInput(_))));
    }
}
