//! Bounding-box validation and geometric scoring
//!
//! Every raw box produced by a detection strategy goes through the same chain:
//! 1. Clamp to the page and drop degenerate boxes
//! 2. Reject boxes covering too much of the page
//! 3. Grow undersized boxes around their centre, rejecting those that stay below the floor
//! 4. Reject crops that are blank whitespace
//! 5. Score the survivor by how much of the page it occupies
//!
//! Nothing here performs I/O.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use visual_region_common::BBox;

/// Thresholds for region validation and scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionGeometry {
    /// Maximum fraction of page area a region may cover
    pub max_area_ratio: f32,
    /// Maximum fraction of page width or height a region may span
    pub max_dimension_ratio: f32,
    /// Target minimum width when growing small regions (pixels)
    pub min_width: u32,
    /// Target minimum height when growing small regions (pixels)
    pub min_height: u32,
    /// Hard floor on width after growing (pixels)
    pub floor_width: u32,
    /// Hard floor on height after growing (pixels)
    pub floor_height: u32,
    /// Channel value above which a pixel counts as white
    pub white_level: u8,
    /// Crops whiter than this fraction are blank
    pub max_white_fraction: f32,
    /// Crops with lower pixel variance than this are blank
    pub min_variance: f64,
}

impl Default for RegionGeometry {
    fn default() -> Self {
        Self {
            max_area_ratio: 0.50,
            max_dimension_ratio: 0.90,
            min_width: 150,
            min_height: 100,
            floor_width: 120,
            floor_height: 80,
            white_level: 240,
            max_white_fraction: 0.95,
            min_variance: 100.0,
        }
    }
}

impl RegionGeometry {
    /// Clamp `bbox` to `[0, page_w] x [0, page_h]`.
    ///
    /// Returns `None` when the clamped box has no width or height.
    #[must_use]
    pub fn clamp_and_validate(&self, bbox: BBox, page_w: u32, page_h: u32) -> Option<BBox> {
        let (w, h) = (i64::from(page_w), i64::from(page_h));
        let clamped = BBox::new(
            bbox.x0.clamp(0, w),
            bbox.y0.clamp(0, h),
            bbox.x1.clamp(0, w),
            bbox.y1.clamp(0, h),
        );

        if clamped.is_empty() {
            None
        } else {
            Some(clamped)
        }
    }

    /// True when the box covers more than `max_area_ratio` of the page, or
    /// spans more than `max_dimension_ratio` of its width or height.
    #[must_use]
    pub fn reject_if_oversized(&self, bbox: BBox, page_w: u32, page_h: u32) -> bool {
        let page_area = u64::from(page_w) * u64::from(page_h);
        if page_area == 0 {
            return true;
        }

        let area_ratio = bbox.area() as f64 / page_area as f64;
        if area_ratio > f64::from(self.max_area_ratio) {
            tracing::debug!(
                "Rejected region covering {:.1}% of page (max {:.0}%)",
                area_ratio * 100.0,
                self.max_area_ratio * 100.0
            );
            return true;
        }

        let width_ratio = bbox.width() as f64 / f64::from(page_w);
        let height_ratio = bbox.height() as f64 / f64::from(page_h);
        let limit = f64::from(self.max_dimension_ratio);
        if width_ratio > limit || height_ratio > limit {
            tracing::debug!(
                "Rejected region {}x{} spanning {:.1}% x {:.1}% of page",
                bbox.width(),
                bbox.height(),
                width_ratio * 100.0,
                height_ratio * 100.0
            );
            return true;
        }

        false
    }

    /// Grow a box that is narrower than `min_w` or shorter than `min_h`.
    ///
    /// The deficient dimension is re-centred on the original box and clamped to
    /// the page; if the page edge prevents reaching the target, the box slides
    /// back inward. Boxes still below the hard floor are rejected.
    #[must_use]
    pub fn enforce_minimum_size(
        &self,
        bbox: BBox,
        page_w: u32,
        page_h: u32,
        min_w: u32,
        min_h: u32,
    ) -> Option<BBox> {
        let (x0, x1) = grow_span(bbox.x0, bbox.x1, i64::from(min_w), i64::from(page_w));
        let (y0, y1) = grow_span(bbox.y0, bbox.y1, i64::from(min_h), i64::from(page_h));
        let grown = BBox::new(x0, y0, x1, y1);

        if grown != bbox {
            tracing::debug!(
                "Expanded small region from {}x{} to {}x{}",
                bbox.width(),
                bbox.height(),
                grown.width(),
                grown.height()
            );
        }

        if grown.width() < i64::from(self.floor_width)
            || grown.height() < i64::from(self.floor_height)
        {
            tracing::debug!(
                "Rejected region too small: {}x{} (floor {}x{})",
                grown.width(),
                grown.height(),
                self.floor_width,
                self.floor_height
            );
            return None;
        }

        Some(grown)
    }

    /// Whether a crop is empty whitespace.
    ///
    /// Blank when more than `max_white_fraction` of pixels have every channel
    /// above `white_level`, or when the variance over all channel values is
    /// below `min_variance`.
    #[must_use]
    pub fn is_blank(&self, image: &DynamicImage) -> bool {
        let rgb = image.to_rgb8();
        let total_pixels = u64::from(rgb.width()) * u64::from(rgb.height());
        if total_pixels == 0 {
            return true;
        }

        let mut white_pixels = 0u64;
        let mut sum = 0f64;
        let mut sum_sq = 0f64;
        for pixel in rgb.pixels() {
            if pixel.0.iter().all(|&c| c > self.white_level) {
                white_pixels += 1;
            }
            for &c in &pixel.0 {
                let v = f64::from(c);
                sum += v;
                sum_sq += v * v;
            }
        }

        let n = (total_pixels * 3) as f64;
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        let white_fraction = white_pixels as f64 / total_pixels as f64;

        let blank =
            white_fraction > f64::from(self.max_white_fraction) || variance < self.min_variance;
        if blank {
            tracing::debug!(
                "Rejected blank region {}x{} (white fraction {:.2}, variance {:.1})",
                rgb.width(),
                rgb.height(),
                white_fraction,
                variance
            );
        }
        blank
    }

    /// Geometric desirability of a region, in `[0.3, 1.0]`.
    ///
    /// Piecewise linear in the covered fraction of the page: 0.3 → 0.5 below 5%,
    /// 0.5 → 1.0 between 5% and 30%, then 1.0 → 0.6 up to 50%.
    #[must_use]
    pub fn score_confidence(&self, bbox_area: u64, page_area: u64) -> f32 {
        let ratio = if page_area > 0 {
            (bbox_area as f64 / page_area as f64).min(0.50)
        } else {
            0.0
        };

        let confidence = if ratio < 0.05 {
            0.3 + (ratio / 0.05) * 0.2
        } else if ratio <= 0.30 {
            0.5 + ((ratio - 0.05) / 0.25) * 0.5
        } else {
            1.0 - ((ratio - 0.30) / 0.20) * 0.4
        };

        confidence as f32
    }
}

/// Widen `[lo, hi)` to at least `min_len` within `[0, limit]`
fn grow_span(lo: i64, hi: i64, min_len: i64, limit: i64) -> (i64, i64) {
    if hi - lo >= min_len {
        return (lo, hi);
    }

    let center = (lo + hi) / 2;
    let mut start = (center - min_len / 2).max(0);
    let end = (start + min_len).min(limit);
    if end - start < min_len {
        start = (end - min_len).max(0);
    }
    (start, end)
}
