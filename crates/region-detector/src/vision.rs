//! Low-level vision operations used by the detection strategies
//!
//! The detector only talks to [`VisionOps`], so the concrete image-processing
//! backend can be replaced without touching detection policy.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::morphology::{grayscale_open, Mask};
use imageproc::region_labelling::{connected_components, Connectivity};
use thiserror::Error;
use visual_region_common::BBox;

/// Largest structuring element accepted by [`ImageprocVision`]
pub const MAX_KERNEL_LENGTH: u32 = 511;

/// Errors raised by vision operations
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Invalid structuring element {0}x{1} (each side must be 1..={MAX_KERNEL_LENGTH})")]
    InvalidKernel(u32, u32),

    #[error("Empty image")]
    EmptyImage,
}

/// Binarisation, component labelling and morphology primitives.
///
/// Masks use 255 for foreground (ink) and 0 for background.
pub trait VisionOps {
    /// Threshold a grayscale page so that dark ink becomes foreground
    fn binarize(&self, gray: &GrayImage) -> Result<GrayImage, VisionError>;

    /// Bounding boxes of 8-connected foreground components
    fn connected_components(&self, mask: &GrayImage) -> Vec<BBox>;

    /// Morphological opening with a `kernel_w` x `kernel_h` rectangle.
    ///
    /// The result is always a subset of `mask`.
    fn morphological_open(
        &self,
        mask: &GrayImage,
        kernel_w: u32,
        kernel_h: u32,
    ) -> Result<GrayImage, VisionError>;

    /// Bounding boxes of the outer contours of foreground shapes
    fn contour_boxes(&self, mask: &GrayImage) -> Vec<BBox>;
}

/// [`VisionOps`] backed by `imageproc`
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageprocVision;

impl VisionOps for ImageprocVision {
    fn binarize(&self, gray: &GrayImage) -> Result<GrayImage, VisionError> {
        if gray.width() == 0 || gray.height() == 0 {
            return Err(VisionError::EmptyImage);
        }

        let (min, max) = gray
            .pixels()
            .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));

        // A flat page has no ink; Otsu would split it arbitrarily
        if min == max {
            return Ok(GrayImage::new(gray.width(), gray.height()));
        }

        let level = imageproc::contrast::otsu_level(gray);
        let mut mask = GrayImage::new(gray.width(), gray.height());
        for (x, y, pixel) in gray.enumerate_pixels() {
            if pixel[0] <= level {
                mask.put_pixel(x, y, Luma([255u8]));
            }
        }
        Ok(mask)
    }

    fn connected_components(&self, mask: &GrayImage) -> Vec<BBox> {
        let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

        // Labels are dense, starting at 1 for the first foreground component
        let mut boxes: Vec<Option<BBox>> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0] as usize;
            if label == 0 {
                continue;
            }
            if boxes.len() < label {
                boxes.resize(label, None);
            }
            let (x, y) = (i64::from(x), i64::from(y));
            let slot = &mut boxes[label - 1];
            *slot = Some(match *slot {
                Some(b) => BBox::new(b.x0.min(x), b.y0.min(y), b.x1.max(x + 1), b.y1.max(y + 1)),
                None => BBox::new(x, y, x + 1, y + 1),
            });
        }

        boxes.into_iter().flatten().collect()
    }

    fn morphological_open(
        &self,
        mask: &GrayImage,
        kernel_w: u32,
        kernel_h: u32,
    ) -> Result<GrayImage, VisionError> {
        if kernel_w == 0
            || kernel_h == 0
            || kernel_w > MAX_KERNEL_LENGTH
            || kernel_h > MAX_KERNEL_LENGTH
        {
            return Err(VisionError::InvalidKernel(kernel_w, kernel_h));
        }

        // `grayscale_open` dilates with the unreflected mask, so only a
        // centred odd-sized element keeps the opening inside the input
        let (odd_w, odd_h) = (kernel_w | 1, kernel_h | 1);
        let element = GrayImage::from_pixel(odd_w, odd_h, Luma([255u8]));
        let invalid =
            |_: std::num::TryFromIntError| VisionError::InvalidKernel(kernel_w, kernel_h);
        let center_x = u8::try_from((odd_w - 1) / 2).map_err(invalid)?;
        let center_y = u8::try_from((odd_h - 1) / 2).map_err(invalid)?;
        let kernel = Mask::from_image(&element, center_x, center_y);

        Ok(grayscale_open(mask, &kernel))
    }

    fn contour_boxes(&self, mask: &GrayImage) -> Vec<BBox> {
        find_contours::<i64>(mask)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && !c.points.is_empty())
            .map(|c| {
                let min_x = c.points.iter().map(|p| p.x).min().unwrap_or(0);
                let max_x = c.points.iter().map(|p| p.x).max().unwrap_or(0);
                let min_y = c.points.iter().map(|p| p.y).min().unwrap_or(0);
                let max_y = c.points.iter().map(|p| p.y).max().unwrap_or(0);
                BBox::new(min_x, min_y, max_x + 1, max_y + 1)
            })
            .collect()
    }
}

/// Pixel-wise maximum of two equally sized masks
#[must_use]
pub fn union_masks(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let mut out = a.clone();
    for (dst, src) in out.pixels_mut().zip(b.pixels()) {
        dst[0] = dst[0].max(src[0]);
    }
    out
}
