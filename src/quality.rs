use std::fmt::Display;

use image::RgbaImage;
use logging_timer::time;
use serde::{Deserialize, Serialize, Serializer};

use crate::image_utils::gray;
use crate::types::RasterImage;

/// Stride, in pixels along each axis, of the sharpness sample.
const SHARPNESS_STRIDE: usize = 10;

/// Stride, in pixels of raster order, of the contrast sample.
const CONTRAST_STRIDE: usize = 20;

/// Limits a scan must meet before its bubbles are trusted.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityThresholds {
    pub min_width: u32,
    pub min_height: u32,
    /// Sharpness must be strictly above this.
    pub min_sharpness: f64,
    /// Contrast must be strictly above this.
    pub min_contrast: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_width: 800,
            min_height: 1000,
            min_sharpness: 10.0,
            min_contrast: 0.2,
        }
    }
}

/// The first quality check a sheet failed, in priority order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QualityFailure {
    LowResolution,
    Blurred,
    PoorContrast,
}

impl Display for QualityFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityFailure::LowResolution => write!(f, "Low resolution image"),
            QualityFailure::Blurred => write!(f, "Blurred or low quality image"),
            QualityFailure::PoorContrast => write!(f, "Poor contrast"),
        }
    }
}

impl Serialize for QualityFailure {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityVerdict {
    pub is_valid: bool,
    pub sharpness: f64,
    pub contrast: f64,
    pub width: u32,
    pub height: u32,
    pub failure: Option<QualityFailure>,
}

impl QualityVerdict {
    /// Judges already measured metrics. Resolution is checked first, so an
    /// undersized image fails whatever its sharpness and contrast.
    pub fn classify(
        width: u32,
        height: u32,
        sharpness: f64,
        contrast: f64,
        thresholds: &QualityThresholds,
    ) -> Self {
        let failure = if width < thresholds.min_width || height < thresholds.min_height {
            Some(QualityFailure::LowResolution)
        } else if sharpness <= thresholds.min_sharpness {
            Some(QualityFailure::Blurred)
        } else if contrast <= thresholds.min_contrast {
            Some(QualityFailure::PoorContrast)
        } else {
            None
        };

        Self {
            is_valid: failure.is_none(),
            sharpness,
            contrast,
            width,
            height,
            failure,
        }
    }
}

/// Coarse global sharpness: the mean squared sum of the horizontal and
/// vertical intensity steps, sampled on a sparse lattice.
pub fn sharpness(img: &RgbaImage) -> f64 {
    let (width, height) = img.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut total = 0.0f64;
    let mut count = 0u64;
    for y in (1..height - 1).step_by(SHARPNESS_STRIDE) {
        for x in (1..width - 1).step_by(SHARPNESS_STRIDE) {
            let here = gray(img.get_pixel(x, y)) as f64;
            let right = gray(img.get_pixel(x + 1, y)) as f64;
            let down = gray(img.get_pixel(x, y + 1)) as f64;
            let laplacian = (right - here).abs() + (down - here).abs();
            total += laplacian * laplacian;
            count += 1;
        }
    }

    if count > 0 {
        total / count as f64
    } else {
        0.0
    }
}

/// Spread between the lightest and darkest sampled gray levels, in [0, 1].
pub fn contrast(img: &RgbaImage) -> f64 {
    let mut min = 255.0f64;
    let mut max = 0.0f64;
    let mut sampled = false;
    for pixel in img.pixels().step_by(CONTRAST_STRIDE) {
        let level = gray(pixel) as f64;
        min = min.min(level);
        max = max.max(level);
        sampled = true;
    }

    if sampled {
        (max - min) / 255.0
    } else {
        0.0
    }
}

#[time]
pub fn assess_quality(image: &RasterImage, thresholds: &QualityThresholds) -> QualityVerdict {
    let verdict = QualityVerdict::classify(
        image.width(),
        image.height(),
        sharpness(&image.pixels),
        contrast(&image.pixels),
        thresholds,
    );
    log::debug!(
        "page {}: sharpness={:.2} contrast={:.3} {}x{} valid={}",
        image.page_number(),
        verdict.sharpness,
        verdict.contrast,
        verdict.width,
        verdict.height,
        verdict.is_valid
    );
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_utils::{BLACK_RGBA, WHITE_RGBA};
    use proptest::prelude::*;

    /// Vertical black and white stripes, 1 pixel wide: maximally sharp.
    fn striped(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| {
            if x % 2 == 0 {
                WHITE_RGBA
            } else {
                BLACK_RGBA
            }
        })
    }

    #[test]
    fn flat_image_has_no_sharpness_or_contrast() {
        let img = RgbaImage::from_pixel(100, 100, WHITE_RGBA);
        assert_eq!(sharpness(&img), 0.0);
        assert_eq!(contrast(&img), 0.0);
    }

    #[test]
    fn stripes_are_sharp_and_contrasty() {
        let img = striped(101, 101);
        // Every sample sits on an odd column: black with a white neighbour to
        // the right and black below, so each step is 255.
        assert_eq!(sharpness(&img), 255.0 * 255.0);
        assert_eq!(contrast(&img), 1.0);
    }

    #[test]
    fn low_resolution_scan_is_rejected() {
        let image = RasterImage::new(0, striped(400, 500));
        let verdict = assess_quality(&image, &QualityThresholds::default());
        assert!(!verdict.is_valid);
        assert_eq!(verdict.failure, Some(QualityFailure::LowResolution));
        assert_eq!(
            verdict.failure.map(|f| f.to_string()).as_deref(),
            Some("Low resolution image")
        );
    }

    #[test]
    fn failures_are_reported_in_priority_order() {
        let thresholds = QualityThresholds::default();
        let blurred_and_flat = QualityVerdict::classify(800, 1000, 5.0, 0.1, &thresholds);
        assert_eq!(blurred_and_flat.failure, Some(QualityFailure::Blurred));

        let flat = QualityVerdict::classify(800, 1000, 50.0, 0.2, &thresholds);
        assert_eq!(flat.failure, Some(QualityFailure::PoorContrast));

        let good = QualityVerdict::classify(800, 1000, 10.5, 0.21, &thresholds);
        assert!(good.is_valid);
        assert_eq!(good.failure, None);
    }

    #[test]
    fn sharp_high_resolution_scan_passes() {
        let image = RasterImage::new(0, striped(801, 1000));
        assert!(assess_quality(&image, &QualityThresholds::default()).is_valid);
    }

    proptest! {
        #[test]
        fn resolution_failure_short_circuits(
            width in 0u32..800,
            height in 0u32..2000,
            sharp in 0.0f64..10_000.0,
            spread in 0.0f64..1.0,
        ) {
            let verdict =
                QualityVerdict::classify(width, height, sharp, spread, &QualityThresholds::default());
            prop_assert!(!verdict.is_valid);
            prop_assert_eq!(verdict.failure, Some(QualityFailure::LowResolution));
        }
    }
}
