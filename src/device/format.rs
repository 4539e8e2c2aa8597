use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::types::DeviceFormat;
use crate::frame::PixelFormat;

/// Pixel encoding every mode-specific format is filtered to
pub const PREFERRED_PIXEL_FORMAT: PixelFormat = PixelFormat::Yuv420VideoRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    /// Still photos
    FourByThree,
    /// Movies
    SixteenByNine,
}

impl AspectRatio {
    fn terms(&self) -> (u64, u64) {
        match self {
            AspectRatio::FourByThree => (4, 3),
            AspectRatio::SixteenByNine => (16, 9),
        }
    }

    /// Exact match in either sensor orientation
    pub fn matches(&self, width: u32, height: u32) -> bool {
        let (a, b) = self.terms();
        let (w, h) = (width as u64, height as u64);
        w * b == h * a || h * b == w * a
    }
}

/// Widest field of view first, then largest pixel count
fn compare_quality(a: &DeviceFormat, b: &DeviceFormat) -> Ordering {
    a.field_of_view
        .total_cmp(&b.field_of_view)
        .then_with(|| a.pixel_count().cmp(&b.pixel_count()))
}

/// Pick the best-quality format for `aspect` in [`PREFERRED_PIXEL_FORMAT`].
pub fn select_best_format(formats: &[DeviceFormat], aspect: AspectRatio) -> Option<DeviceFormat> {
    formats
        .iter()
        .filter(|f| f.pixel_format == PREFERRED_PIXEL_FORMAT)
        .filter(|f| aspect.matches(f.width, f.height))
        .max_by(|a, b| compare_quality(a, b))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(width: u32, height: u32, pixel_format: PixelFormat, fov: f64) -> DeviceFormat {
        DeviceFormat::new(width, height, pixel_format, fov, 10.0)
    }

    #[test]
    fn test_aspect_ratio_matching() {
        assert!(AspectRatio::FourByThree.matches(4032, 3024));
        assert!(AspectRatio::FourByThree.matches(3024, 4032));
        assert!(!AspectRatio::FourByThree.matches(1920, 1080));
        assert!(AspectRatio::SixteenByNine.matches(1920, 1080));
        assert!(!AspectRatio::SixteenByNine.matches(640, 480));
    }

    #[test]
    fn test_field_of_view_beats_resolution() {
        let formats = vec![
            format(4032, 3024, PixelFormat::Yuv420VideoRange, 60.0),
            format(1920, 1440, PixelFormat::Yuv420VideoRange, 70.0),
            format(3840, 2160, PixelFormat::Yuv420VideoRange, 80.0),
        ];
        let best = select_best_format(&formats, AspectRatio::FourByThree).unwrap();
        assert_eq!((best.width, best.height), (1920, 1440));
    }

    #[test]
    fn test_resolution_breaks_fov_ties() {
        let formats = vec![
            format(640, 480, PixelFormat::Yuv420VideoRange, 70.0),
            format(4032, 3024, PixelFormat::Yuv420VideoRange, 70.0),
            format(1920, 1440, PixelFormat::Yuv420VideoRange, 70.0),
        ];
        let best = select_best_format(&formats, AspectRatio::FourByThree).unwrap();
        assert_eq!(best.width, 4032);
    }

    #[test]
    fn test_other_pixel_formats_ignored() {
        let formats = vec![
            format(4032, 3024, PixelFormat::Yuv420FullRange, 90.0),
            format(1280, 720, PixelFormat::Yuv420VideoRange, 50.0),
        ];
        assert!(select_best_format(&formats, AspectRatio::FourByThree).is_none());
        let movie = select_best_format(&formats, AspectRatio::SixteenByNine).unwrap();
        assert_eq!(movie.width, 1280);
    }
}
