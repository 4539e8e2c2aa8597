//! Frame and photo conversion.
//!
//! Pure functions turning raw frame buffers or encoded photo bytes into a
//! [`CapturedImage`]: decode, scale down to a size limit, tag orientation.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{CameraError, Result};
use crate::frame::{FrameBuffer, PixelFormat};
use crate::orientation::ImageOrientation;

/// Upper bound for captured image dimensions.
///
/// `0` on an axis leaves that axis unconstrained; `0 x 0` is limitless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SizeLimit {
    pub width: u32,
    pub height: u32,
}

impl SizeLimit {
    pub const UNLIMITED: SizeLimit = SizeLimit {
        width: 0,
        height: 0,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_unlimited(&self) -> bool {
        self.width == 0 && self.height == 0
    }

    /// Scale factor to fit `width` x `height` inside the limit, never above 1.
    pub fn scale_for(&self, width: u32, height: u32) -> f64 {
        if self.is_unlimited() || width == 0 || height == 0 {
            return 1.0;
        }
        let axis = |limit: u32, size: u32| {
            if limit == 0 {
                f64::INFINITY
            } else {
                limit as f64 / size as f64
            }
        };
        axis(self.width, width).min(axis(self.height, height)).min(1.0)
    }
}

/// An image as stored plus the orientation needed to display it upright
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub image: DynamicImage,
    pub orientation: ImageOrientation,
}

impl CapturedImage {
    pub fn new(image: DynamicImage, orientation: ImageOrientation) -> Self {
        Self { image, orientation }
    }

    /// Stored pixel dimensions
    pub fn size(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    /// Dimensions once displayed upright
    pub fn display_size(&self) -> (u32, u32) {
        let (w, h) = self.size();
        if self.orientation.is_transposed() {
            (h, w)
        } else {
            (w, h)
        }
    }

    /// Same pixels, mirrored on display
    pub fn mirrored(self) -> Self {
        Self {
            orientation: self.orientation.mirrored(),
            ..self
        }
    }

    /// Pixels transformed for upright display
    pub fn upright(&self) -> DynamicImage {
        let image = &self.image;
        match self.orientation {
            ImageOrientation::Up => image.clone(),
            ImageOrientation::Down => image.rotate180(),
            ImageOrientation::Left => image.rotate270(),
            ImageOrientation::Right => image.rotate90(),
            ImageOrientation::UpMirrored => image.fliph(),
            ImageOrientation::DownMirrored => image.flipv(),
            ImageOrientation::LeftMirrored => image.rotate90().fliph(),
            ImageOrientation::RightMirrored => image.rotate270().fliph(),
        }
    }

    /// Write the upright image; the format follows the file extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.upright().save(path.as_ref())?;
        Ok(())
    }

    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(self.upright().to_rgb8())
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
        Ok(bytes)
    }
}

/// Turns captured data into images
pub trait FrameConverter: Send + Sync {
    /// Convert one raw frame, `None` when the buffer cannot be read.
    fn convert(
        &self,
        frame: &FrameBuffer,
        orientation: ImageOrientation,
        limit: SizeLimit,
    ) -> Option<CapturedImage>;

    /// Decode encoded photo bytes, `None` on decode failure.
    fn decode_photo(
        &self,
        data: &[u8],
        orientation: ImageOrientation,
        limit: SizeLimit,
    ) -> Option<CapturedImage>;
}

/// Default converter backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageConverter;

impl FrameConverter for ImageConverter {
    fn convert(
        &self,
        frame: &FrameBuffer,
        orientation: ImageOrientation,
        limit: SizeLimit,
    ) -> Option<CapturedImage> {
        match frame_to_rgb(frame) {
            Ok(rgb) => Some(CapturedImage::new(
                apply_limit(DynamicImage::ImageRgb8(rgb), limit),
                orientation,
            )),
            Err(e) => {
                warn!("Frame {} conversion failed: {}", frame.id, e);
                None
            }
        }
    }

    fn decode_photo(
        &self,
        data: &[u8],
        orientation: ImageOrientation,
        limit: SizeLimit,
    ) -> Option<CapturedImage> {
        match image::load_from_memory(data) {
            Ok(image) => Some(CapturedImage::new(apply_limit(image, limit), orientation)),
            Err(e) => {
                warn!("Photo decode failed: {}", e);
                None
            }
        }
    }
}

/// Scale `image` down to fit `limit`, preserving aspect ratio.
pub fn apply_limit(image: DynamicImage, limit: SizeLimit) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let scale = limit.scale_for(width, height);
    if scale >= 1.0 {
        return image;
    }
    let target_width = ((width as f64 * scale).round() as u32).max(1);
    let target_height = ((height as f64 * scale).round() as u32).max(1);
    debug!(
        "Scaling {}x{} to {}x{}",
        width, height, target_width, target_height
    );
    image.resize_exact(target_width, target_height, FilterType::Triangle)
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// BT.601 YCbCr to RGB
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8, video_range: bool) -> [u8; 3] {
    let (y, cb, cr) = (y as f32, cb as f32 - 128.0, cr as f32 - 128.0);
    if video_range {
        let y = 1.164 * (y - 16.0);
        [
            clamp_u8(y + 1.596 * cr),
            clamp_u8(y - 0.392 * cb - 0.813 * cr),
            clamp_u8(y + 2.017 * cb),
        ]
    } else {
        [
            clamp_u8(y + 1.402 * cr),
            clamp_u8(y - 0.344_136 * cb - 0.714_136 * cr),
            clamp_u8(y + 1.772 * cb),
        ]
    }
}

/// Decode a raw frame into packed RGB
pub fn frame_to_rgb(frame: &FrameBuffer) -> Result<RgbImage> {
    if !frame.validate_size() {
        return Err(CameraError::system(format!(
            "Frame {} holds {} bytes, expected {} for {}x{} {}",
            frame.id,
            frame.data.len(),
            frame.expected_size(),
            frame.width,
            frame.height,
            frame.format.fourcc()
        )));
    }

    let (width, height) = (frame.width, frame.height);
    let data = frame.data.as_slice();
    let mut pixels = Vec::with_capacity((width * height * 3) as usize);

    match frame.format {
        PixelFormat::Yuv420VideoRange | PixelFormat::Yuv420FullRange => {
            let video_range = frame.format == PixelFormat::Yuv420VideoRange;
            let luma_len = (width * height) as usize;
            let chroma_stride = width.div_ceil(2) as usize * 2;
            let (luma, chroma) = data.split_at(luma_len);
            for row in 0..height as usize {
                for col in 0..width as usize {
                    let y = luma[row * width as usize + col];
                    let c = (row / 2) * chroma_stride + (col / 2) * 2;
                    pixels.extend_from_slice(&ycbcr_to_rgb(y, chroma[c], chroma[c + 1], video_range));
                }
            }
        }
        PixelFormat::Bgra32 => {
            for bgra in data.chunks_exact(4).take((width * height) as usize) {
                pixels.extend_from_slice(&[bgra[2], bgra[1], bgra[0]]);
            }
        }
        PixelFormat::Rgb24 => {
            pixels.extend_from_slice(&data[..(width * height * 3) as usize]);
        }
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| CameraError::system(format!("Frame {} has inconsistent geometry", frame.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn nv12(width: u32, height: u32, luma: u8, format: PixelFormat) -> FrameBuffer {
        let mut data = vec![128u8; format.buffer_size(width, height)];
        data[..(width * height) as usize].fill(luma);
        FrameBuffer::new(7, SystemTime::now(), data, width, height, format)
    }

    #[test]
    fn test_video_range_nv12_maps_black_and_white() {
        let black = frame_to_rgb(&nv12(4, 2, 16, PixelFormat::Yuv420VideoRange)).unwrap();
        assert_eq!(black.get_pixel(0, 0).0, [0, 0, 0]);

        let white = frame_to_rgb(&nv12(4, 2, 235, PixelFormat::Yuv420VideoRange)).unwrap();
        assert_eq!(white.get_pixel(3, 1).0, [255, 255, 255]);
    }

    #[test]
    fn test_full_range_nv12_keeps_luma() {
        let gray = frame_to_rgb(&nv12(3, 3, 100, PixelFormat::Yuv420FullRange)).unwrap();
        assert_eq!(gray.dimensions(), (3, 3));
        assert_eq!(gray.get_pixel(2, 2).0, [100, 100, 100]);
    }

    #[test]
    fn test_bgra_channels_swapped() {
        let frame = FrameBuffer::new(
            0,
            SystemTime::now(),
            vec![10, 20, 30, 255],
            1,
            1,
            PixelFormat::Bgra32,
        );
        assert_eq!(frame_to_rgb(&frame).unwrap().get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let frame = FrameBuffer::new(0, SystemTime::now(), vec![0; 5], 4, 2, PixelFormat::Rgb24);
        assert!(frame_to_rgb(&frame).is_err());
        assert!(ImageConverter
            .convert(&frame, ImageOrientation::Up, SizeLimit::UNLIMITED)
            .is_none());
    }

    #[test]
    fn test_limit_preserves_aspect_and_never_upscales() {
        let limit = SizeLimit::new(32, 32);
        assert_eq!(limit.scale_for(64, 48), 0.5);
        assert_eq!(limit.scale_for(16, 8), 1.0);
        assert_eq!(SizeLimit::new(0, 24).scale_for(64, 48), 0.5);
        assert_eq!(SizeLimit::UNLIMITED.scale_for(4000, 3000), 1.0);

        let image = ImageConverter
            .convert(
                &nv12(64, 48, 128, PixelFormat::Yuv420VideoRange),
                ImageOrientation::Up,
                limit,
            )
            .unwrap();
        assert_eq!(image.size(), (32, 24));
    }

    #[test]
    fn test_upright_applies_orientation() {
        let image = CapturedImage::new(DynamicImage::new_rgb8(4, 2), ImageOrientation::Right);
        assert_eq!(image.display_size(), (2, 4));
        let upright = image.upright();
        assert_eq!((upright.width(), upright.height()), (2, 4));

        let mirrored = image.mirrored();
        assert_eq!(mirrored.orientation, ImageOrientation::LeftMirrored);
        assert_eq!(mirrored.display_size(), (2, 4));
    }

    #[test]
    fn test_decode_photo_round_trips_jpeg() {
        let source = CapturedImage::new(DynamicImage::new_rgb8(20, 10), ImageOrientation::Up);
        let jpeg = source.encode_jpeg().unwrap();
        let decoded = ImageConverter
            .decode_photo(&jpeg, ImageOrientation::Up, SizeLimit::new(10, 10))
            .unwrap();
        assert_eq!(decoded.size(), (10, 5));
        assert!(ImageConverter
            .decode_photo(b"not a photo", ImageOrientation::Up, SizeLimit::UNLIMITED)
            .is_none());
    }
}
