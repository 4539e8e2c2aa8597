use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Metadata attached to captured frames and photos (EXIF-like attachments).
pub type CaptureMetadata = serde_json::Map<String, serde_json::Value>;

/// Pixel encodings a device format or frame buffer may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Bi-planar 4:2:0 YCbCr, video range (luma 16..235, chroma 16..240), `420v`
    Yuv420VideoRange,
    /// Bi-planar 4:2:0 YCbCr, full range, `420f`
    Yuv420FullRange,
    /// Packed 32-bit BGRA
    Bgra32,
    /// Packed 24-bit RGB
    Rgb24,
}

impl PixelFormat {
    /// Four character code as reported by capture hardware
    pub fn fourcc(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420VideoRange => "420v",
            PixelFormat::Yuv420FullRange => "420f",
            PixelFormat::Bgra32 => "BGRA",
            PixelFormat::Rgb24 => "RGB3",
        }
    }

    /// Bytes needed for a `width` x `height` buffer in this format
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Yuv420VideoRange | PixelFormat::Yuv420FullRange => {
                let chroma = w.div_ceil(2) * h.div_ceil(2) * 2;
                w * h + chroma
            }
            PixelFormat::Bgra32 => w * h * 4,
            PixelFormat::Rgb24 => w * h * 3,
        }
    }

    pub fn is_biplanar(&self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv420VideoRange | PixelFormat::Yuv420FullRange
        )
    }
}

/// One raw video frame delivered by the capture hardware
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Monotonic frame identifier
    pub id: u64,
    /// Presentation timestamp
    pub timestamp: SystemTime,
    /// Pixel data (shared ownership so observers can keep frames cheaply)
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Attachments propagated from the hardware
    pub attachments: CaptureMetadata,
}

impl FrameBuffer {
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
            attachments: CaptureMetadata::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: CaptureMetadata) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn expected_size(&self) -> usize {
        self.format.buffer_size(self.width, self.height)
    }

    /// Whether the buffer holds enough bytes for its declared geometry
    pub fn validate_size(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() >= self.expected_size()
    }
}

/// Interleaved audio samples delivered by the audio data output
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub timestamp: SystemTime,
    pub sample_rate: f64,
    pub channels: u16,
    pub samples: Arc<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(timestamp: SystemTime, sample_rate: f64, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            timestamp,
            sample_rate,
            channels,
            samples: Arc::new(samples),
        }
    }

    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Encoded still photo returned by the photo output
#[derive(Debug, Clone)]
pub struct Photo {
    /// Encoded image bytes (JPEG/HEIF/PNG as produced by the hardware)
    pub data: Vec<u8>,
    pub metadata: CaptureMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_biplanar_buffer_size_rounds_chroma_up() {
        assert_eq!(PixelFormat::Yuv420VideoRange.buffer_size(4, 2), 8 + 4);
        assert_eq!(PixelFormat::Yuv420FullRange.buffer_size(3, 3), 9 + 8);
        assert_eq!(PixelFormat::Bgra32.buffer_size(2, 2), 16);
        assert_eq!(PixelFormat::Rgb24.buffer_size(2, 2), 12);
    }

    #[test]
    fn test_frame_size_validation() {
        let frame = FrameBuffer::new(
            0,
            SystemTime::now(),
            vec![0u8; 12],
            4,
            2,
            PixelFormat::Yuv420VideoRange,
        );
        assert!(frame.validate_size());

        let short = FrameBuffer::new(
            1,
            SystemTime::now(),
            vec![0u8; 11],
            4,
            2,
            PixelFormat::Yuv420VideoRange,
        );
        assert!(!short.validate_size());
    }

    #[test]
    fn test_audio_frame_count() {
        let buffer = AudioBuffer::new(SystemTime::now(), 48_000.0, 2, vec![0.0; 960]);
        assert_eq!(buffer.frame_count(), 480);
    }
}
