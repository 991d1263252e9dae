use image::codecs::jpeg::JpegEncoder;
use image::{ImageReader, RgbImage};
use std::io::Cursor;
use std::sync::Arc;

/// A decoded camera frame with capture metadata.
///
/// Pixels sit behind an `Arc` and are never written after capture, so cloning
/// a frame is a cheap snapshot that can be handed to a background task while
/// the capture loop moves on. Overlays are drawn on [`Frame::to_rgb`] copies.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            image: Arc::new(image),
            captured_at_ms,
            seq,
        }
    }

    /// Decode a JPEG (or any format the `image` crate can sniff) into a frame.
    pub fn from_jpeg(jpeg_data: &[u8], captured_at_ms: i64, seq: u64) -> Result<Self, FrameError> {
        if jpeg_data.is_empty() {
            return Err(FrameError::Empty);
        }
        let img = ImageReader::new(Cursor::new(jpeg_data))
            .with_guessed_format()
            .map_err(|e| FrameError::Decode(e.to_string()))?
            .decode()
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        Ok(Self::new(img.to_rgb8(), captured_at_ms, seq))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Owned copy of the pixels, for drawing overlays.
    pub fn to_rgb(&self) -> RgbImage {
        self.image.as_ref().clone()
    }

    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::with_capacity(64 * 1024);
        JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
            .encode_image(self.image.as_ref())
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty image payload")]
    Empty,
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode JPEG: {0}")]
    Encode(String),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgb;

    /// Solid-colour test frame.
    pub(crate) fn solid_frame(width: u32, height: u32, seq: u64) -> Frame {
        Frame::new(
            RgbImage::from_pixel(width, height, Rgb([90, 120, 200])),
            1708300000000 + seq as i64,
            seq,
        )
    }

    #[test]
    fn jpeg_roundtrip_keeps_dimensions() {
        let frame = solid_frame(64, 48, 3);
        let jpeg = frame.to_jpeg(90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = Frame::from_jpeg(&jpeg, 1, 2).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        assert_eq!(decoded.seq, 2);
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(Frame::from_jpeg(&[], 0, 0), Err(FrameError::Empty)));
    }

    #[test]
    fn garbage_payload_is_decode_error() {
        let result = Frame::from_jpeg(&[0x00, 0x01, 0x02, 0x03], 0, 0);
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }

    #[test]
    fn clone_shares_pixels_and_copy_does_not() {
        let frame = solid_frame(8, 8, 0);
        let snapshot = frame.clone();
        assert!(std::ptr::eq(frame.image(), snapshot.image()));

        let mut copy = frame.to_rgb();
        copy.put_pixel(0, 0, Rgb([0, 0, 0]));
        assert_eq!(frame.image().get_pixel(0, 0), &Rgb([90, 120, 200]));
    }
}
