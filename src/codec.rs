//! Frame codec: raw RGB frames to JPEG bytes and back.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};

use crate::error::{DvrError, DvrResult};
use crate::frame::Frame;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Encode a frame as JPEG. Quality is clamped to 1..=100.
pub fn encode(frame: &Frame, quality: u8) -> DvrResult<Vec<u8>> {
    let mut out = Vec::with_capacity(frame.as_rgb().len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder
        .encode(
            frame.as_rgb(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| DvrError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode JPEG bytes into an RGB frame.
///
/// A `Decode` error means the bytes were delivered intact but could not be
/// parsed; callers skip the frame and keep the connection.
pub fn decode(bytes: &[u8]) -> DvrResult<Frame> {
    if bytes.is_empty() {
        return Err(DvrError::Decode("empty payload".to_string()));
    }
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|e| DvrError::Decode(e.to_string()))?;
    Ok(Frame::from_image(image.into_rgb8()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_round_trip_keeps_dimensions() {
        let mut frame = Frame::filled(64, 48, [20, 40, 60]);
        frame.fill_rect(10, 10, 20, 10, [250, 250, 250]);
        let bytes = encode(&frame, 90).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
        let px = decoded.image().get_pixel(20, 15).0;
        assert!(px.iter().all(|&c| c > 200), "bright patch survives: {:?}", px);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode(b"definitely not a jpeg").unwrap_err();
        assert!(err.is_frame_local());

        let err = decode(&[]).unwrap_err();
        assert!(matches!(err, DvrError::Decode(_)));
    }

    #[test]
    fn truncated_jpeg_is_a_decode_error() {
        let frame = Frame::filled(32, 32, [1, 2, 3]);
        let bytes = encode(&frame, 80).unwrap();
        let err = decode(&bytes[..20]).unwrap_err();
        assert!(matches!(err, DvrError::Decode(_)));
    }
}
