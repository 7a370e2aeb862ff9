use crate::error::{DvrError, DvrResult};
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"NV12" => Some(PixelFormat::Nv12),
            _ => None,
        }
    }
}

pub(crate) fn to_frame(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> DvrResult<Frame> {
    let rgb = match format {
        PixelFormat::Rgb24 => {
            let expected = plane_len(width, height, 3)?;
            check_len("RGB", pixels, expected)?;
            pixels[..expected].to_vec()
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height)?,
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height)?,
    };
    Frame::from_rgb(width, height, rgb)
}

fn plane_len(width: u32, height: u32, bytes_per_pixel: usize) -> DvrResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(bytes_per_pixel))
        .ok_or_else(|| DvrError::Decode("frame dimensions overflow".to_string()))
}

fn check_len(label: &str, pixels: &[u8], expected: usize) -> DvrResult<()> {
    if pixels.len() < expected {
        return Err(DvrError::Decode(format!(
            "{} frame too short: expected {}, got {}",
            label,
            expected,
            pixels.len()
        )));
    }
    Ok(())
}

/// Packed 4:2:2, two pixels per `Y0 U Y1 V` quad.
fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> DvrResult<Vec<u8>> {
    if width % 2 != 0 {
        return Err(DvrError::Decode(format!("YUYV width {} is odd", width)));
    }
    let expected = plane_len(width, height, 2)?;
    check_len("YUYV", pixels, expected)?;

    let mut rgb = Vec::with_capacity(plane_len(width, height, 3)?);
    for quad in pixels[..expected].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            rgb.extend_from_slice(&yuv_to_rgb(y as f32, u, v));
        }
    }
    Ok(rgb)
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> DvrResult<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = plane_len(width, height, 1)?;
    let expected = y_plane + y_plane / 2;
    check_len("NV12", pixels, expected)?;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    [
        clamp_to_u8(y + 1.402 * v),
        clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v),
        clamp_to_u8(y + 1.772 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_is_gray() -> DvrResult<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let frame = to_frame(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(frame.as_rgb(), &[128u8; 12][..]);

        let yuyv = vec![100u8, 128, 100, 128];
        let frame = to_frame(&yuyv, 2, 1, PixelFormat::Yuyv)?;
        assert_eq!(frame.as_rgb(), &[100u8; 6][..]);
        Ok(())
    }

    #[test]
    fn short_buffers_are_decode_errors() {
        let err = to_frame(&[1u8; 5], 1, 2, PixelFormat::Rgb24).err().unwrap();
        assert!(err.is_frame_local());
        assert!(to_frame(&[0u8; 4], 3, 1, PixelFormat::Yuyv).is_err());
    }

    #[test]
    fn padded_buffers_keep_only_the_image() -> DvrResult<()> {
        let mut rgb = vec![7u8; 3 * 4 * 4];
        rgb.extend_from_slice(&[0xEE; 64]);
        let frame = to_frame(&rgb, 4, 4, PixelFormat::Rgb24)?;
        assert_eq!((frame.width(), frame.height()), (4, 4));
        assert_eq!(frame.as_rgb(), &[7u8; 48][..]);

        let nv12 = [vec![128u8; 4], vec![128u8; 2], vec![0u8; 10]].concat();
        assert_eq!(to_frame(&nv12, 2, 2, PixelFormat::Nv12)?.as_rgb(), &[128u8; 12][..]);
        Ok(())
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
