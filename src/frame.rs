//! Raw frames.
//!
//! A `Frame` is produced once per capture cycle and consumed synchronously by
//! the motion detector, the recording controller and the encoder within that
//! same cycle. It never crosses a thread boundary; what the Frame Cache holds
//! is the encoded JPEG, not the frame.

use image::{GrayImage, RgbImage};

use crate::error::{DvrError, DvrResult};

/// Raw RGB24 pixel buffer with its dimensions.
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Wrap packed RGB24 bytes. Fails when the buffer does not match the
    /// declared dimensions.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> DvrResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| DvrError::Decode("frame dimensions overflow".to_string()))?;
        if data.len() != expected {
            return Err(DvrError::Decode(format!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| DvrError::Decode("RGB buffer rejected".to_string()))?;
        Ok(Self { image })
    }

    /// Uniformly filled frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, image::Rgb(rgb)),
        }
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgb(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Luma conversion used as motion-detector input.
    pub fn to_gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    /// Fill an axis-aligned rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, rgb: [u8; 3]) {
        let x_end = x.saturating_add(w).min(self.width());
        let y_end = y.saturating_add(h).min(self.height());
        for py in y.min(y_end)..y_end {
            for px in x.min(x_end)..x_end {
                self.image.put_pixel(px, py, image::Rgb(rgb));
            }
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}
