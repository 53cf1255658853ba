//! Intake checks run before a raw upload is accepted.
//!
//! Only the header is sniffed here; full decoding happens in the worker.

use image::ImageFormat;
use parley_core::AppError;

/// Formats the transcoder is built to decode.
pub const SUPPORTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

/// Guess the image format from magic bytes, if it is one we can transcode.
pub fn sniff_image_format(data: &[u8]) -> Option<ImageFormat> {
    image::guess_format(data)
        .ok()
        .filter(|format| SUPPORTED_FORMATS.contains(format))
}

pub struct AvatarValidator {
    max_upload_bytes: usize,
}

impl AvatarValidator {
    pub fn new(max_upload_bytes: usize) -> Self {
        Self { max_upload_bytes }
    }

    pub fn validate(&self, data: &[u8]) -> Result<ImageFormat, AppError> {
        if data.is_empty() {
            return Err(AppError::InvalidInput("Avatar upload is empty".to_string()));
        }

        if data.len() > self.max_upload_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Avatar is {} bytes (max: {} bytes)",
                data.len(),
                self.max_upload_bytes
            )));
        }

        sniff_image_format(data).ok_or_else(|| {
            AppError::InvalidInput(
                "Unsupported image format (expected JPEG, PNG, GIF or WebP)".to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_accepts_png() {
        let validator = AvatarValidator::new(1024 * 1024);
        assert_eq!(validator.validate(&png_bytes()).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_rejects_empty() {
        let validator = AvatarValidator::new(1024);
        assert!(matches!(
            validator.validate(&[]),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_oversized() {
        let validator = AvatarValidator::new(8);
        assert!(matches!(
            validator.validate(&png_bytes()),
            Err(AppError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_rejects_non_image() {
        let validator = AvatarValidator::new(1024);
        assert!(matches!(
            validator.validate(b"definitely not an image"),
            Err(AppError::InvalidInput(_))
        ));
        assert_eq!(sniff_image_format(b"%PDF-1.7"), None);
    }
}
