//! Avatar transcoder
//!
//! Decodes a raw upload once and renders one WebP variant per entry of
//! [`AVATAR_SIZES`]. Rendering is CPU bound, so every size runs on the blocking
//! pool concurrently.

use crate::resize::resize_to_cover;
use bytes::Bytes;
use image::DynamicImage;
use parley_core::{AppError, AvatarSize, AVATAR_SIZES};
use std::io::Cursor;
use std::sync::Arc;

/// One encoded avatar variant, ready to upload.
#[derive(Debug, Clone)]
pub struct TranscodedVariant {
    pub size: AvatarSize,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct AvatarTranscoder {
    quality: f32,
}

impl AvatarTranscoder {
    pub fn new(quality: f32) -> Self {
        Self {
            quality: quality.clamp(1.0, 100.0),
        }
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn decode(data: &[u8]) -> Result<DynamicImage, AppError> {
        image::ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| AppError::ImageProcessing(format!("Failed to read image: {}", e)))?
            .decode()
            .map_err(|e| AppError::ImageProcessing(format!("Failed to decode image: {}", e)))
    }

    pub fn encode_webp(img: &DynamicImage, quality: f32) -> Result<Bytes, AppError> {
        let rgba_img = img.to_rgba8();
        let (width, height) = rgba_img.dimensions();
        if width == 0 || height == 0 {
            return Err(AppError::ImageProcessing(
                "Cannot encode an empty image".to_string(),
            ));
        }

        let encoder = webp::Encoder::from_rgba(&rgba_img, width, height);
        let webp_data = encoder.encode(quality);

        Ok(Bytes::copy_from_slice(&webp_data))
    }

    /// Cover-crop and encode a single size.
    pub fn render(
        img: &DynamicImage,
        size: AvatarSize,
        quality: f32,
    ) -> Result<TranscodedVariant, AppError> {
        let square = resize_to_cover(img, size.pixels());
        let data = Self::encode_webp(&square, quality)?;
        Ok(TranscodedVariant { size, data })
    }

    /// Produce every configured variant, in [`AVATAR_SIZES`] order.
    #[tracing::instrument(skip(self, data), fields(input_bytes = data.len()))]
    pub async fn transcode(&self, data: Bytes) -> Result<Vec<TranscodedVariant>, AppError> {
        let start = std::time::Instant::now();

        let img = tokio::task::spawn_blocking(move || Self::decode(&data))
            .await
            .map_err(|e| AppError::Internal(format!("Decode task failed: {}", e)))??;
        let img = Arc::new(img);

        let quality = self.quality;
        let renders = AVATAR_SIZES.iter().map(|&size| {
            let img = Arc::clone(&img);
            async move {
                tokio::task::spawn_blocking(move || Self::render(&img, size, quality))
                    .await
                    .unwrap_or_else(|e| {
                        Err(AppError::Internal(format!("Render task failed: {}", e)))
                    })
            }
        });

        let variants = futures::future::try_join_all(renders).await?;

        tracing::debug!(
            variants = variants.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Avatar transcoded"
        );

        Ok(variants)
    }
}
