use image::{imageops::FilterType, DynamicImage, GenericImageView};

/// Select appropriate filter type based on resize ratio
pub fn select_filter(orig_width: u32, orig_height: u32, new_width: u32, new_height: u32) -> FilterType {
    let width_ratio = orig_width as f32 / new_width as f32;
    let height_ratio = orig_height as f32 / new_height as f32;
    let max_ratio = width_ratio.max(height_ratio);

    if max_ratio > 2.0 {
        FilterType::Triangle
    } else if max_ratio > 1.5 {
        FilterType::CatmullRom
    } else {
        FilterType::Lanczos3
    }
}

/// Largest centered square of a `width` x `height` image, as `(x, y, side)`.
pub fn center_square(width: u32, height: u32) -> (u32, u32, u32) {
    let side = width.min(height);
    ((width - side) / 2, (height - side) / 2, side)
}

/// Crop the centered square first, then scale it to `edge` x `edge`.
///
/// Cropping before scaling keeps every intermediate buffer bounded by the source
/// and the target, whatever the aspect ratio.
pub fn resize_to_cover(img: &DynamicImage, edge: u32) -> DynamicImage {
    let (orig_width, orig_height) = img.dimensions();
    let (x, y, side) = center_square(orig_width, orig_height);

    let square = if side == orig_width && side == orig_height {
        img.clone()
    } else {
        img.crop_imm(x, y, side, side)
    };

    if side == edge {
        return square;
    }

    let filter = select_filter(side, side, edge, edge);
    square.resize_exact(edge, edge, filter)
}
