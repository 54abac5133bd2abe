//! Resize, recompress and overlay helpers over the `image` crate.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba, codecs::jpeg::JpegEncoder, imageops::FilterType};
use tracing::debug;

use crate::{InspectorError, IResult, model::AnnotationBox};

/// Stroke colour of annotation rectangles.
pub const STROKE_COLOR: Rgba<u8> = Rgba([255, 255, 0, 255]);
/// Stroke width in pixels, centred on the rectangle edge.
pub const STROKE_WIDTH: u32 = 6;

/// JPEG bytes together with their pixel dimensions.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

fn decode(bytes: &[u8]) -> IResult<DynamicImage> {
    image::load_from_memory(bytes)
        .map_err(|e| InspectorError::ImageError(format!("Failed to decode image: {}", e)))
}

pub fn dimensions(bytes: &[u8]) -> IResult<(u32, u32)> {
    let img = decode(bytes)?;
    Ok((img.width(), img.height()))
}

/// Best guess of the MIME type of stored bytes.
pub fn content_type(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::Bmp) => "image/bmp",
        Ok(ImageFormat::Tiff) => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Fits the image inside `max_width` x `max_height` without upscaling and
/// re-encodes it as JPEG.
pub fn resize(bytes: &[u8], max_width: u32, max_height: u32, quality: u8) -> IResult<EncodedImage> {
    let img = decode(bytes)?;

    let img = if img.width() > max_width || img.height() > max_height {
        debug!(
            "Resizing image from {}x{} to fit {}x{}",
            img.width(),
            img.height(),
            max_width,
            max_height
        );
        img.resize(max_width, max_height, FilterType::Lanczos3)
    } else {
        img
    };

    let rgb_img = img.to_rgb8();
    let mut jpeg_data = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_data, quality);
        encoder
            .encode(
                rgb_img.as_raw(),
                rgb_img.width(),
                rgb_img.height(),
                image::ColorType::Rgb8.into(),
            )
            .map_err(|e| InspectorError::ImageError(format!("Failed to encode JPEG: {}", e)))?;
    }

    Ok(EncodedImage {
        bytes: jpeg_data,
        width: rgb_img.width(),
        height: rgb_img.height(),
    })
}

/// Draws every box as an unfilled rectangle and returns PNG bytes of the same
/// dimensions as the input.
pub fn overlay(bytes: &[u8], boxes: &[AnnotationBox]) -> IResult<Vec<u8>> {
    let mut canvas = decode(bytes)?.to_rgba8();
    let (width, height) = canvas.dimensions();
    let half = STROKE_WIDTH as f64 / 2.0;

    for annotation in boxes {
        let (x1, y1, x2, y2) = annotation.rect();

        let left = (x1 - half).floor().max(0.0) as u32;
        let top = (y1 - half).floor().max(0.0) as u32;
        let right = ((x2 + half).ceil().max(0.0) as u32).min(width);
        let bottom = ((y2 + half).ceil().max(0.0) as u32).min(height);

        for py in top..bottom {
            for px in left..right {
                let (fx, fy) = (px as f64, py as f64);
                let in_outer =
                    fx >= x1 - half && fx < x2 + half && fy >= y1 - half && fy < y2 + half;
                let in_inner =
                    fx >= x1 + half && fx < x2 - half && fy >= y1 + half && fy < y2 - half;
                if in_outer && !in_inner {
                    canvas.put_pixel(px, py, STROKE_COLOR);
                }
            }
        }
    }

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| InspectorError::ImageError(format!("Failed to encode PNG: {}", e)))?;
    Ok(png)
}

/// [`resize`] on the blocking pool.
pub async fn resize_async(
    bytes: Vec<u8>,
    max_width: u32,
    max_height: u32,
    quality: u8,
) -> IResult<EncodedImage> {
    tokio::task::spawn_blocking(move || resize(&bytes, max_width, max_height, quality))
        .await
        .map_err(|e| InspectorError::ImageError(format!("Resize task failed: {}", e)))?
}

/// [`overlay`] on the blocking pool.
pub async fn overlay_async(bytes: Vec<u8>, boxes: Vec<AnnotationBox>) -> IResult<Vec<u8>> {
    tokio::task::spawn_blocking(move || overlay(&bytes, &boxes))
        .await
        .map_err(|e| InspectorError::ImageError(format!("Overlay task failed: {}", e)))?
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::RgbImage;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([40, 80, 120])));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn resize_shrinks_large_images() {
        let encoded = resize(&png_bytes(2400, 1200), 1200, 1200, 85).unwrap();
        assert_eq!((encoded.width, encoded.height), (1200, 600));
        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(dimensions(&encoded.bytes).unwrap(), (1200, 600));
    }

    #[test]
    fn resize_never_upscales() {
        let encoded = resize(&png_bytes(300, 200), 1200, 1200, 85).unwrap();
        assert_eq!((encoded.width, encoded.height), (300, 200));
    }

    #[test]
    fn resize_fits_tall_images() {
        let encoded = resize(&png_bytes(500, 3000), 1200, 1200, 85).unwrap();
        assert_eq!(encoded.height, 1200);
        assert_eq!(encoded.width, 200);
    }

    #[test]
    fn resize_rejects_garbage() {
        let err = resize(b"not an image", 1200, 1200, 85).unwrap_err();
        assert!(err.to_string().contains("Failed to decode"));
    }

    #[test]
    fn overlay_draws_stroke_and_keeps_size() {
        let boxes = vec![AnnotationBox::new("b1", [10.0, 10.0, 50.0, 50.0])];
        let annotated = overlay(&png_bytes(100, 100), &boxes).unwrap();
        assert_eq!(content_type(&annotated), "image/png");

        let decoded = image::load_from_memory(&annotated).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (100, 100));

        // edges
        assert_eq!(*decoded.get_pixel(10, 10), STROKE_COLOR);
        assert_eq!(*decoded.get_pixel(50, 30), STROKE_COLOR);
        assert_eq!(*decoded.get_pixel(30, 8), STROKE_COLOR);
        // interior and outside stay untouched
        assert_ne!(*decoded.get_pixel(30, 30), STROKE_COLOR);
        assert_ne!(*decoded.get_pixel(2, 2), STROKE_COLOR);
        assert_ne!(*decoded.get_pixel(80, 80), STROKE_COLOR);
    }

    #[test]
    fn overlay_clips_boxes_past_the_edge() {
        let boxes = vec![AnnotationBox::new("b1", [-20.0, -20.0, 500.0, 500.0])];
        let annotated = overlay(&png_bytes(60, 40), &boxes).unwrap();
        assert_eq!(dimensions(&annotated).unwrap(), (60, 40));
    }

    #[test]
    fn content_type_sniffing() {
        assert_eq!(content_type(&png_bytes(4, 4)), "image/png");
        assert_eq!(content_type(b"plain text"), "application/octet-stream");
    }
}
