use std::io::Cursor;
use std::time::Duration;

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use thiserror::Error;

use crate::models::Attachment;

pub const MAX_IMAGE_DIMENSION: u32 = 1500;
pub const JPEG_QUALITY: u8 = 80;
pub const COMPRESS_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compression task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Compression timed out after {0:?}")]
    Timeout(Duration),
}

/// Target size that fits within `max` on the longer side, never upscaling.
pub fn fit_within(w: u32, h: u32, max: u32) -> (u32, u32) {
    if w <= max && h <= max {
        return (w, h);
    }
    let ratio = max as f64 / w.max(h) as f64;
    let new_w = ((w as f64) * ratio).round().max(1.0) as u32;
    let new_h = ((h as f64) * ratio).round().max(1.0) as u32;
    (new_w.min(max), new_h.min(max))
}

/// JPEG has no alpha; composite transparent pixels over white.
fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| ((c as u16 * a as u16 + 255 * (255 - a as u16)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Decode, downscale and re-encode an image attachment as JPEG.
pub fn compress_image(original: &Attachment) -> Result<Attachment, CompressError> {
    let img = ImageReader::new(Cursor::new(&original.data))
        .with_guessed_format()?
        .decode()?;

    let (w, h) = (img.width(), img.height());
    let (new_w, new_h) = fit_within(w, h, MAX_IMAGE_DIMENSION);
    let img = if (new_w, new_h) == (w, h) {
        img
    } else {
        img.resize_exact(new_w, new_h, FilterType::Lanczos3)
    };

    let rgb = flatten_on_white(&img);
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, JPEG_QUALITY).encode_image(&rgb)?;

    Ok(Attachment {
        file_name: original.file_name.clone(),
        mime_type: "image/jpeg".to_string(),
        data,
        last_modified: Utc::now(),
    })
}

/// Prepare an attachment for upload. Images are recompressed on the blocking
/// pool; any failure or timeout falls back to the untouched original.
pub async fn prepare_upload(original: Attachment) -> Attachment {
    if !original.is_image() {
        return original;
    }

    let input = original.clone();
    let task = tokio::task::spawn_blocking(move || compress_image(&input));

    let result = match tokio::time::timeout(COMPRESS_TIMEOUT, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(CompressError::Task(join_err)),
        Err(_) => Err(CompressError::Timeout(COMPRESS_TIMEOUT)),
    };

    match result {
        Ok(compressed) => {
            tracing::debug!(
                "Compressed {}: {} -> {} bytes",
                original.file_name,
                original.data.len(),
                compressed.data.len()
            );
            compressed
        }
        Err(e) => {
            tracing::warn!("Uploading {} uncompressed: {}", original.file_name, e);
            original
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbaImage};

    fn png_attachment(w: u32, h: u32) -> Attachment {
        let pixel = image::Rgba([10, 200, 30, 128]);
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, pixel));
        let mut data = Vec::new();
        img.write_to(&mut Cursor::new(&mut data), ImageFormat::Png).unwrap();
        Attachment::new("photo.png", "image/png", data)
    }

    fn decoded_size(att: &Attachment) -> (u32, u32) {
        let img = image::load_from_memory(&att.data).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(3000, 2000, 1500), (1500, 1000));
        assert_eq!(fit_within(1000, 4000, 1500), (375, 1500));
        assert_eq!(fit_within(1500, 1500, 1500), (1500, 1500));
        assert_eq!(fit_within(800, 600, 1500), (800, 600));
        assert_eq!(fit_within(3001, 1, 1500), (1500, 1));
    }

    #[test]
    fn test_fit_within_keeps_aspect_ratio() {
        for (w, h) in [(4032, 3024), (1920, 1080), (1501, 977), (2000, 3333)] {
            let (nw, nh) = fit_within(w, h, 1500);
            assert_eq!(nw.max(nh), 1500);
            let expected = w as f64 / h as f64;
            let actual = nw as f64 / nh as f64;
            // one pixel of rounding on the shorter side
            let tolerance = expected / nw.min(nh) as f64;
            assert!((expected - actual).abs() <= tolerance, "{w}x{h} -> {nw}x{nh}");
        }
    }

    #[test]
    fn test_large_image_is_downscaled_to_jpeg() {
        let out = compress_image(&png_attachment(3000, 1200)).unwrap();
        assert_eq!(out.mime_type, "image/jpeg");
        assert_eq!(out.file_name, "photo.png");
        assert_eq!(decoded_size(&out), (1500, 600));
        assert_eq!(image::guess_format(&out.data).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_small_image_keeps_dimensions() {
        let out = compress_image(&png_attachment(640, 480)).unwrap();
        assert_eq!(out.mime_type, "image/jpeg");
        assert_eq!(decoded_size(&out), (640, 480));
    }

    #[tokio::test]
    async fn test_undecodable_image_falls_back_to_original() {
        let broken = Attachment::new("x.png", "image/png", b"definitely not a png".to_vec());
        let out = prepare_upload(broken.clone()).await;
        assert_eq!(out, broken);
    }

    #[tokio::test]
    async fn test_non_image_passes_through() {
        let pdf = Attachment::new("doc.pdf", "application/pdf", b"%PDF-1.4".to_vec());
        assert_eq!(prepare_upload(pdf.clone()).await, pdf);
    }
}
