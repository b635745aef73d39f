use atelier_contracts::media::{CanonicalImage, MediaType};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::{debug, warn};

/// Re-encodes validated images to bounded, opaque JPEG.
///
/// Best effort: anything the decoder or encoder rejects passes through
/// with its sniffed media type.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    max_dimension: u32,
    jpeg_quality: u8,
}

impl Normalizer {
    pub fn new(max_dimension: u32, jpeg_quality: u8) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// `sniffed` must be the type detected from `bytes`.
    pub fn normalize(&self, bytes: &[u8], sniffed: MediaType) -> CanonicalImage {
        match self.reencode(bytes, sniffed) {
            Ok(Some(jpeg)) => CanonicalImage::from_bytes(MediaType::Jpeg, &jpeg),
            Ok(None) => CanonicalImage::from_bytes(sniffed, bytes),
            Err(err) => {
                warn!(
                    media_type = %sniffed,
                    error = %err,
                    "image normalization failed; passing original bytes through"
                );
                CanonicalImage::from_bytes(sniffed, bytes)
            }
        }
    }

    /// `Ok(None)` when the input is already a JPEG within bounds.
    fn reencode(&self, bytes: &[u8], sniffed: MediaType) -> image::ImageResult<Option<Vec<u8>>> {
        let decoded = image::load_from_memory_with_format(bytes, image_format(sniffed))?;
        let (width, height) = (decoded.width(), decoded.height());
        let oversized = width > self.max_dimension || height > self.max_dimension;
        if sniffed == MediaType::Jpeg && !oversized {
            return Ok(None);
        }

        let flattened = flatten_onto_white(&decoded);
        let bounded = if oversized {
            DynamicImage::ImageRgb8(flattened)
                .resize(self.max_dimension, self.max_dimension, FilterType::Triangle)
                .to_rgb8()
        } else {
            flattened
        };
        debug!(
            from = %sniffed,
            width,
            height,
            out_width = bounded.width(),
            out_height = bounded.height(),
            "re-encoded image"
        );

        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, self.jpeg_quality);
        encoder.encode_image(&bounded)?;
        Ok(Some(out))
    }
}

fn image_format(media_type: MediaType) -> ImageFormat {
    match media_type {
        MediaType::Jpeg => ImageFormat::Jpeg,
        MediaType::Png => ImageFormat::Png,
        MediaType::Gif => ImageFormat::Gif,
        MediaType::Webp => ImageFormat::WebP,
    }
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}
