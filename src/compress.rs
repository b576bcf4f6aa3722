//! Decode/re-encode of fetched images.
//!
//! Color-mode policy: the decoded color type is kept whenever the output
//! encoder accepts it. JPEG output only takes 8-bit luma or RGB, so 16-bit
//! and float buffers are narrowed to 8 bits (luma stays luma) and any alpha
//! channel is dropped. PNG output keeps every mode the PNG decoder produces.
//! GIF and WebP inputs pass through byte-for-byte unless they must be
//! downscaled, in which case they are written back as RGBA in the same format.

use crate::{config::Config, types::ImagePayload};
use image::{
    ColorType, DynamicImage, ImageFormat, ImageReader, Limits,
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType as PngFilter, PngEncoder},
    },
    imageops::FilterType,
};
use std::borrow::Cow;
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("unsupported image format: {format}")]
    UnsupportedFormat { format: String },

    #[error("decode failed: {detail}")]
    DecodeFailed { detail: String },

    #[error("encode failed: {detail}")]
    EncodeFailed { detail: String },
}

pub trait Compressor: Send + Sync {
    fn compress(&self, payload: &ImagePayload) -> Result<ImagePayload, CompressError>;
}

#[derive(Debug, Clone)]
pub struct ImageCompressor {
    quality: u8,
    max_dimension: Option<u32>,
    max_decoded_bytes: u64,
    max_input_dimension: u32,
}

impl ImageCompressor {
    pub fn new(cfg: &Config) -> Self {
        Self {
            quality: cfg.compress.quality.clamp(1, 100),
            max_dimension: cfg.compress.max_dimension(),
            max_decoded_bytes: cfg.compress.max_decoded_bytes,
            max_input_dimension: cfg.compress.max_input_dimension,
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    fn decode(&self, bytes: &[u8], format: ImageFormat) -> Result<DynamicImage, CompressError> {
        let mut limits = Limits::default();
        if self.max_decoded_bytes > 0 {
            limits.max_alloc = Some(self.max_decoded_bytes);
        }
        if self.max_input_dimension > 0 {
            limits.max_image_width = Some(self.max_input_dimension);
            limits.max_image_height = Some(self.max_input_dimension);
        }

        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        reader.limits(limits);
        reader.decode().map_err(|e| CompressError::DecodeFailed {
            detail: e.to_string(),
        })
    }

    fn needs_downscale(&self, img: &DynamicImage) -> Option<u32> {
        self.max_dimension
            .filter(|&max| img.width() > max || img.height() > max)
    }

    /// Maps quality onto PNG's 0-9 compression level, then onto the encoder presets.
    fn png_compression(&self) -> CompressionType {
        match self.quality / 10 {
            0..=3 => CompressionType::Fast,
            4..=6 => CompressionType::Default,
            _ => CompressionType::Best,
        }
    }

    fn encode(&self, img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, CompressError> {
        let mut out = Vec::new();
        let res = match format {
            ImageFormat::Jpeg => {
                let img = normalize_for_jpeg(img);
                img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.quality))
            }
            ImageFormat::Png => img.write_with_encoder(PngEncoder::new_with_quality(
                &mut out,
                self.png_compression(),
                PngFilter::Adaptive,
            )),
            _ => {
                let mut cursor = Cursor::new(&mut out);
                DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut cursor, format)
            }
        };
        res.map_err(|e| CompressError::EncodeFailed {
            detail: e.to_string(),
        })?;
        Ok(out)
    }
}

impl Compressor for ImageCompressor {
    fn compress(&self, payload: &ImagePayload) -> Result<ImagePayload, CompressError> {
        let format = image::guess_format(&payload.bytes).map_err(|_| CompressError::DecodeFailed {
            detail: format!("unrecognized image data ({})", payload.content_type),
        })?;
        if !matches!(
            format,
            ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP
        ) {
            return Err(CompressError::UnsupportedFormat {
                format: format!("{format:?}"),
            });
        }

        let mut img = self.decode(&payload.bytes, format)?;

        let downscale = self.needs_downscale(&img);
        if let Some(max) = downscale {
            img = img.resize(max, max, FilterType::Lanczos3);
        }

        let passthrough =
            matches!(format, ImageFormat::Gif | ImageFormat::WebP) && downscale.is_none();
        let bytes = if passthrough {
            payload.bytes.clone()
        } else {
            self.encode(&img, format)?.into()
        };

        Ok(ImagePayload::new(bytes, mime_for(format)))
    }
}

fn normalize_for_jpeg(img: &DynamicImage) -> Cow<'_, DynamicImage> {
    match img.color() {
        ColorType::L8 | ColorType::Rgb8 => Cow::Borrowed(img),
        ColorType::L16 | ColorType::La8 | ColorType::La16 => {
            Cow::Owned(DynamicImage::ImageLuma8(img.to_luma8()))
        }
        _ => Cow::Owned(DynamicImage::ImageRgb8(img.to_rgb8())),
    }
}

fn mime_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        _ => "application/octet-stream",
    }
}
