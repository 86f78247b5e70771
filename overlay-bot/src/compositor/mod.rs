//! Product-on-template compositing.
//!
//! A composite is built in four steps: key out the product background,
//! scale the product to fit the requested box (never upscaling), center it
//! over the template, and flatten everything onto white before encoding
//! as JPEG. All of it is synchronous CPU work; callers run it on
//! `spawn_blocking`.

mod background;

pub use background::{BackgroundRemover, BorderKeyRemover};

use crate::session::Dimensions;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use overlay_common::ImageConfig;
use std::io::{BufRead, Cursor, Seek};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Compositing error.
#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Background removal failed: {0}")]
    Background(String),
}

/// Basic facts about a validated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

/// One unit of compositing work.
#[derive(Debug, Clone)]
pub struct CompositeJob<'a> {
    /// Product image on disk.
    pub product: PathBuf,
    /// Encoded template image.
    pub template: &'a [u8],
    /// Box the product must fit into.
    pub dimensions: Dimensions,
    /// Position in the batch, for logging.
    pub index: usize,
}

/// Image checks and compositing.
pub trait Compositor: Send + Sync {
    /// Check that the file is a fully decodable image of a supported format.
    fn validate(&self, path: &Path) -> Result<ImageInfo, CompositeError>;

    /// Same as [`Compositor::validate`] for in-memory data.
    fn validate_bytes(&self, data: &[u8]) -> Result<ImageInfo, CompositeError>;

    /// Produce the final JPEG for one product. Never mutates its inputs.
    fn composite(&self, job: &CompositeJob<'_>) -> Result<Vec<u8>, CompositeError>;
}

/// Compositor built on the `image` crate.
pub struct ImageCompositor {
    quality: u8,
    config: ImageConfig,
    remover: Box<dyn BackgroundRemover>,
}

impl ImageCompositor {
    pub fn new(config: &ImageConfig) -> Self {
        Self::with_remover(
            config,
            Box::new(BorderKeyRemover::new(config.background_tolerance)),
        )
    }

    pub fn with_remover(config: &ImageConfig, remover: Box<dyn BackgroundRemover>) -> Self {
        Self {
            quality: config.output_quality.clamp(1, 100),
            config: config.clone(),
            remover,
        }
    }

    fn is_supported(&self, format: ImageFormat) -> bool {
        format
            .extensions_str()
            .iter()
            .any(|ext| self.config.is_supported_format(ext))
    }

    fn decode<R: BufRead + Seek>(
        &self,
        reader: ImageReader<R>,
    ) -> Result<(ImageFormat, DynamicImage), CompositeError> {
        let reader = reader.with_guessed_format()?;
        let format = reader
            .format()
            .ok_or_else(|| CompositeError::UnsupportedFormat("unknown".into()))?;
        if !self.is_supported(format) {
            return Err(CompositeError::UnsupportedFormat(format_name(format)));
        }
        let image = reader
            .decode()
            .map_err(|e| CompositeError::Decode(e.to_string()))?;
        Ok((format, image))
    }

    fn open(&self, path: &Path) -> Result<(ImageFormat, DynamicImage), CompositeError> {
        self.decode(ImageReader::open(path)?)
    }

    fn open_bytes(&self, data: &[u8]) -> Result<(ImageFormat, DynamicImage), CompositeError> {
        self.decode(ImageReader::new(Cursor::new(data)))
    }
}

impl Compositor for ImageCompositor {
    fn validate(&self, path: &Path) -> Result<ImageInfo, CompositeError> {
        let (format, image) = self.open(path)?;
        Ok(ImageInfo {
            format,
            width: image.width(),
            height: image.height(),
        })
    }

    fn validate_bytes(&self, data: &[u8]) -> Result<ImageInfo, CompositeError> {
        let (format, image) = self.open_bytes(data)?;
        Ok(ImageInfo {
            format,
            width: image.width(),
            height: image.height(),
        })
    }

    fn composite(&self, job: &CompositeJob<'_>) -> Result<Vec<u8>, CompositeError> {
        let (_, template) = self.open_bytes(job.template)?;
        let template = template.to_rgba8();
        let (_, product) = self.open(&job.product)?;

        let product = self.remover.remove(product.to_rgba8())?;
        let (width, height) = fit_within(product.dimensions(), job.dimensions);
        let product = if (width, height) == product.dimensions() {
            product
        } else {
            imageops::resize(&product, width, height, FilterType::Lanczos3)
        };

        let (tw, th) = template.dimensions();
        let mut canvas = RgbaImage::from_pixel(tw, th, Rgba([255, 255, 255, 255]));
        imageops::overlay(&mut canvas, &template, 0, 0);
        let x = (i64::from(tw) - i64::from(width)) / 2;
        let y = (i64::from(th) - i64::from(height)) / 2;
        imageops::overlay(&mut canvas, &product, x, y);

        let flattened = DynamicImage::ImageRgba8(canvas).to_rgb8();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&flattened)
            .map_err(|e| CompositeError::Encode(e.to_string()))?;

        tracing::debug!(
            index = job.index,
            product = %job.product.display(),
            size = %job.dimensions,
            bytes = out.len(),
            "Composite created"
        );
        Ok(out)
    }
}

/// Largest size with the source aspect ratio inside `bounds`, never larger
/// than the source itself.
pub fn fit_within((width, height): (u32, u32), bounds: Dimensions) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let scale = (f64::from(bounds.width) / f64::from(width))
        .min(f64::from(bounds.height) / f64::from(height))
        .min(1.0);
    let scaled = |v: u32| ((f64::from(v) * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "JPEG".into(),
        ImageFormat::Png => "PNG".into(),
        ImageFormat::WebP => "WEBP".into(),
        other => other
            .extensions_str()
            .first()
            .map_or_else(|| "unknown".into(), |ext| ext.to_uppercase()),
    }
}
