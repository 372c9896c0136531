//! Byte transforms applied to fetched assets before they are cached.

use std::io::Cursor;
use std::sync::Arc;

use glimpse_model::{BoundingBox, ImageDimensions, fit_within};
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, Frame, ImageFormat};

use crate::error::ProcessorError;

/// A single image transform.
pub trait Processor: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Stable description of this processor and its parameters. Becomes part
    /// of the cache key, so two processors that can produce different output
    /// must never share a fingerprint.
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }

    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, ProcessorError>;
}

/// Shrink to fit a bounding box, preserving aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downscale {
    pub max: BoundingBox,
}

impl Processor for Downscale {
    fn name(&self) -> &str {
        "downscale"
    }

    fn fingerprint(&self) -> String {
        format!("downscale-{}", self.max)
    }

    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, ProcessorError> {
        let native = ImageDimensions::try_from((image.width(), image.height()))
            .map_err(|err| ProcessorError::Processor {
                name: self.name().to_string(),
                reason: err.to_string(),
            })?;
        let target = fit_within(native, self.max);
        if target == native {
            return Ok(image);
        }
        let (w, h) = target.as_u32_tuple();
        Ok(image.resize_exact(w, h, FilterType::Lanczos3))
    }
}

/// Cut a centered region of at most `width`x`height` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CenterCrop {
    pub width: u32,
    pub height: u32,
}

impl Processor for CenterCrop {
    fn name(&self) -> &str {
        "crop"
    }

    fn fingerprint(&self) -> String {
        format!("crop-{}x{}", self.width, self.height)
    }

    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, ProcessorError> {
        if self.width == 0 || self.height == 0 {
            return Err(ProcessorError::Processor {
                name: self.name().to_string(),
                reason: format!("empty crop {}x{}", self.width, self.height),
            });
        }
        let w = self.width.min(image.width());
        let h = self.height.min(image.height());
        let x = (image.width() - w) / 2;
        let y = (image.height() - h) / 2;
        Ok(image.crop_imm(x, y, w, h))
    }
}

/// Ordered list of processors applied to a fetched asset.
#[derive(Clone, Debug, Default)]
pub struct ProcessorChain {
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn push(&mut self, processor: Arc<dyn Processor>) {
        self.processors.push(processor);
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Combined fingerprint of every processor in order, `None` when empty.
    pub fn fingerprint(&self) -> Option<String> {
        if self.processors.is_empty() {
            return None;
        }
        let parts: Vec<String> =
            self.processors.iter().map(|p| p.fingerprint()).collect();
        Some(parts.join("+"))
    }

    fn run(&self, image: DynamicImage) -> Result<DynamicImage, ProcessorError> {
        self.processors
            .iter()
            .try_fold(image, |image, processor| processor.apply(image))
    }

    /// Decode a still image, run the chain and re-encode as PNG.
    pub fn apply_static(&self, bytes: &[u8]) -> Result<Vec<u8>, ProcessorError> {
        let image =
            image::load_from_memory(bytes).map_err(ProcessorError::Decode)?;
        let processed = self.run(image)?;

        let mut out = Cursor::new(Vec::new());
        processed
            .write_to(&mut out, ImageFormat::Png)
            .map_err(ProcessorError::Encode)?;
        Ok(out.into_inner())
    }

    /// Run the chain over every frame of a GIF, keeping frame delays, and
    /// re-encode as a looping GIF. Anything that is not a GIF is handled like
    /// a still image.
    pub fn apply_animation(
        &self,
        bytes: &[u8],
    ) -> Result<Vec<u8>, ProcessorError> {
        if !matches!(image::guess_format(bytes), Ok(ImageFormat::Gif)) {
            return self.apply_static(bytes);
        }

        let decoder =
            GifDecoder::new(Cursor::new(bytes)).map_err(ProcessorError::Decode)?;
        let frames = decoder
            .into_frames()
            .collect_frames()
            .map_err(ProcessorError::Decode)?;

        let mut processed = Vec::with_capacity(frames.len());
        for frame in frames {
            let delay = frame.delay();
            let image = DynamicImage::ImageRgba8(frame.into_buffer());
            let image = self.run(image)?.to_rgba8();
            processed.push(Frame::from_parts(image, 0, 0, delay));
        }

        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(ProcessorError::Encode)?;
            encoder
                .encode_frames(processed)
                .map_err(ProcessorError::Encode)?;
        }
        Ok(out)
    }
}
