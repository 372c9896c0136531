use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::dimensions::ImageDimensions;

/// Tightly packed RGBA8 pixels.
///
/// The pixel storage is reference counted so a buffer can be handed to the
/// display thread and kept by the caller without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    dimensions: ImageDimensions,
    rgba: Arc<[u8]>,
}

/// Returned when a pixel vector does not match the declared dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLengthMismatch {
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for PixelLengthMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pixel buffer holds {} bytes, expected {}",
            self.actual, self.expected
        )
    }
}

impl std::error::Error for PixelLengthMismatch {}

impl PixelBuffer {
    pub fn from_rgba(
        dimensions: ImageDimensions,
        rgba: Vec<u8>,
    ) -> Result<Self, PixelLengthMismatch> {
        let expected = dimensions.rgba_len();
        if rgba.len() != expected {
            return Err(PixelLengthMismatch {
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self {
            dimensions,
            rgba: rgba.into(),
        })
    }

    pub fn dimensions(&self) -> ImageDimensions {
        self.dimensions
    }

    pub fn width(&self) -> u32 {
        self.dimensions.width_u32()
    }

    pub fn height(&self) -> u32 {
        self.dimensions.height_u32()
    }

    pub fn as_rgba(&self) -> &[u8] {
        &self.rgba
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("dimensions", &self.dimensions)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// One frame of an animation together with how long it stays on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationFrame {
    pub buffer: PixelBuffer,
    pub delay: Duration,
}

/// Ordered frames of an animated asset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnimationFrames {
    frames: Arc<[AnimationFrame]>,
}

impl AnimationFrames {
    pub fn new(frames: Vec<AnimationFrame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn frames(&self) -> &[AnimationFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Dimensions of the first frame; `None` for an empty sequence.
    pub fn dimensions(&self) -> Option<ImageDimensions> {
        self.frames.first().map(|frame| frame.buffer.dimensions())
    }

    /// Sum of all frame delays.
    pub fn total_duration(&self) -> Duration {
        self.frames.iter().map(|frame| frame.delay).sum()
    }
}

/// Result of decoding a cached or streamed asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedAsset {
    Static(PixelBuffer),
    Animated(AnimationFrames),
}

impl DecodedAsset {
    pub fn dimensions(&self) -> Option<ImageDimensions> {
        match self {
            DecodedAsset::Static(buffer) => Some(buffer.dimensions()),
            DecodedAsset::Animated(frames) => frames.dimensions(),
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, DecodedAsset::Animated(_))
    }
}

/// Icon shown on a display target until the real asset is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Placeholder {
    pub icon_name: String,
    pub size: u32,
}

impl Placeholder {
    pub const MISSING_IMAGE: &'static str = "image-missing";

    pub fn new(icon_name: impl Into<String>, size: u32) -> Self {
        Self {
            icon_name: icon_name.into(),
            size,
        }
    }

    /// The stock "image-missing" icon at the given size.
    pub fn missing(size: u32) -> Self {
        Self::new(Self::MISSING_IMAGE, size)
    }
}
