use std::fmt;
use std::num::NonZeroU32;

/// Non-zero pixel dimensions for a decoded image.
///
/// Used both for the native size a decoder reports and for the target size
/// negotiated against a [`BoundingBox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageDimensions {
    pub width: NonZeroU32,
    pub height: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDimensionsError {
    ZeroWidth,
    ZeroHeight,
}

impl fmt::Display for ImageDimensionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageDimensionsError::ZeroWidth => f.write_str("width is zero"),
            ImageDimensionsError::ZeroHeight => f.write_str("height is zero"),
        }
    }
}

impl std::error::Error for ImageDimensionsError {}

impl ImageDimensions {
    pub const fn new(width: NonZeroU32, height: NonZeroU32) -> Self {
        Self { width, height }
    }

    pub const fn width_u32(self) -> u32 {
        self.width.get()
    }

    pub const fn height_u32(self) -> u32 {
        self.height.get()
    }

    pub const fn as_u32_tuple(self) -> (u32, u32) {
        (self.width.get(), self.height.get())
    }

    /// Number of bytes an RGBA8 buffer of this size occupies.
    pub const fn rgba_len(self) -> usize {
        self.width.get() as usize * self.height.get() as usize * 4
    }
}

impl TryFrom<(u32, u32)> for ImageDimensions {
    type Error = ImageDimensionsError;

    fn try_from(value: (u32, u32)) -> Result<Self, Self::Error> {
        let (width, height) = value;
        let width =
            NonZeroU32::new(width).ok_or(ImageDimensionsError::ZeroWidth)?;
        let height =
            NonZeroU32::new(height).ok_or(ImageDimensionsError::ZeroHeight)?;
        Ok(Self { width, height })
    }
}

impl fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Caller-requested maximum size for a decoded asset.
///
/// A request without a bounding box decodes at native size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingBox {
    pub width: NonZeroU32,
    pub height: NonZeroU32,
}

impl BoundingBox {
    pub const fn new(width: NonZeroU32, height: NonZeroU32) -> Self {
        Self { width, height }
    }

    /// Build a bounding box from raw pixel counts. Returns `None` when either
    /// side is zero, which callers treat as "no bound".
    pub fn from_u32(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    pub const fn as_u32_tuple(self) -> (u32, u32) {
        (self.width.get(), self.height.get())
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Scale `native` down (or across) so that it fits `bound`, preserving the
/// aspect ratio with integer truncation.
///
/// Sources strictly smaller than the bound on both axes are returned
/// unchanged. Otherwise the longer native side is pinned to its bound and the
/// other side scaled to match. A side that truncates to zero is clamped to one
/// pixel.
pub fn fit_within(
    native: ImageDimensions,
    bound: BoundingBox,
) -> ImageDimensions {
    let (w, h) = native.as_u32_tuple();
    let (max_w, max_h) = bound.as_u32_tuple();

    if w < max_w && h < max_h {
        return native;
    }

    let (w, h) = if w > h {
        let scaled = u64::from(h) * u64::from(max_w) / u64::from(w);
        (max_w, scaled as u32)
    } else {
        let scaled = u64::from(w) * u64::from(max_h) / u64::from(h);
        (scaled as u32, max_h)
    };

    ImageDimensions {
        width: NonZeroU32::new(w).unwrap_or(NonZeroU32::MIN),
        height: NonZeroU32::new(h).unwrap_or(NonZeroU32::MIN),
    }
}
