//! Core data model definitions shared across Glimpse crates.
#![allow(missing_docs)]

pub mod asset;
pub mod dimensions;

pub use asset::{
    AnimationFrame, AnimationFrames, DecodedAsset, PixelBuffer,
    PixelLengthMismatch, Placeholder,
};
pub use dimensions::{
    BoundingBox, ImageDimensions, ImageDimensionsError, fit_within,
};
