use glimpse_model::{
    AnimationFrames, DecodedAsset, ImageDimensions, PixelBuffer, Placeholder,
};

/// A widget-like surface that shows one image.
///
/// Every method is only ever called on the display thread.
pub trait DisplayTarget: Send + Sync {
    fn set_placeholder(&self, placeholder: &Placeholder);

    fn set_static_image(&self, image: PixelBuffer);

    fn set_animated_image(&self, frames: AnimationFrames);

    /// Size the target was explicitly asked to occupy, if any.
    fn requested_size(&self) -> Option<ImageDimensions>;

    fn set_requested_size(&self, size: ImageDimensions);
}

pub(crate) fn present(target: &dyn DisplayTarget, asset: DecodedAsset) {
    match asset {
        DecodedAsset::Static(image) => target.set_static_image(image),
        DecodedAsset::Animated(frames) => target.set_animated_image(frames),
    }
}
