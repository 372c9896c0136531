//! A display target that records what was done to it.

use std::thread;

use glimpse_core::{
    AnimationFrames, DisplayTarget, ImageDimensions, PixelBuffer, Placeholder,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Placeholder(String),
    Static(ImageDimensions),
    Animated { frames: usize },
    RequestedSize(ImageDimensions),
}

#[derive(Debug, Default)]
pub struct RecordingTarget {
    calls: Mutex<Vec<Call>>,
    requested: Mutex<Option<ImageDimensions>>,
    threads: Mutex<Vec<Option<String>>>,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// A target that already has an explicit size.
    pub fn sized(size: ImageDimensions) -> Self {
        let target = Self::default();
        *target.requested.lock() = Some(size);
        target
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Names of every thread that touched this target.
    pub fn threads(&self) -> Vec<Option<String>> {
        self.threads.lock().clone()
    }

    fn record(&self, call: Option<Call>) {
        self.threads
            .lock()
            .push(thread::current().name().map(str::to_string));
        if let Some(call) = call {
            self.calls.lock().push(call);
        }
    }
}

impl DisplayTarget for RecordingTarget {
    fn set_placeholder(&self, placeholder: &Placeholder) {
        self.record(Some(Call::Placeholder(placeholder.icon_name.clone())));
    }

    fn set_static_image(&self, image: PixelBuffer) {
        self.record(Some(Call::Static(image.dimensions())));
    }

    fn set_animated_image(&self, frames: AnimationFrames) {
        self.record(Some(Call::Animated {
            frames: frames.len(),
        }));
    }

    fn requested_size(&self) -> Option<ImageDimensions> {
        self.record(None);
        *self.requested.lock()
    }

    fn set_requested_size(&self, size: ImageDimensions) {
        *self.requested.lock() = Some(size);
        self.record(Some(Call::RequestedSize(size)));
    }
}
