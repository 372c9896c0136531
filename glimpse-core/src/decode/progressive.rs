use glimpse_model::{
    AnimationFrame, AnimationFrames, BoundingBox, DecodedAsset,
    ImageDimensions, fit_within,
};
use image::ImageFormat;
use tracing::trace;

use crate::decode::frames::{
    classify, decode_static, extend_frames, partial_static, png_rows,
    header_dimensions,
};
use crate::error::DecodeError;

/// Minimum number of newly buffered bytes between two attempts to surface
/// a partial image.
pub const PROGRESSIVE_STEP: usize = 16 * 1024;

/// Where a [`ProgressiveDecoder`] is in its lifecycle.
///
/// `Idle -> HeaderParsed -> SizeNegotiated -> FrameAvailable -> Complete`,
/// with `Failed` reachable from any state before `Complete`. Both `Complete`
/// and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    HeaderParsed,
    SizeNegotiated,
    FrameAvailable,
    Complete,
    Failed,
}

impl DecoderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DecoderState::Complete | DecoderState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeEvent {
    /// Native dimensions are known and the output size has been chosen.
    SizePrepared {
        native: ImageDimensions,
        target: ImageDimensions,
    },
    /// A displayable image before the input is complete: the rows of a
    /// still decoded so far, or the frames of an animation decoded so far.
    /// Only emitted in incremental mode.
    FrameAvailable(DecodedAsset),
    /// The final image. Emitted exactly once, by
    /// [`ProgressiveDecoder::finish`].
    Complete(DecodedAsset),
}

/// Decoder fed with byte chunks as they arrive.
///
/// Output dimensions are negotiated as soon as the header is complete: the
/// native size scaled down to fit `bound`, or the native size when there is
/// no bound. Every image produced afterwards has those dimensions.
///
/// By default the image is decoded once, in [`finish`](Self::finish).
/// With [`incremental`](Self::incremental) set, partial images are surfaced
/// as [`DecodeEvent::FrameAvailable`] while bytes arrive: leading rows for
/// non-interlaced PNG stills, decoded frames for animations. The final still
/// of an incremental decode is also reported as `FrameAvailable`, so every
/// successful incremental still decode reaches that state.
#[derive(Debug)]
pub struct ProgressiveDecoder {
    bound: Option<BoundingBox>,
    animated: bool,
    incremental: bool,
    step: usize,
    buffer: Vec<u8>,
    state: DecoderState,
    target: Option<ImageDimensions>,
    frames: Vec<AnimationFrame>,
    // Rows of a still, or frames of an animation, already reported.
    surfaced: usize,
    attempted_at: usize,
}

impl ProgressiveDecoder {
    pub fn new(bound: Option<BoundingBox>, animated: bool) -> Self {
        Self {
            bound,
            animated,
            incremental: false,
            step: PROGRESSIVE_STEP,
            buffer: Vec::new(),
            state: DecoderState::Idle,
            target: None,
            frames: Vec::new(),
            surfaced: 0,
            attempted_at: 0,
        }
    }

    /// Surface partial images while bytes arrive.
    pub fn incremental(mut self, on: bool) -> Self {
        self.incremental = on;
        self
    }

    /// Override how many new bytes must arrive before partial images are
    /// decoded again. Zero is treated as one.
    pub fn with_progressive_step(mut self, step: usize) -> Self {
        self.step = step.max(1);
        self
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn target(&self) -> Option<ImageDimensions> {
        self.target
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    /// Append a chunk and return whatever it made available.
    ///
    /// A header that cannot be parsed yet is not an error here; the bytes
    /// may simply be incomplete. Malformed input surfaces from
    /// [`finish`](Self::finish).
    pub fn feed(
        &mut self,
        chunk: &[u8],
    ) -> Result<Vec<DecodeEvent>, DecodeError> {
        if self.state.is_terminal() {
            return Err(DecodeError::Closed);
        }
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        if self.state == DecoderState::Idle {
            if let Some(native) = header_dimensions(&self.buffer) {
                self.negotiate(native, &mut events)
                    .inspect_err(|_| self.state = DecoderState::Failed)?;
            }
        }

        if self.incremental
            && self.target.is_some()
            && self.buffer.len() - self.attempted_at >= self.next_step()
        {
            self.surface_partial(&mut events);
        }
        Ok(events)
    }

    /// Signal end of input and produce the final image.
    pub fn finish(&mut self) -> Result<Vec<DecodeEvent>, DecodeError> {
        if self.state.is_terminal() {
            return Err(DecodeError::Closed);
        }
        let result = self.finish_inner();
        self.state = match result {
            Ok(_) => DecoderState::Complete,
            Err(_) => DecoderState::Failed,
        };
        result
    }

    fn finish_inner(&mut self) -> Result<Vec<DecodeEvent>, DecodeError> {
        let mut events = Vec::new();

        if self.state == DecoderState::Idle {
            let native = match header_dimensions(&self.buffer) {
                Some(native) => native,
                None if self.buffer.is_empty() => {
                    return Err(DecodeError::Truncated);
                }
                // Run the full decoder to get the real reason the header
                // could not be read.
                None => {
                    let image = image::load_from_memory(&self.buffer)
                        .map_err(classify)?;
                    (image.width(), image.height())
                }
            };
            self.negotiate(native, &mut events)?;
        }

        let asset = if self.animated {
            extend_frames(&self.buffer, self.target, &mut self.frames, false)?;
            DecodedAsset::Animated(AnimationFrames::new(std::mem::take(
                &mut self.frames,
            )))
        } else {
            let asset = DecodedAsset::Static(decode_static(
                &self.buffer,
                self.target,
            )?);
            if self.incremental {
                events.push(DecodeEvent::FrameAvailable(asset.clone()));
            }
            asset
        };
        self.state = DecoderState::FrameAvailable;
        events.push(DecodeEvent::Complete(asset));
        Ok(events)
    }

    fn negotiate(
        &mut self,
        (width, height): (u32, u32),
        events: &mut Vec<DecodeEvent>,
    ) -> Result<(), DecodeError> {
        let native = ImageDimensions::try_from((width, height))
            .map_err(|_| DecodeError::InvalidDimensions { width, height })?;
        self.state = DecoderState::HeaderParsed;

        let target = match self.bound {
            Some(bound) => fit_within(native, bound),
            None => native,
        };
        trace!(%native, %target, "decoder size negotiated");

        self.target = Some(target);
        self.state = DecoderState::SizeNegotiated;
        events.push(DecodeEvent::SizePrepared { native, target });
        Ok(())
    }

    /// Each attempt re-parses the buffered prefix, so attempts back off
    /// geometrically to keep the total parsing work linear in the input.
    fn next_step(&self) -> usize {
        self.step.max(self.attempted_at / 4)
    }

    fn surface_partial(&mut self, events: &mut Vec<DecodeEvent>) {
        self.attempted_at = self.buffer.len();
        let partial = if self.animated {
            self.partial_animation()
        } else {
            self.partial_still()
        };
        if let Some(asset) = partial {
            self.state = DecoderState::FrameAvailable;
            events.push(DecodeEvent::FrameAvailable(asset));
        }
    }

    fn partial_animation(&mut self) -> Option<DecodedAsset> {
        // Errors here only mean the bytes are incomplete; finish reports them.
        let _ = extend_frames(&self.buffer, self.target, &mut self.frames, true);
        if self.frames.len() <= self.surfaced {
            return None;
        }
        self.surfaced = self.frames.len();
        Some(DecodedAsset::Animated(AnimationFrames::new(self.frames.clone())))
    }

    fn partial_still(&mut self) -> Option<DecodedAsset> {
        if image::guess_format(&self.buffer).ok()? != ImageFormat::Png {
            return None;
        }
        let (rows, image) = png_rows(&self.buffer)?;
        // A fully decoded still is left to finish.
        if rows as usize <= self.surfaced || rows >= image.height() {
            return None;
        }
        self.surfaced = rows as usize;
        partial_static(image, self.target)
            .ok()
            .map(DecodedAsset::Static)
    }
}
