//! Disk-backed loading of remote images into display targets.
//!
//! A request flows through [`AssetBinder`]: the URL is mapped to a
//! [`CacheKey`], a readable entry in the [`DiskStore`] is decoded straight
//! away, and a miss goes through the [`Throttler`]-bounded [`Fetcher`] and an
//! optional [`ProcessorChain`] before it is written to disk and decoded by the
//! [`ProgressiveDecoder`]. Decoding never happens on the display thread and
//! the display target is only touched through a [`Marshal`].
//!
//! Failures are logged and leave the placeholder in place; use
//! [`AssetCache::load`] directly to observe them.
//!
//! ## Cache layout
//!
//! Entries live at `<temp root>/<prefix>-<version>/<host>/<path?query>`, with
//! every character outside letters, digits, `#` and `.` replaced by `_`.
//! Opening an [`AssetCache`] removes every `<prefix>-*` directory that does
//! not match the current version, so bumping
//! [`CACHE_VERSION`](config::CACHE_VERSION) invalidates everything at once.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use glimpse_core::{
//!     AssetBinder, AssetCache, BoundingBox, CacheConfig, DisplayQueue,
//!     DisplayTarget, FetchRequest, Marshal, Placeholder,
//! };
//!
//! # async fn demo(target: Arc<dyn DisplayTarget>) -> anyhow::Result<()> {
//! glimpse_core::telemetry::init_tracing("info");
//! let cache = AssetCache::open(&CacheConfig::default())?;
//! let display: Arc<dyn Marshal> = DisplayQueue::spawn()?;
//! let binder = AssetBinder::new(cache, display);
//!
//! let request = FetchRequest::new("https://img.example/a.png")
//!     .with_bound(BoundingBox::from_u32(100, 100).unwrap())
//!     .with_placeholder(Placeholder::missing(48));
//! let outcome = binder.bind(request, target).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```
#![allow(missing_docs)]

pub mod binder;
pub mod cache;
pub mod config;
pub mod decode;
pub mod display;
pub mod error;
pub mod fetch;
pub mod request;
pub mod telemetry;

pub use binder::{AssetBinder, AssetCache, BindOutcome, EventSink, Origin};
pub use cache::{CacheKey, CacheKeyDeriver, CacheRoot, DiskStore, sized_url};
pub use config::CacheConfig;
pub use decode::{DecodeEvent, DecoderState, ProgressiveDecoder};
pub use display::{
    Completion, DisplayQueue, DisplayTarget, Marshal, Submission,
};
pub use error::{
    DecodeError, ErrorKind, FetchError, OpenError, PipelineError, Stage,
    StoreError,
};
pub use fetch::{
    CenterCrop, Downscale, Fetcher, HttpTransport, Processor, ProcessorChain,
    Throttler, Transport, TransportResponse,
};
pub use request::{FetchRequest, RenderPolicy, looks_animated};

pub use glimpse_model::{
    AnimationFrame, AnimationFrames, BoundingBox, DecodedAsset,
    ImageDimensions, PixelBuffer, Placeholder, fit_within,
};
