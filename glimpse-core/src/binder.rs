//! Request orchestration: cache lookup, fetch, persist, decode, render.

use std::fs::File;
use std::sync::Arc;

use bytes::Bytes;
use glimpse_model::{DecodedAsset, ImageDimensions};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, CacheKeyDeriver, CacheRoot, DiskStore};
use crate::config::CacheConfig;
use crate::decode::{self, DecodeEvent, ProgressiveDecoder};
use crate::display::{DisplayTarget, Marshal, present};
use crate::error::{
    DecodeError, ErrorKind, FetchError, MarshalError, OpenError, PipelineError,
    Stage, StoreError,
};
use crate::fetch::{Fetcher, HttpTransport, Throttler, Transport};
use crate::request::{FetchRequest, RenderPolicy};

/// Observer for decoder events, called on the decoding worker.
pub type EventSink = Arc<dyn Fn(&DecodeEvent) + Send + Sync>;

/// Where a loaded asset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Disk,
    Network,
}

#[derive(Debug)]
struct Loaded {
    asset: DecodedAsset,
    origin: Origin,
}

#[derive(Debug)]
struct Inner {
    root: CacheRoot,
    keys: CacheKeyDeriver,
    store: DiskStore,
    fetcher: Fetcher,
}

/// The disk cache together with the fetcher that fills it.
#[derive(Clone, Debug)]
pub struct AssetCache {
    inner: Arc<Inner>,
}

impl AssetCache {
    /// Open the cache described by `config` with a `reqwest` transport.
    ///
    /// Stale cache roots are swept before the current one is created.
    pub fn open(config: &CacheConfig) -> Result<Self, OpenError> {
        config.validate()?;
        let transport = HttpTransport::new(
            config.fetch_timeout(),
            config.user_agent.as_deref(),
        )
        .map_err(OpenError::Transport)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: &CacheConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, OpenError> {
        config.validate()?;
        let root = CacheRoot::from_config(config).open().map_err(|source| {
            OpenError::Root {
                path: config.cache_root(),
                source,
            }
        })?;

        let throttler = Throttler::new(config.fetch_permits());
        info!(
            root = %root.path().display(),
            permits = throttler.size(),
            "asset cache ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                keys: CacheKeyDeriver::new(root.path()),
                store: DiskStore::new(root.path()),
                fetcher: Fetcher::new(transport, throttler),
                root,
            }),
        })
    }

    pub fn root(&self) -> &CacheRoot {
        &self.inner.root
    }

    pub fn store(&self) -> &DiskStore {
        &self.inner.store
    }

    pub fn throttler(&self) -> &Throttler {
        self.inner.fetcher.throttler()
    }

    pub(crate) fn fetcher(&self) -> &Fetcher {
        &self.inner.fetcher
    }

    /// Cache key for `request`. Creates the host directory as a side effect.
    pub fn key_for(&self, request: &FetchRequest) -> CacheKey {
        let variant = request.processors().fingerprint();
        self.inner.keys.derive(request.url(), variant.as_deref())
    }

    /// Load and decode `request` without rendering it anywhere.
    pub async fn load(
        &self,
        request: &FetchRequest,
    ) -> Result<DecodedAsset, PipelineError> {
        self.load_with(request, None).await.map(|loaded| loaded.asset)
    }

    async fn load_with(
        &self,
        request: &FetchRequest,
        sink: Option<EventSink>,
    ) -> Result<Loaded, PipelineError> {
        let url = request.url();
        let (key, cached) = self.lookup(request, sink.clone()).await?;
        if let Some(asset) = cached {
            debug!(url, key = %key, "cache hit");
            return Ok(Loaded {
                asset,
                origin: Origin::Disk,
            });
        }
        debug!(url, key = %key, "cache miss");

        let bytes = self
            .inner
            .fetcher
            .fetch(
                url,
                request.cancel(),
                request.processors(),
                request.is_animated(),
            )
            .await
            .map_err(PipelineError::from_fetch)?;

        let inner = Arc::clone(&self.inner);
        let owned_url = url.to_string();
        let decoder = decoder_for(request);
        let asset = tokio::task::spawn_blocking(move || {
            persist_and_decode(&inner.store, &owned_url, &key, &bytes, |file| {
                decode_file(file, decoder, sink.as_ref())
            })
        })
        .await
        .map_err(|join| aborted(url, Stage::Decode, join))??;

        Ok(Loaded {
            asset,
            origin: Origin::Network,
        })
    }

    async fn lookup(
        &self,
        request: &FetchRequest,
        sink: Option<EventSink>,
    ) -> Result<(CacheKey, Option<DecodedAsset>), PipelineError> {
        let cache = self.clone();
        let owned = request.clone();
        tokio::task::spawn_blocking(move || {
            let key = cache.key_for(&owned);
            let cached = read_cached(
                &cache.inner.store,
                &key,
                decoder_for(&owned),
                sink.as_ref(),
            );
            (key, cached)
        })
        .await
        .map_err(|join| aborted(request.url(), Stage::Lookup, join))
    }
}

fn aborted(
    url: &str,
    stage: Stage,
    join: tokio::task::JoinError,
) -> PipelineError {
    PipelineError::new(url, stage, DecodeError::Aborted(join.to_string()))
}

/// Partial images are only decoded for requests that render them.
fn decoder_for(request: &FetchRequest) -> ProgressiveDecoder {
    ProgressiveDecoder::new(request.bound(), request.is_animated())
        .incremental(request.render_policy() == RenderPolicy::Progressive)
}

fn decode_file(
    file: File,
    decoder: ProgressiveDecoder,
    sink: Option<&EventSink>,
) -> Result<DecodedAsset, DecodeError> {
    decode::decode_reader(file, decoder, |event| {
        if let Some(sink) = sink {
            sink(event);
        }
    })
}

/// A cache hit is an entry that exists and decodes. Anything else is
/// treated as a miss and refetched.
fn read_cached(
    store: &DiskStore,
    key: &CacheKey,
    decoder: ProgressiveDecoder,
    sink: Option<&EventSink>,
) -> Option<DecodedAsset> {
    let file = match store.open(key) {
        Ok(file) => file,
        Err(StoreError::NotFound(_)) => return None,
        Err(err) => {
            warn!(key = %key, "cache entry unreadable: {err}");
            return None;
        }
    };

    match decode_file(file, decoder, sink) {
        Ok(asset) => Some(asset),
        Err(err) => {
            warn!(key = %key, "cached entry does not decode: {err}");
            None
        }
    }
}

/// Write `bytes` under `key` and decode what was written. An entry that does
/// not decode is removed again so the next request refetches it.
fn persist_and_decode<F>(
    store: &DiskStore,
    url: &str,
    key: &CacheKey,
    bytes: &[u8],
    decode: F,
) -> Result<DecodedAsset, PipelineError>
where
    F: FnOnce(File) -> Result<DecodedAsset, DecodeError>,
{
    store
        .write(key, bytes)
        .map_err(|err| PipelineError::new(url, Stage::Persist, err))?;
    let file = store
        .open(key)
        .map_err(|err| PipelineError::new(url, Stage::Persist, err))?;

    decode(file).map_err(|err| {
        if let Err(remove) = store.remove(key) {
            warn!(
                url,
                key = %key,
                "failed to drop undecodable entry: {remove}"
            );
        }
        PipelineError::new(url, Stage::Decode, err)
    })
}

/// How a bind ended. Failures never escape a bind; they end here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    CacheHit,
    Fetched,
    Streamed,
    PlaceholderKept { stage: Stage, kind: ErrorKind },
}

/// Drives display targets from an [`AssetCache`].
#[derive(Clone)]
pub struct AssetBinder {
    cache: AssetCache,
    marshal: Arc<dyn Marshal>,
}

impl std::fmt::Debug for AssetBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetBinder")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl AssetBinder {
    pub fn new(cache: AssetCache, marshal: Arc<dyn Marshal>) -> Self {
        Self { cache, marshal }
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Load `request` into `target` on a new task.
    ///
    /// The placeholder, if any, is shown before anything else touches the
    /// target. Must be called from within a Tokio runtime.
    pub fn bind(
        &self,
        request: FetchRequest,
        target: Arc<dyn DisplayTarget>,
    ) -> JoinHandle<BindOutcome> {
        let binder = self.clone();
        tokio::spawn(async move { binder.run_bind(request, target).await })
    }

    /// Like [`bind`](Self::bind) but bypasses the disk cache and decodes the
    /// response body as it arrives, rendering partial animations on the way.
    ///
    /// Requests with processors go through [`bind`](Self::bind) instead,
    /// since processors need the whole body.
    pub fn stream(
        &self,
        request: FetchRequest,
        target: Arc<dyn DisplayTarget>,
    ) -> JoinHandle<BindOutcome> {
        let binder = self.clone();
        tokio::spawn(async move {
            if !request.processors().is_empty() {
                debug!(
                    url = request.url(),
                    "request has processors, loading through the cache"
                );
                return binder.run_bind(request, target).await;
            }
            binder.run_stream(request, target).await
        })
    }

    async fn run_bind(
        self,
        request: FetchRequest,
        target: Arc<dyn DisplayTarget>,
    ) -> BindOutcome {
        if let Err(err) = self.show_placeholder(&request, &target).await {
            return give_up(err);
        }

        let progressive = request.render_policy() == RenderPolicy::Progressive;
        let sink = self.event_sink(&request, &target, progressive);
        let loaded = match self.cache.load_with(&request, Some(sink)).await {
            Ok(loaded) => loaded,
            Err(err) => return give_up(err),
        };

        if let Err(err) = self.render(&request, &target, loaded.asset).await {
            return give_up(err);
        }
        match loaded.origin {
            Origin::Disk => BindOutcome::CacheHit,
            Origin::Network => BindOutcome::Fetched,
        }
    }

    async fn run_stream(
        self,
        request: FetchRequest,
        target: Arc<dyn DisplayTarget>,
    ) -> BindOutcome {
        if let Err(err) = self.show_placeholder(&request, &target).await {
            return give_up(err);
        }

        let url = request.url();
        let mut body =
            match self.cache.fetcher().open(url, request.cancel()).await {
                Ok(body) => body,
                Err(err) => return give_up(PipelineError::from_fetch(err)),
            };

        let (tx, mut rx) = mpsc::channel::<Bytes>(8);
        let sink = self.event_sink(&request, &target, true);
        let decoder =
            ProgressiveDecoder::new(request.bound(), request.is_animated())
                .incremental(true);
        let decoding = tokio::task::spawn_blocking(move || {
            decode::decode_chunks(
                std::iter::from_fn(move || rx.blocking_recv()),
                decoder,
                |event| sink(event),
            )
        });

        let mut failed: Option<FetchError> = None;
        while let Some(chunk) = body.next_chunk().await {
            match chunk {
                Ok(chunk) => {
                    // The decoder has stopped; its error is reported below.
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }
        drop(tx);
        drop(body);

        let decoded = decoding.await;
        if let Some(err) = failed {
            return give_up(PipelineError::from_fetch(err));
        }
        let asset = match decoded {
            Ok(Ok(asset)) => asset,
            Ok(Err(err)) => {
                return give_up(PipelineError::new(url, Stage::Decode, err));
            }
            Err(join) => return give_up(aborted(url, Stage::Decode, join)),
        };

        match self.render(&request, &target, asset).await {
            Ok(()) => BindOutcome::Streamed,
            Err(err) => give_up(err),
        }
    }

    async fn show_placeholder(
        &self,
        request: &FetchRequest,
        target: &Arc<dyn DisplayTarget>,
    ) -> Result<(), PipelineError> {
        let Some(placeholder) = request.placeholder().cloned() else {
            return Ok(());
        };
        let target = Arc::clone(target);
        self.marshal
            .run_when_idle(move || target.set_placeholder(&placeholder))
            .wait()
            .await
            .map_err(|err| PipelineError::new(request.url(), Stage::Render, err))
    }

    async fn render(
        &self,
        request: &FetchRequest,
        target: &Arc<dyn DisplayTarget>,
        asset: DecodedAsset,
    ) -> Result<(), PipelineError> {
        let target = Arc::clone(target);
        self.marshal
            .run_async(move || present(&*target, asset))
            .wait()
            .await
            .map_err(|err| PipelineError::new(request.url(), Stage::Render, err))
    }

    /// Adopts the negotiated size on targets without an explicit one when
    /// the request has a bounding box, and forwards partial images when
    /// `progressive` is set.
    fn event_sink(
        &self,
        request: &FetchRequest,
        target: &Arc<dyn DisplayTarget>,
        progressive: bool,
    ) -> EventSink {
        let marshal = Arc::clone(&self.marshal);
        let target = Arc::clone(target);
        let bounded = request.bound().is_some();
        Arc::new(move |event: &DecodeEvent| match event {
            DecodeEvent::SizePrepared { .. } if !bounded => {}
            DecodeEvent::SizePrepared { target: size, .. } => {
                if let Err(err) = adopt_size(&marshal, &target, *size) {
                    debug!("could not negotiate target size: {err}");
                }
            }
            DecodeEvent::FrameAvailable(asset) if progressive => {
                let target = Arc::clone(&target);
                let asset = asset.clone();
                marshal.run_async(move || present(&*target, asset));
            }
            DecodeEvent::FrameAvailable(_) | DecodeEvent::Complete(_) => {}
        })
    }
}

fn adopt_size(
    marshal: &Arc<dyn Marshal>,
    target: &Arc<dyn DisplayTarget>,
    size: ImageDimensions,
) -> Result<(), MarshalError> {
    let current = Arc::clone(target);
    if marshal.run_and_wait(move || current.requested_size())?.is_none() {
        let target = Arc::clone(target);
        marshal.run_async(move || target.set_requested_size(size));
    }
    Ok(())
}

fn give_up(err: PipelineError) -> BindOutcome {
    let kind = err.kind();
    if kind == ErrorKind::Cancelled {
        debug!(url = %err.url, stage = %err.stage, "image request cancelled");
    } else {
        error!(
            url = %err.url,
            stage = %err.stage,
            ?kind,
            "image request failed: {}",
            err.cause
        );
    }
    BindOutcome::PlaceholderKept {
        stage: err.stage,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, DynamicImage, Frame, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([0, 0, 0, 255]),
        ))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
        out.into_inner()
    }

    fn one_shot() -> ProgressiveDecoder {
        ProgressiveDecoder::new(None, false)
    }

    /// Frames of per-pixel noise, large enough to span several read chunks.
    fn noisy_gif(side: u32, frames: u32) -> Vec<u8> {
        let mut seed = 0x1234_5678_u32;
        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new_with_speed(&mut out, 30);
            for _ in 0..frames {
                let image = RgbaImage::from_fn(side, side, |_, _| {
                    seed ^= seed << 13;
                    seed ^= seed >> 17;
                    seed ^= seed << 5;
                    let [r, g, b, _] = seed.to_le_bytes();
                    Rgba([r, g, b, 255])
                });
                encoder
                    .encode_frame(Frame::from_parts(
                        image,
                        0,
                        0,
                        Delay::from_numer_denom_ms(50, 1),
                    ))
                    .unwrap();
            }
        }
        out
    }

    fn counting_sink() -> (EventSink, Arc<AtomicUsize>) {
        let frames = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&frames);
        let sink: EventSink = Arc::new(move |event: &DecodeEvent| {
            if matches!(event, DecodeEvent::FrameAvailable(_)) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        (sink, frames)
    }

    fn store_and_key() -> (tempfile::TempDir, DiskStore, CacheKey) {
        let dir = tempfile::tempdir().unwrap();
        let key = CacheKeyDeriver::new(dir.path())
            .derive("http://img.example/a.png", None);
        let store = DiskStore::new(dir.path());
        (dir, store, key)
    }

    #[test]
    fn undecodable_entry_is_removed_after_write() {
        let (_dir, store, key) = store_and_key();
        let err = persist_and_decode(
            &store,
            "http://img.example/a.png",
            &key,
            b"<html>oops</html>",
            |file| decode_file(file, one_shot(), None),
        )
        .unwrap_err();

        assert_eq!(err.stage, Stage::Decode);
        assert_eq!(err.kind(), ErrorKind::DecodeFailed);
        assert!(!store.contains(&key));
    }

    #[test]
    fn decodable_entry_is_kept() {
        let (_dir, store, key) = store_and_key();
        let asset = persist_and_decode(
            &store,
            "http://img.example/a.png",
            &key,
            &png(4, 2),
            |file| decode_file(file, one_shot(), None),
        )
        .unwrap();

        assert_eq!(asset.dimensions().map(|d| d.as_u32_tuple()), Some((4, 2)));
        assert!(store.contains(&key));
    }

    #[test]
    fn corrupt_entry_reads_as_miss() {
        let (_dir, store, key) = store_and_key();
        store.write(&key, &png(8, 8)[..20]).unwrap();
        assert!(read_cached(&store, &key, one_shot(), None).is_none());

        store.write(&key, &png(8, 8)).unwrap();
        assert!(read_cached(&store, &key, one_shot(), None).is_some());
    }

    #[test]
    fn on_complete_cache_read_decodes_animation_once() {
        let (_dir, store, key) = store_and_key();
        let bytes = noisy_gif(160, 3);
        assert!(bytes.len() > decode::READ_CHUNK);
        store.write(&key, &bytes).unwrap();

        let request = FetchRequest::new("http://img.example/a.gif");
        assert_eq!(request.render_policy(), RenderPolicy::OnComplete);
        let (sink, frames) = counting_sink();
        let asset =
            read_cached(&store, &key, decoder_for(&request), Some(&sink))
                .unwrap();

        assert!(asset.is_animated());
        assert_eq!(frames.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn progressive_cache_read_surfaces_partial_frames() {
        let (_dir, store, key) = store_and_key();
        store.write(&key, &noisy_gif(160, 3)).unwrap();

        let request = FetchRequest::new("http://img.example/a.gif")
            .with_render_policy(RenderPolicy::Progressive);
        let (sink, frames) = counting_sink();
        read_cached(&store, &key, decoder_for(&request), Some(&sink)).unwrap();

        assert!(frames.load(Ordering::SeqCst) >= 1);
    }
}
