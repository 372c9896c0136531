//! Shared helpers for glimpse-core integration tests.
#![allow(dead_code)]

pub mod fixtures;
pub mod target;
pub mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glimpse_core::{AssetBinder, AssetCache, CacheConfig, DisplayQueue, Marshal};
use tempfile::TempDir;

use self::transport::FakeTransport;

/// A cache in a private temp directory, wired to a fake transport and a
/// real display thread.
pub struct Harness {
    pub dir: TempDir,
    pub transport: Arc<FakeTransport>,
    pub cache: AssetCache,
    pub queue: Arc<DisplayQueue>,
    pub binder: AssetBinder,
}

impl Harness {
    pub fn new(transport: FakeTransport, permits: usize) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        Self::in_dir(dir, transport, permits)
    }

    pub fn in_dir(
        dir: TempDir,
        transport: FakeTransport,
        permits: usize,
    ) -> Self {
        let mut config = CacheConfig::in_dir(dir.path());
        config.max_concurrent_fetches = Some(permits);

        let transport = Arc::new(transport);
        let cache = AssetCache::with_transport(&config, transport.clone())
            .expect("open cache");
        let queue = DisplayQueue::spawn().expect("display thread");
        let marshal: Arc<dyn Marshal> = queue.clone();
        let binder = AssetBinder::new(cache.clone(), marshal);

        Self {
            dir,
            transport,
            cache,
            queue,
            binder,
        }
    }

    pub fn root(&self) -> &Path {
        self.cache.root().path()
    }

    /// Regular files below the cache root.
    pub fn cached_files(&self) -> Vec<PathBuf> {
        files_below(self.root())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.queue.shutdown();
    }
}

pub fn files_below(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(files_below(&path));
        } else {
            out.push(path);
        }
    }
    out.sort();
    out
}
