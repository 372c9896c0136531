//! In-process transport serving canned responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, stream};
use glimpse_core::error::TransportError;
use glimpse_core::{Transport, TransportResponse};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Route {
    status: u16,
    body: Vec<u8>,
}

/// Serves registered URLs, answers 404 for anything else and counts every
/// GET along with the peak number of GETs in flight at once.
#[derive(Debug)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    chunk: usize,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            chunk: 1024,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_chunk_size(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub fn serve(self, url: &str, body: Vec<u8>) -> Self {
        self.respond(url, 200, body)
    }

    pub fn respond(self, url: &str, status: u16, body: Vec<u8>) -> Self {
        self.routes
            .lock()
            .insert(url.to_string(), Route { status, body });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let route = self.routes.lock().get(url).cloned().unwrap_or(Route {
            status: 404,
            body: b"not found".to_vec(),
        });
        let chunks: Vec<Result<Bytes, TransportError>> = route
            .body
            .chunks(self.chunk)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();

        Ok(TransportResponse {
            status: route.status,
            body: stream::iter(chunks).boxed(),
        })
    }
}
