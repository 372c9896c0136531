use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{FetchError, ProcessorError};
use crate::fetch::processor::ProcessorChain;
use crate::fetch::throttle::{ThrottlePermit, Throttler};
use crate::fetch::transport::{BodyStream, Transport};

/// A successful response whose body has not been read yet. Holds the throttle
/// permit until dropped.
pub struct OpenedBody {
    url: String,
    body: BodyStream,
    permit: ThrottlePermit,
}

impl std::fmt::Debug for OpenedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedBody")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl OpenedBody {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next body chunk, or `None` once the body is exhausted.
    pub async fn next_chunk(
        &mut self,
    ) -> Option<Result<bytes::Bytes, FetchError>> {
        let chunk = self.body.next().await?;
        Some(chunk.map_err(|source| FetchError::Transport {
            url: self.url.clone(),
            source,
        }))
    }

    /// Read the rest of the body into memory.
    pub async fn collect(self) -> Result<Vec<u8>, FetchError> {
        self.collect_holding().await.map(|(bytes, _permit)| bytes)
    }

    async fn collect_holding(
        mut self,
    ) -> Result<(Vec<u8>, ThrottlePermit), FetchError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok((bytes, self.permit))
    }
}

/// Throttled single-attempt GET.
#[derive(Clone, Debug)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    throttler: Throttler,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, throttler: Throttler) -> Self {
        Self {
            transport,
            throttler,
        }
    }

    pub fn throttler(&self) -> &Throttler {
        &self.throttler
    }

    /// Acquire a permit and issue the GET, stopping at the response head.
    ///
    /// `cancel` is honoured while waiting for a permit and while waiting for
    /// the response head. Once a 2xx head has arrived the body is the
    /// caller's to drain; cancellation no longer applies.
    pub async fn open(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<OpenedBody, FetchError> {
        let cancelled = || FetchError::Cancelled {
            url: url.to_string(),
        };

        let permit = self
            .throttler
            .acquire(cancel)
            .await
            .map_err(|_| cancelled())?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            response = self.transport.get(url) => response,
        }
        .map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

        if !(200..=299).contains(&response.status) {
            return Err(FetchError::BadStatus {
                url: url.to_string(),
                code: response.status,
            });
        }

        debug!(url, status = response.status, "response head received");
        Ok(OpenedBody {
            url: url.to_string(),
            body: response.body,
            permit,
        })
    }

    /// Fetch `url` into memory, piping it through `processors` when any are
    /// configured. The throttle permit is held until processing finishes.
    pub async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
        processors: &ProcessorChain,
        is_animated: bool,
    ) -> Result<Vec<u8>, FetchError> {
        let (bytes, permit) =
            self.open(url, cancel).await?.collect_holding().await?;
        if processors.is_empty() {
            return Ok(bytes);
        }

        let chain = processors.clone();
        let processed = tokio::task::spawn_blocking(move || {
            if is_animated {
                chain.apply_animation(&bytes)
            } else {
                chain.apply_static(&bytes)
            }
        })
        .await;
        drop(permit);

        let processing_failed = |source| FetchError::ProcessingFailed {
            url: url.to_string(),
            source,
        };
        match processed {
            Ok(result) => result.map_err(processing_failed),
            Err(join) => {
                Err(processing_failed(ProcessorError::Aborted(join.to_string())))
            }
        }
    }
}
