use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed error produced by a [`Transport`](crate::fetch::Transport).
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transport failure for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("bad status code {code} for {url}")]
    BadStatus { url: String, code: u16 },

    #[error("processing failed for {url}: {source}")]
    ProcessingFailed {
        url: String,
        #[source]
        source: ProcessorError,
    },

    #[error("fetch cancelled for {url}")]
    Cancelled { url: String },
}

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("failed to decode source image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("processor {name} failed: {reason}")]
    Processor { name: String, reason: String },

    #[error("failed to encode processed image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("processing task aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed image data: {0}")]
    Malformed(#[from] image::ImageError),

    #[error("image data ended before a complete image was decoded")]
    Truncated,

    #[error("decoded image has invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("animation contains no frames")]
    EmptyAnimation,

    #[error("decoder no longer accepts input")]
    Closed,

    #[error("failed to read image data: {0}")]
    Read(#[source] std::io::Error),

    #[error("decode task aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cache entry not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(path)
        } else {
            StoreError::Io { path, source: err }
        }
    }
}

#[derive(Error, Debug)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("failed to create cache root {}: {source}", path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[source] TransportError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarshalError {
    #[error("display queue is shut down")]
    Closed,
}

/// Pipeline step at which a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Lookup,
    Throttle,
    Fetch,
    Process,
    Persist,
    Decode,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Lookup => "lookup",
            Stage::Throttle => "throttle",
            Stage::Fetch => "fetch",
            Stage::Process => "process",
            Stage::Persist => "persist",
            Stage::Decode => "decode",
            Stage::Render => "render",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    BadStatus { code: u16 },
    ProcessingFailed,
    DecodeFailed,
    Cancelled,
    Io,
}

#[derive(Error, Debug)]
pub enum PipelineCause {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),
}

/// A failure anywhere in the fetch/persist/decode pipeline, tagged with the
/// URL and the stage it happened in.
#[derive(Error, Debug)]
#[error("{stage} failed for {url}: {cause}")]
pub struct PipelineError {
    pub url: String,
    pub stage: Stage,
    #[source]
    pub cause: PipelineCause,
}

impl PipelineError {
    pub fn new(
        url: impl Into<String>,
        stage: Stage,
        cause: impl Into<PipelineCause>,
    ) -> Self {
        Self {
            url: url.into(),
            stage,
            cause: cause.into(),
        }
    }

    /// Wrap a fetch failure, deriving the stage from the failure itself.
    pub fn from_fetch(err: FetchError) -> Self {
        let (url, stage) = match &err {
            FetchError::Cancelled { url } => (url.clone(), Stage::Throttle),
            FetchError::ProcessingFailed { url, .. } => {
                (url.clone(), Stage::Process)
            }
            FetchError::Transport { url, .. }
            | FetchError::BadStatus { url, .. } => (url.clone(), Stage::Fetch),
        };
        Self::new(url, stage, err)
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.cause {
            PipelineCause::Fetch(FetchError::Transport { .. }) => {
                ErrorKind::Transport
            }
            PipelineCause::Fetch(FetchError::BadStatus { code, .. }) => {
                ErrorKind::BadStatus { code: *code }
            }
            PipelineCause::Fetch(FetchError::ProcessingFailed { .. }) => {
                ErrorKind::ProcessingFailed
            }
            PipelineCause::Fetch(FetchError::Cancelled { .. }) => {
                ErrorKind::Cancelled
            }
            PipelineCause::Decode(_) => ErrorKind::DecodeFailed,
            PipelineCause::Store(_) | PipelineCause::Marshal(_) => ErrorKind::Io,
        }
    }
}
