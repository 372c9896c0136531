//! Network side of the pipeline: throttling, transport, and byte processors.

pub mod fetcher;
pub mod processor;
pub mod throttle;
pub mod transport;

pub use fetcher::{Fetcher, OpenedBody};
pub use processor::{CenterCrop, Downscale, Processor, ProcessorChain};
pub use throttle::{ThrottleCancelled, ThrottlePermit, Throttler};
pub use transport::{BodyStream, HttpTransport, Transport, TransportResponse};
