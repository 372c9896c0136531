//! Display-thread marshalling and the surface images are rendered into.

pub mod queue;
pub mod target;

pub use queue::{Completion, DisplayJob, DisplayQueue, Marshal, Submission};
pub use target::DisplayTarget;
pub(crate) use target::present;
