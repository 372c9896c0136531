//! On-disk cache infra.
//!
//! Entries are plain files below a versioned root; the path is derived from
//! the asset URL alone (plus an optional processing variant).

pub mod key;
pub mod root;
pub mod store;

pub use key::{CacheKey, CacheKeyDeriver, sanitize, sized_url};
pub use root::CacheRoot;
pub use store::DiskStore;
