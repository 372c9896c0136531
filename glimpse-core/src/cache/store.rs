use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use crate::cache::CacheKey;
use crate::error::StoreError;

/// Permission bits for cache entries: owner read/write, everyone read.
#[cfg(unix)]
const ENTRY_MODE: u32 = 0o644;

/// File-backed cache entries addressed by [`CacheKey`].
///
/// An entry exists when its file exists; there is no index, timestamp or
/// checksum. All methods are blocking and are meant to run on a blocking
/// worker, never on an async executor thread.
#[derive(Clone, Debug)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        key.as_path().is_file()
    }

    pub fn open(&self, key: &CacheKey) -> Result<File, StoreError> {
        File::open(key.as_path())
            .map_err(|err| StoreError::from_io(key.as_path(), err))
    }

    pub fn read(&self, key: &CacheKey) -> Result<Vec<u8>, StoreError> {
        std::fs::read(key.as_path())
            .map_err(|err| StoreError::from_io(key.as_path(), err))
    }

    /// Write `bytes` as the entry for `key`, replacing any existing entry.
    ///
    /// The bytes go to a temp file next to the entry which is then renamed
    /// into place, so concurrent writers of the same key never interleave and
    /// readers see either the old or the new entry.
    pub fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), StoreError> {
        let path = key.as_path();
        let dir = path.parent().unwrap_or(&self.root);

        let mut tmp = tempfile::Builder::new()
            .prefix(".pending-")
            .tempfile_in(dir)
            .map_err(|err| StoreError::from_io(dir, err))?;
        let written = tmp.write_all(bytes).and_then(|()| tmp.flush());
        written.map_err(|err| StoreError::from_io(tmp.path(), err))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(ENTRY_MODE))
                .map_err(|err| StoreError::from_io(tmp.path(), err))?;
        }

        tmp.persist(path)
            .map_err(|err| StoreError::from_io(path, err.error))?;
        Ok(())
    }

    /// Remove the entry for `key`. Removing a missing entry succeeds.
    pub fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
        match std::fs::remove_file(key.as_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::from_io(key.as_path(), err)),
        }
    }
}
