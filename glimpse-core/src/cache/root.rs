use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::config::CacheConfig;

/// Versioned cache root directory, `<parent>/<prefix>-<version>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheRoot {
    parent: PathBuf,
    prefix: String,
    version: String,
    path: PathBuf,
}

impl CacheRoot {
    pub fn new(
        parent: impl Into<PathBuf>,
        prefix: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let parent = parent.into();
        let prefix = prefix.into();
        let version = version.into();
        let path = parent.join(format!("{prefix}-{version}"));
        Self {
            parent,
            prefix,
            version,
            path,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.temp_root(), &config.prefix, &config.version)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Sweep stale roots, then make sure this root exists.
    pub fn open(self) -> io::Result<Self> {
        self.sweep_stale();
        fs::create_dir_all(&self.path)?;
        Ok(self)
    }

    /// Delete every `<prefix>-*` entry in the parent directory other than
    /// this root. Returns how many entries were removed.
    ///
    /// An unreadable parent directory is not an error; nothing is removed.
    pub fn sweep_stale(&self) -> usize {
        let entries = match fs::read_dir(&self.parent) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    parent = %self.parent.display(),
                    "cannot list cache parent directory: {err}"
                );
                return 0;
            }
        };

        let marker = format!("{}-", self.prefix);
        let mut removed = 0;

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&marker) || entry.path() == self.path {
                continue;
            }

            let path = entry.path();
            info!(path = %path.display(), "deleting old cache");
            let result = match entry.file_type() {
                Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path),
                _ => fs::remove_file(&path),
            };
            match result {
                Ok(()) => removed += 1,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        "failed to delete old cache: {err}"
                    )
                }
            }
        }

        removed
    }
}
