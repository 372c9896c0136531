use std::{
    fmt,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;
use url::Url;

// Letters are any `L*` category and digits are `Nd` only, so numeric
// symbols such as `²` or `Ⅻ` are replaced.
static UNSAFE_PATH_CHAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^\p{L}\p{Nd}#.]").expect("path char regex should compile")
});

/// On-disk location of a cached asset.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(PathBuf);

impl CacheKey {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey").field(&self.0).finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for CacheKey {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Make a string safe to use as a single path component.
///
/// Letters, digits, `#` and `.` are kept; every other character becomes `_`.
/// The output has the same number of characters as the input.
pub fn sanitize(input: &str) -> String {
    UNSAFE_PATH_CHAR.replace_all(input, "_").into_owned()
}

/// Derives [`CacheKey`]s below a cache root.
///
/// Keys have the shape `root/<host>/<sanitized path?query>[#<variant>]`.
/// URLs that fail to parse (or have no host) are sanitized whole and placed
/// directly under the root.
///
/// Distinct URLs only collide when sanitization folds different characters
/// onto `_` (e.g. `/a-b` and `/a_b`); that collision class is accepted.
#[derive(Clone, Debug)]
pub struct CacheKeyDeriver {
    root: PathBuf,
}

impl CacheKeyDeriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive the key for `url`, creating the per-host directory if needed.
    ///
    /// `variant` distinguishes processed copies of the same URL. It is
    /// sanitized and appended after a `#`, which never occurs in an escaped
    /// path or query, so variant keys cannot shadow plain ones.
    ///
    /// Directory creation failures are logged and otherwise ignored; the
    /// subsequent read or write reports the real error.
    pub fn derive(&self, url: &str, variant: Option<&str>) -> CacheKey {
        let suffix = variant
            .filter(|v| !v.is_empty())
            .map(|v| format!("#{}", sanitize(v)))
            .unwrap_or_default();

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(_) => {
                return CacheKey(
                    self.root.join(format!("{}{}", sanitize(url), suffix)),
                );
            }
        };

        let dir = match parsed.host_str().filter(|host| !host.is_empty()) {
            Some(host) => self.root.join(sanitize(host)),
            None => {
                return CacheKey(
                    self.root.join(format!("{}{}", sanitize(url), suffix)),
                );
            }
        };

        if let Err(err) = std::fs::create_dir_all(&dir) {
            error!(
                dir = %dir.display(),
                "failed to create cache host directory: {err}"
            );
        }

        let path_and_query =
            format!("{}?{}", parsed.path(), parsed.query().unwrap_or(""));
        CacheKey(dir.join(format!("{}{}", sanitize(&path_and_query), suffix)))
    }
}

/// Append `width`/`height` query parameters to `url`.
pub fn sized_url(url: &str, width: u32, height: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}width={width}&height={height}")
}
