//! Deterministic cache locations derived from a download URL.
//!
//! Nothing here touches the filesystem; the same URL and roots always map to
//! the same paths.

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha512};

use crate::url::DownloadUrl;

/// Directory under the project root holding locally built artifacts.
pub const LOCAL_PREBUILDS_DIR: &str = "prebuilds";

/// Suffix of in-flight downloads.
pub const TEMP_SUFFIX: &str = ".tmp";

const DIGEST_CHARS: usize = 6;

/// The paths a run may read or write for one download URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    /// Archive location in the shared cache.
    pub shared_file: Utf8PathBuf,
    /// Archive location in the consuming project.
    pub local_file: Utf8PathBuf,
    /// File-name prefix for the download temp file, created beside
    /// `shared_file` so promotion is a same-directory rename.
    pub temp_prefix: String,
}

impl CachePaths {
    /// Computes the cache paths for `url`.
    ///
    /// The shared file name is the first six hex characters of the URL's
    /// SHA-512 digest followed by the URL basename with every run of
    /// characters outside `[A-Za-z0-9.]` replaced by `-`.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use prebuild_fetch::{CachePaths, DownloadUrl};
    ///
    /// let url = DownloadUrl::from_raw("https://example.com/v1.0.0/addon-v1.0.0-node-v93-linux-x64.tar.gz");
    /// let paths = CachePaths::resolve(&url, Utf8Path::new("/cache"), Utf8Path::new("/project"));
    /// assert!(paths.shared_file.as_str().ends_with("-addon-v1.0.0-node-v93-linux-x64.tar.gz"));
    /// assert_eq!(
    ///     paths.local_file.as_str(),
    ///     "/project/prebuilds/addon-v1.0.0-node-v93-linux-x64.tar.gz"
    /// );
    /// ```
    #[must_use]
    pub fn resolve(url: &DownloadUrl, cache_dir: &Utf8Path, project_root: &Utf8Path) -> Self {
        let shared_name = format!("{}-{}", url_digest(url), sanitise(url.basename()));
        let temp_prefix = format!("{shared_name}.{}-", std::process::id());
        Self {
            shared_file: cache_dir.join(shared_name),
            local_file: project_root.join(LOCAL_PREBUILDS_DIR).join(url.basename()),
            temp_prefix,
        }
    }

    /// Returns the directory holding the shared file and its temp files.
    #[must_use]
    pub fn shared_dir(&self) -> &Utf8Path {
        self.shared_file.parent().unwrap_or_else(|| Utf8Path::new("."))
    }

    /// Returns the shared file name, used as the cross-process lock key.
    #[must_use]
    pub fn cache_key(&self) -> &str {
        self.shared_file.file_name().unwrap_or(self.shared_file.as_str())
    }
}

fn url_digest(url: &DownloadUrl) -> String {
    let digest = Sha512::digest(url.as_str().as_bytes());
    format!("{digest:x}").chars().take(DIGEST_CHARS).collect()
}

fn sanitise(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("addon-v1.0.0.tar.gz", "addon-v1.0.0.tar.gz")]
    #[case("addon_v1@@1.tar.gz", "addon-v1-1.tar.gz")]
    #[case("a  b", "a-b")]
    fn sanitise_collapses_runs(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitise(raw), expected);
    }

    #[test]
    fn resolve_is_deterministic_and_colocates_temp_files() {
        let url = DownloadUrl::from_raw("https://example.com/v1/addon-v1-node-v93-linux-x64.tar.gz");
        let first = CachePaths::resolve(&url, Utf8Path::new("/cache"), Utf8Path::new("."));
        let second = CachePaths::resolve(&url, Utf8Path::new("/cache"), Utf8Path::new("."));
        assert_eq!(first, second);
        assert_eq!(first.shared_dir(), Utf8Path::new("/cache"));
        assert!(first.temp_prefix.starts_with(first.cache_key()));
        assert_eq!(first.cache_key().len(), DIGEST_CHARS + 1 + url.basename().len());
    }

    #[test]
    fn different_urls_with_same_basename_do_not_collide() {
        let a = DownloadUrl::from_raw("https://a.example.com/addon.tar.gz");
        let b = DownloadUrl::from_raw("https://b.example.com/addon.tar.gz");
        let root = Utf8Path::new("/cache");
        assert_ne!(
            CachePaths::resolve(&a, root, root).shared_file,
            CachePaths::resolve(&b, root, root).shared_file
        );
    }
}
