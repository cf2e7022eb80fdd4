//! Resolves the shared cache root.
//!
//! Prebuilt archives share the npm cache by default so every project on the
//! machine reuses the same downloads.

use camino::Utf8PathBuf;
use std::path::PathBuf;

/// Subdirectory of an npm cache holding prebuilt archives.
const CACHE_SUBDIR: &str = "_prebuilds";

/// Resolves the shared cache directory from the environment.
///
/// The resolution order is:
///
/// 1. `PREBUILD_CACHE_DIR` if set and valid UTF-8
/// 2. `$npm_config_cache/_prebuilds` when npm exports its cache location
/// 3. `%APPDATA%/npm-cache/_prebuilds` when `APPDATA` is set
/// 4. `~/.npm/_prebuilds`
/// 5. `<system temp>/prebuild-fetch/_prebuilds` as last resort
///
/// # Examples
///
/// ```
/// use prebuild_fetch::resolve_cache_dir;
///
/// let cache_dir = resolve_cache_dir();
/// assert!(!cache_dir.as_str().is_empty());
/// ```
#[must_use]
pub fn resolve_cache_dir() -> Utf8PathBuf {
    resolve_from_env("PREBUILD_CACHE_DIR")
        .or_else(|| resolve_from_env("npm_config_cache").map(|dir| dir.join(CACHE_SUBDIR)))
        .or_else(|| {
            resolve_from_env("APPDATA").map(|dir| dir.join("npm-cache").join(CACHE_SUBDIR))
        })
        .or_else(resolve_from_home)
        .unwrap_or_else(resolve_from_temp)
}

/// Reads a non-blank UTF-8 path from `key`.
fn resolve_from_env(key: &str) -> Option<Utf8PathBuf> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Utf8PathBuf::from_path_buf(PathBuf::from(trimmed)).ok()
}

fn resolve_from_home() -> Option<Utf8PathBuf> {
    let home = dirs::home_dir()?;
    let path = Utf8PathBuf::from_path_buf(home).ok()?;
    Some(path.join(".npm").join(CACHE_SUBDIR))
}

fn resolve_from_temp() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
        .join("prebuild-fetch")
        .join(CACHE_SUBDIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_env::with_vars;

    #[test]
    fn explicit_cache_dir_wins() {
        let expected = "/custom/prebuild/cache";
        let result = with_vars(
            [
                ("PREBUILD_CACHE_DIR", Some(expected)),
                ("npm_config_cache", Some("/home/user/.npm")),
            ],
            resolve_cache_dir,
        );
        assert_eq!(result.as_str(), expected);
    }

    #[test]
    fn npm_cache_is_used_when_explicit_dir_unset() {
        let result = with_vars(
            [
                ("PREBUILD_CACHE_DIR", None::<&str>),
                ("npm_config_cache", Some("/home/user/.npm")),
            ],
            resolve_cache_dir,
        );
        assert_eq!(result.as_str(), "/home/user/.npm/_prebuilds");
    }

    #[test]
    fn blank_values_are_ignored() {
        let result = with_vars(
            [
                ("PREBUILD_CACHE_DIR", Some("   ")),
                ("npm_config_cache", Some("")),
                ("APPDATA", Some("/appdata")),
            ],
            resolve_cache_dir,
        );
        assert_eq!(result.as_str(), "/appdata/npm-cache/_prebuilds");
    }

    #[test]
    fn falls_back_to_home_npm_directory() {
        let result = with_vars(
            [
                ("PREBUILD_CACHE_DIR", None::<&str>),
                ("npm_config_cache", None::<&str>),
                ("APPDATA", None::<&str>),
            ],
            resolve_cache_dir,
        );
        assert!(
            result.as_str().ends_with(".npm/_prebuilds")
                || result.as_str().ends_with("prebuild-fetch/_prebuilds"),
            "unexpected cache dir: {result}"
        );
    }
}
