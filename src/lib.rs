//! Fetches prebuilt native binaries for Node.js addons.
//!
//! Given a package, a runtime, and a target ABI, the library locates a
//! matching prebuilt archive in the project's `prebuilds/` directory or a
//! shared cache, downloads it from the release origin on a miss, extracts
//! it, and returns the absolute path of the native binary. Downloads are
//! promoted into the cache atomically so concurrent or interrupted runs never
//! leave a partial archive behind.

mod abi;
mod cache;
mod error;
mod fetch;
mod fs;
mod observability;
mod options;
mod package;
mod paths;
mod pipeline;
mod unpack;
mod url;
mod validate;
#[doc(hidden)]
pub mod test_support;

pub use abi::{AbiProbe, PROBE_SCRIPT, ProbeOutput, ProcessAbiProbe, resolve_abi};
pub use cache::{CacheLock, CacheTier, probe_cache, resolve_cache_dir};
pub use error::{
    ConfigError, ConfigResult, NetworkFailure, PrebuildError, PrebuildErrorKind, PrebuildResult,
    TargetIdentity,
};
pub use fetch::Fetcher;
pub use observability::{LOGGER_TARGET, Logger, TracingLogger};
pub use options::{BuildOptions, DEFAULT_FETCH_TIMEOUT, Platform, RuntimeKind, UrlSettings};
pub use package::PackageInfo;
pub use paths::{CachePaths, LOCAL_PREBUILDS_DIR, TEMP_SUFFIX};
pub use pipeline::{fetch_prebuild, fetch_prebuild_blocking, fetch_prebuild_with};
pub use unpack::{ArchiveEntry, EntryKind, EntryMatcher, NativeSuffixMatcher, Unpacker};
pub use url::DownloadUrl;
pub use validate::{BinaryValidator, DynamicLoadValidator, ValidationFailure};

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use color_eyre::eyre::eyre;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

/// Captures prebuild settings supplied via `PREBUILD_*` environment
/// variables or configuration files.
///
/// Every field is optional; unset fields keep the [`BuildOptions`] defaults.
///
/// # Examples
/// ```
/// use prebuild_fetch::PrebuildEnvCfg;
///
/// let cfg = PrebuildEnvCfg::default();
/// assert!(cfg.abi.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, OrthoConfig, Default)]
#[ortho_config(prefix = "PREBUILD")]
pub struct PrebuildEnvCfg {
    /// Runtime name, `node` or `electron`.
    pub runtime: Option<String>,
    /// Target ABI; discovered for Electron when unset.
    pub abi: Option<u32>,
    /// ABI of the process that would load the binary.
    pub host_abi: Option<u32>,
    /// Operating system override.
    pub platform: Option<String>,
    /// Architecture override.
    pub arch: Option<String>,
    /// C library flavour override, for example `musl`.
    pub libc: Option<String>,
    /// Extraction destination.
    pub path: Option<Utf8PathBuf>,
    /// Root of the consuming project.
    pub project_root: Option<Utf8PathBuf>,
    /// Shared cache root.
    pub cache_dir: Option<Utf8PathBuf>,
    /// Skips the project-local `prebuilds/` tier.
    pub nolocal: Option<bool>,
    /// Serialises downloads of the same archive across processes.
    pub lock: Option<bool>,
    /// Full download URL template.
    pub download: Option<String>,
    /// Mirror host replacing the GitHub release layout.
    pub host_mirror: Option<String>,
    /// Prefix put before the version in release tags.
    pub tag_prefix: Option<String>,
    /// Selects the `Debug` build configuration.
    pub debug: Option<bool>,
    /// Origin timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// File-name suffix identifying the native binary inside the archive.
    pub binary_suffix: Option<String>,
}

impl PrebuildEnvCfg {
    /// Loads configuration from environment variables and configuration files
    /// without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns an error when a value cannot be parsed.
    pub fn load() -> ConfigResult<Self> {
        let args = [OsString::from("prebuild-fetch")];
        Self::load_from_iter(args).map_err(|err| ConfigError::from(eyre!(err)))
    }

    /// Returns the configured project root, defaulting to the working
    /// directory.
    #[must_use]
    pub fn project_root(&self) -> Utf8PathBuf {
        self.project_root
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("."))
    }

    /// Builds pipeline options for `package` from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the runtime name is unknown or the timeout is
    /// zero.
    pub fn to_options(&self, package: PackageInfo) -> ConfigResult<BuildOptions> {
        let mut options = BuildOptions::new(package);
        options.project_root = self.project_root();

        self.apply_target(&mut options)?;
        self.apply_paths(&mut options);
        self.apply_url(&mut options);
        self.apply_fetch(&mut options)?;

        Ok(options)
    }

    fn apply_target(&self, options: &mut BuildOptions) -> ConfigResult<()> {
        if let Some(ref runtime) = self.runtime {
            options.runtime = runtime.parse()?;
        }
        options.abi = self.abi;
        options.host_abi = self.host_abi;
        if let Some(ref os) = self.platform {
            options.platform.os.clone_from(os);
        }
        if let Some(ref arch) = self.arch {
            options.platform.arch.clone_from(arch);
        }
        if let Some(ref libc) = self.libc {
            options.platform.libc.clone_from(libc);
        }
        Ok(())
    }

    fn apply_paths(&self, options: &mut BuildOptions) {
        if let Some(ref path) = self.path {
            options.destination.clone_from(path);
        }
        if let Some(ref dir) = self.cache_dir {
            options.cache_dir.clone_from(dir);
        }
        options.disable_local_cache = self.nolocal.unwrap_or(false);
        options.lock_shared_cache = self.lock.unwrap_or(false);
        if let Some(ref suffix) = self.binary_suffix {
            options.entry_matcher = Some(Arc::new(NativeSuffixMatcher::new(suffix.as_str())));
        }
    }

    fn apply_url(&self, options: &mut BuildOptions) {
        options.url.download.clone_from(&self.download);
        options.url.host_mirror.clone_from(&self.host_mirror);
        if let Some(ref prefix) = self.tag_prefix {
            options.url.tag_prefix.clone_from(prefix);
        }
        options.url.debug = self.debug.unwrap_or(false);
    }

    fn apply_fetch(&self, options: &mut BuildOptions) -> ConfigResult<()> {
        match self.timeout_secs {
            Some(0) => Err(ConfigError::from(eyre!(
                "PREBUILD_TIMEOUT_SECS must be greater than zero"
            ))),
            Some(secs) => {
                options.fetch_timeout = Duration::from_secs(secs);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Loads configuration and `package.json` from the project root and runs the
/// pipeline to completion, returning the extracted binary's path.
///
/// # Errors
///
/// Returns an error when configuration or the manifest cannot be loaded, or
/// when any pipeline stage fails.
pub fn run() -> PrebuildResult<Utf8PathBuf> {
    let cfg = PrebuildEnvCfg::load()?;
    let package = PackageInfo::from_manifest(&cfg.project_root().join("package.json"))?;
    let mut options = cfg.to_options(package)?;
    fetch_prebuild_blocking(&mut options)
}
