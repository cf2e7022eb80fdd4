//! Caller-supplied configuration consumed by the pipeline.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use color_eyre::eyre::eyre;

use crate::cache::resolve_cache_dir;
use crate::error::{ConfigError, ConfigResult, TargetIdentity};
use crate::observability::{Logger, TracingLogger};
use crate::package::PackageInfo;
use crate::unpack::EntryMatcher;
use crate::validate::{BinaryValidator, DynamicLoadValidator};

/// Default bound on waiting for the origin, both for the response head and
/// between body chunks.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime the native binary is built against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Primary runtime; its ABI is supplied by the caller.
    #[default]
    Node,
    /// Secondary runtime whose ABI is discovered by running its executable.
    Electron,
}

impl RuntimeKind {
    /// Returns the name used in download URLs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Electron => "electron",
        }
    }

    /// Reports whether the ABI must be discovered through a subprocess.
    #[must_use]
    pub const fn requires_abi_probe(self) -> bool {
        matches!(self, Self::Electron)
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "node" => Ok(Self::Node),
            "electron" => Ok(Self::Electron),
            other => Err(ConfigError::from(eyre!(
                "unknown runtime '{other}'; expected 'node' or 'electron'"
            ))),
        }
    }
}

/// Platform triple the binary targets, spelled the way download URLs
/// spell it (`linux`, `darwin`, `win32`; `x64`, `arm64`, `ia32`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Operating system.
    pub os: String,
    /// CPU architecture.
    pub arch: String,
    /// C library flavour, empty for the platform default.
    pub libc: String,
}

impl Platform {
    /// Describes the platform this process was compiled for.
    #[must_use]
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            "windows" => "win32",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "x64",
            "aarch64" => "arm64",
            "x86" => "ia32",
            "powerpc64" => "ppc64",
            other => other,
        };
        let libc = if cfg!(target_env = "musl") { "musl" } else { "" };
        Self {
            os: os.to_owned(),
            arch: arch.to_owned(),
            libc: libc.to_owned(),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

/// Controls how the download URL is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSettings {
    /// Full URL template replacing the default GitHub release layout.
    pub download: Option<String>,
    /// Mirror host serving `{tag_prefix}{version}/<archive>` paths.
    pub host_mirror: Option<String>,
    /// Prefix put before the version in release tags.
    pub tag_prefix: String,
    /// Selects `Debug` instead of `Release` for the `{configuration}` placeholder.
    pub debug: bool,
}

impl Default for UrlSettings {
    fn default() -> Self {
        Self {
            download: None,
            host_mirror: None,
            tag_prefix: "v".to_owned(),
            debug: false,
        }
    }
}

/// Everything the pipeline needs to resolve one prebuilt binary.
///
/// The pipeline only reads these options, except for `abi`, which it fills in
/// once when the runtime requires discovery.
///
/// # Examples
///
/// ```
/// use prebuild_fetch::{BuildOptions, PackageInfo, RuntimeKind};
///
/// let mut options = BuildOptions::new(
///     PackageInfo::new("leveldown", "5.6.0").with_repository("Level/leveldown"),
/// );
/// options.abi = Some(93);
/// options.destination = "build".into();
/// assert_eq!(options.runtime, RuntimeKind::Node);
/// ```
#[derive(Clone)]
pub struct BuildOptions {
    /// Package whose binary is resolved.
    pub package: PackageInfo,
    /// Runtime the binary is built against.
    pub runtime: RuntimeKind,
    /// Target ABI; discovered when absent for runtimes that require it.
    pub abi: Option<u32>,
    /// ABI of the current process; equality with `abi` enables the load check.
    pub host_abi: Option<u32>,
    /// Target platform triple.
    pub platform: Platform,
    /// Directory the archive is extracted into.
    pub destination: Utf8PathBuf,
    /// Root of the consuming project, used for the local `prebuilds/` tier.
    pub project_root: Utf8PathBuf,
    /// Root of the shared cache.
    pub cache_dir: Utf8PathBuf,
    /// Skips the project-local tier entirely.
    pub disable_local_cache: bool,
    /// Serialises downloads of the same artifact across processes.
    pub lock_shared_cache: bool,
    /// Bound on waiting for the origin.
    pub fetch_timeout: Duration,
    /// Download URL construction settings.
    pub url: UrlSettings,
    /// Overrides the default `.node` entry detection.
    pub entry_matcher: Option<Arc<dyn EntryMatcher>>,
    /// Performs the in-process load check.
    pub validator: Arc<dyn BinaryValidator>,
    /// Informational sink.
    pub logger: Arc<dyn Logger>,
}

impl BuildOptions {
    /// Creates options for `package` with defaults for every other field.
    #[must_use]
    pub fn new(package: PackageInfo) -> Self {
        Self {
            package,
            runtime: RuntimeKind::default(),
            abi: None,
            host_abi: None,
            platform: Platform::current(),
            destination: Utf8PathBuf::from("."),
            project_root: Utf8PathBuf::from("."),
            cache_dir: resolve_cache_dir(),
            disable_local_cache: false,
            lock_shared_cache: false,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            url: UrlSettings::default(),
            entry_matcher: None,
            validator: Arc::new(DynamicLoadValidator::default()),
            logger: Arc::new(TracingLogger),
        }
    }

    /// Returns the ABI the run targets: the explicit or discovered ABI, else
    /// the host ABI.
    ///
    /// # Errors
    ///
    /// Returns an error when neither is known.
    pub fn target_abi(&self) -> ConfigResult<u32> {
        self.abi.or(self.host_abi).ok_or_else(|| {
            ConfigError::from(eyre!(
                "no target ABI for runtime {}; set the ABI or the host ABI",
                self.runtime
            ))
        })
    }

    /// Describes the artifact for diagnostics.
    #[must_use]
    pub fn target_identity(&self, abi: u32) -> TargetIdentity {
        TargetIdentity {
            package: self.package.name.clone(),
            version: self.package.version.clone(),
            runtime: self.runtime.as_str().to_owned(),
            abi,
            platform: self.platform.os.clone(),
            arch: self.platform.arch.clone(),
            libc: self.platform.libc.clone(),
        }
    }
}

impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOptions")
            .field("package", &self.package)
            .field("runtime", &self.runtime)
            .field("abi", &self.abi)
            .field("host_abi", &self.host_abi)
            .field("platform", &self.platform)
            .field("destination", &self.destination)
            .field("project_root", &self.project_root)
            .field("cache_dir", &self.cache_dir)
            .field("disable_local_cache", &self.disable_local_cache)
            .field("lock_shared_cache", &self.lock_shared_cache)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("url", &self.url)
            .field("entry_matcher", &self.entry_matcher.is_some())
            .finish_non_exhaustive()
    }
}
