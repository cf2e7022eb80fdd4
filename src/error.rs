//! Domain error types for the prebuilt binary pipeline.

use std::fmt;
use std::io;
use std::time::Duration;

use camino::Utf8PathBuf;
use color_eyre::Report;
use thiserror::Error;

/// Result alias for operations that may return a [`PrebuildError`].
pub type PrebuildResult<T> = std::result::Result<T, PrebuildError>;

/// Result alias for configuration fallible operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Identifies the artifact a run was looking for.
///
/// Carried by [`PrebuildError::NoPrebuilt`] so callers can report precisely
/// which combination the origin does not publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIdentity {
    /// Package name as published.
    pub package: String,
    /// Package version.
    pub version: String,
    /// Runtime the binary is built for.
    pub runtime: String,
    /// Target ABI number.
    pub abi: u32,
    /// Operating system component of the platform triple.
    pub platform: String,
    /// CPU architecture component of the platform triple.
    pub arch: String,
    /// C library suffix, empty when the platform has a single libc flavour.
    pub libc: String,
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "package={}@{} runtime={} abi={} platform={} arch={} libc={}",
            self.package, self.version, self.runtime, self.abi, self.platform, self.arch, self.libc
        )
    }
}

/// Network failure modes surfaced through [`PrebuildError::Network`].
#[derive(Debug, Error)]
pub enum NetworkFailure {
    /// The HTTP client reported an error while connecting or streaming.
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    /// The origin did not respond within the configured timeout.
    #[error("no response within {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Coarse categories for [`PrebuildError`] so callers can branch without
/// matching on variant payloads.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PrebuildErrorKind {
    /// Secondary-runtime ABI discovery failed.
    AbiProbe,
    /// Connection, timeout, or stream failure during fetch.
    Network,
    /// The origin does not publish an artifact for this target.
    NoPrebuilt,
    /// Cache or destination filesystem operation failed.
    FileSystem,
    /// The archive was undecodable or lacked the binary entry.
    InvalidArchive,
    /// The extracted binary failed the in-process load check.
    LoadValidation,
    /// Configuration could not be loaded or is incomplete.
    Config,
}

/// Top-level error exposed by the crate.
#[derive(Debug, Error)]
pub enum PrebuildError {
    /// The secondary runtime could not report its ABI.
    #[error("failed to determine the {runtime} ABI using {executable}: {reason}")]
    AbiProbe {
        /// Runtime that was probed.
        runtime: String,
        /// Executable that was invoked.
        executable: Utf8PathBuf,
        /// Human-readable failure description.
        reason: String,
    },
    /// The request to the origin failed before a complete body arrived.
    #[error("request to {url} failed: {failure}")]
    Network {
        /// URL that was requested.
        url: String,
        /// Underlying failure.
        #[source]
        failure: NetworkFailure,
    },
    /// The origin answered without an artifact for this target.
    #[error("no prebuilt binaries found ({target}, status={status})")]
    NoPrebuilt {
        /// The target the run was resolving.
        target: Box<TargetIdentity>,
        /// HTTP status returned by the origin.
        status: u16,
    },
    /// A filesystem operation on the cache or destination failed.
    #[error("{context}: {path}")]
    FileSystem {
        /// Operation that failed.
        context: &'static str,
        /// Path the operation targeted.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The archive could not be used.
    #[error("invalid archive {archive}: {reason}")]
    InvalidArchive {
        /// Archive that was unpacked.
        archive: Utf8PathBuf,
        /// Why the archive was rejected.
        reason: String,
    },
    /// The extracted binary could not be loaded into the current process.
    #[error("failed to load {path}: {reason}")]
    LoadValidation {
        /// Resolved binary path.
        path: Utf8PathBuf,
        /// Loader diagnostic.
        reason: String,
    },
    /// Configuration parsing failed or left a required field unset.
    #[error("configuration invalid")]
    Config(#[from] ConfigError),
}

impl PrebuildError {
    /// Creates a filesystem error for the given operation and path.
    #[must_use]
    pub fn file_system(
        context: &'static str,
        path: impl Into<Utf8PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::FileSystem {
            context,
            path: path.into(),
            source,
        }
    }

    /// Creates a network error for the given URL.
    #[must_use]
    pub fn network(url: impl Into<String>, failure: impl Into<NetworkFailure>) -> Self {
        Self::Network {
            url: url.into(),
            failure: failure.into(),
        }
    }

    /// Returns the semantic category for this failure.
    #[must_use]
    pub const fn kind(&self) -> PrebuildErrorKind {
        match self {
            Self::AbiProbe { .. } => PrebuildErrorKind::AbiProbe,
            Self::Network { .. } => PrebuildErrorKind::Network,
            Self::NoPrebuilt { .. } => PrebuildErrorKind::NoPrebuilt,
            Self::FileSystem { .. } => PrebuildErrorKind::FileSystem,
            Self::InvalidArchive { .. } => PrebuildErrorKind::InvalidArchive,
            Self::LoadValidation { .. } => PrebuildErrorKind::LoadValidation,
            Self::Config(_) => PrebuildErrorKind::Config,
        }
    }
}

/// Captures configuration failures.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConfigError(#[from] Report);
