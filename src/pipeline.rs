//! Sequences ABI discovery, cache probing, fetching, and unpacking.

use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use color_eyre::eyre::Context;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::abi::{AbiProbe, ProcessAbiProbe, resolve_abi};
use crate::cache::{CacheLock, CacheTier, probe_cache, probe_shared};
use crate::error::{ConfigError, PrebuildError, PrebuildResult};
use crate::fetch::Fetcher;
use crate::observability::PIPELINE_TARGET;
use crate::options::BuildOptions;
use crate::paths::CachePaths;
use crate::unpack::{NativeSuffixMatcher, Unpacker};
use crate::url::DownloadUrl;

/// Resolves, fetches if needed, and unpacks the prebuilt binary described by
/// `options`, returning the absolute path of the extracted binary.
///
/// The secondary runtime's ABI is discovered with [`ProcessAbiProbe`] and
/// written back into `options.abi`.
///
/// # Errors
///
/// Returns the first stage failure; see [`PrebuildError`] for the variants.
///
/// # Examples
///
/// ```no_run
/// use prebuild_fetch::{BuildOptions, PackageInfo, fetch_prebuild};
///
/// # async fn run() -> Result<(), prebuild_fetch::PrebuildError> {
/// let mut options = BuildOptions::new(
///     PackageInfo::new("leveldown", "5.6.0").with_repository("Level/leveldown"),
/// );
/// options.abi = Some(93);
/// options.destination = "build".into();
/// let binary = fetch_prebuild(&mut options).await?;
/// println!("{binary}");
/// # Ok(())
/// # }
/// ```
pub async fn fetch_prebuild(options: &mut BuildOptions) -> PrebuildResult<Utf8PathBuf> {
    fetch_prebuild_with(options, &ProcessAbiProbe).await
}

/// Runs the pipeline with a caller-supplied [`AbiProbe`].
///
/// # Errors
///
/// Returns the first stage failure; see [`PrebuildError`] for the variants.
pub async fn fetch_prebuild_with<P: AbiProbe>(
    options: &mut BuildOptions,
    probe: &P,
) -> PrebuildResult<Utf8PathBuf> {
    resolve_abi(options, probe).await?;

    let abi = options.target_abi()?;
    let url = DownloadUrl::resolve(options, abi)?;
    let paths = CachePaths::resolve(&url, &options.cache_dir, &options.project_root);
    info!(target: PIPELINE_TARGET, url = %url, abi, "resolving prebuild");

    let tier = probe_cache(&paths, options.disable_local_cache, options.logger.as_ref()).await;
    let archive = match tier.archive_path(&paths) {
        Some(path) => path.to_path_buf(),
        None => fetch_into_cache(options, &url, &paths, abi).await?,
    };
    debug!(target: PIPELINE_TARGET, tier = tier.as_str(), archive = %archive, "archive ready");

    unpacker_for(options, abi)
        .unpack(&archive, &options.destination, options.logger.as_ref())
        .await
}

/// Runs [`fetch_prebuild`] on a dedicated current-thread runtime.
///
/// # Errors
///
/// Returns [`PrebuildError::Config`] when the runtime cannot be built and
/// otherwise the first stage failure.
pub fn fetch_prebuild_blocking(options: &mut BuildOptions) -> PrebuildResult<Utf8PathBuf> {
    build_runtime()?.block_on(fetch_prebuild(options))
}

fn build_runtime() -> PrebuildResult<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime for prebuild fetch")
        .map_err(|err| PrebuildError::from(ConfigError::from(err)))
}

async fn fetch_into_cache(
    options: &BuildOptions,
    url: &DownloadUrl,
    paths: &CachePaths,
    abi: u32,
) -> PrebuildResult<Utf8PathBuf> {
    let fetcher = Fetcher::new(options.fetch_timeout)?;
    let target = options.target_identity(abi);
    let logger = options.logger.as_ref();
    if !options.lock_shared_cache {
        return fetcher.fetch(url, paths, &target, logger).await;
    }

    let _lock = lock_entry(paths).await?;
    if probe_shared(paths, logger).await == CacheTier::Shared {
        debug!(target: PIPELINE_TARGET, path = %paths.shared_file, "entry populated while waiting for lock");
        return Ok(paths.shared_file.clone());
    }
    fetcher.fetch(url, paths, &target, logger).await
}

async fn lock_entry(paths: &CachePaths) -> PrebuildResult<CacheLock> {
    let dir = paths.shared_dir().to_path_buf();
    let key = paths.cache_key().to_owned();
    let lock_dir = dir.clone();
    tokio::task::spawn_blocking(move || CacheLock::acquire_exclusive(&dir, &key))
        .await
        .map_err(io::Error::other)
        .and_then(|result| result)
        .map_err(|err| PrebuildError::file_system("failed to lock cache entry", lock_dir, err))
}

fn unpacker_for(options: &BuildOptions, abi: u32) -> Unpacker {
    let matcher = options
        .entry_matcher
        .clone()
        .unwrap_or_else(|| Arc::new(NativeSuffixMatcher::default()));
    let unpacker = Unpacker::new(matcher);
    if options.host_abi == Some(abi) {
        unpacker.with_validator(Arc::clone(&options.validator))
    } else {
        unpacker
    }
}
