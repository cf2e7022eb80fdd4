//! Downloads an archive into the shared cache.
//!
//! The body is streamed into a temp file beside the cache entry and renamed
//! into place only once it is complete and synced, so the cache never exposes
//! a partial archive. Dropping the temp path on any failure removes it.

use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use futures::StreamExt;
use reqwest::StatusCode;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ConfigError, NetworkFailure, PrebuildError, PrebuildResult, TargetIdentity};
use crate::observability::{FETCH_TARGET, Logger};
use crate::paths::{CachePaths, TEMP_SUFFIX};
use crate::url::DownloadUrl;

/// Streams prebuilt archives from the origin into the shared cache.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Fetcher {
    /// Creates a fetcher whose waits for the response head and for each body
    /// chunk are bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> PrebuildResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("prebuild-fetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ConfigError::from(eyre!(err).wrap_err("failed to build HTTP client")))?;
        Ok(Self { client, timeout })
    }

    /// Downloads `url` and promotes it to `paths.shared_file`.
    ///
    /// Returns the shared file path on success.
    ///
    /// # Errors
    ///
    /// - [`PrebuildError::NoPrebuilt`] when the origin answers with a status
    ///   other than 200.
    /// - [`PrebuildError::Network`] on connection failure, timeout, or a
    ///   broken body stream.
    /// - [`PrebuildError::FileSystem`] when the cache directory, temp file,
    ///   write, or rename fails.
    pub async fn fetch(
        &self,
        url: &DownloadUrl,
        paths: &CachePaths,
        target: &TargetIdentity,
        logger: &dyn Logger,
    ) -> PrebuildResult<Utf8PathBuf> {
        ensure_cache_dir(paths.shared_dir(), logger).await?;

        logger.http("request", &format!("GET {url}"));
        let response = self.send(url).await?;
        let status = response.status();
        logger.http(status.as_str(), url.as_str());
        if status != StatusCode::OK {
            return Err(PrebuildError::NoPrebuilt {
                target: Box::new(target.clone()),
                status: status.as_u16(),
            });
        }

        let (mut file, temp_path) = create_temp_file(paths).await?;
        logger.info(&format!("downloading to @ {}", temp_path.display()));
        let written = self.stream_body(url, response, &mut file, &temp_path).await?;
        drop(file);

        promote(temp_path, &paths.shared_file).await?;
        logger.info(&format!("renaming to @ {}", paths.shared_file));
        info!(
            target: FETCH_TARGET,
            url = %url,
            path = %paths.shared_file,
            bytes = written,
            "archive cached"
        );
        Ok(paths.shared_file.clone())
    }

    async fn send(&self, url: &DownloadUrl) -> PrebuildResult<reqwest::Response> {
        tokio::time::timeout(self.timeout, self.client.get(url.as_str()).send())
            .await
            .map_err(|_| PrebuildError::network(url.as_str(), NetworkFailure::Timeout(self.timeout)))?
            .map_err(|err| PrebuildError::network(url.as_str(), err))
    }

    async fn stream_body(
        &self,
        url: &DownloadUrl,
        response: reqwest::Response,
        file: &mut tokio::fs::File,
        temp_path: &TempPath,
    ) -> PrebuildResult<u64> {
        let temp = utf8_lossy(temp_path);
        let mut body = std::pin::pin!(response.bytes_stream());
        let mut written = 0_u64;
        loop {
            let next = tokio::time::timeout(self.timeout, body.next())
                .await
                .map_err(|_| {
                    PrebuildError::network(url.as_str(), NetworkFailure::Timeout(self.timeout))
                })?;
            let Some(chunk) = next else { break };
            let bytes = chunk.map_err(|err| PrebuildError::network(url.as_str(), err))?;
            file.write_all(&bytes)
                .await
                .map_err(|err| PrebuildError::file_system("failed to write download", &temp, err))?;
            written = written.saturating_add(bytes.len() as u64);
        }

        file.flush()
            .await
            .map_err(|err| PrebuildError::file_system("failed to flush download", &temp, err))?;
        file.sync_all()
            .await
            .map_err(|err| PrebuildError::file_system("failed to sync download", &temp, err))?;
        Ok(written)
    }
}

/// Creates the shared cache directory, tolerating concurrent creation.
async fn ensure_cache_dir(dir: &Utf8Path, logger: &dyn Logger) -> PrebuildResult<()> {
    if matches!(tokio::fs::try_exists(dir).await, Ok(true)) {
        return Ok(());
    }
    logger.info("prebuild cache directory missing, creating it...");
    match tokio::fs::create_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(PrebuildError::file_system(
            "failed to create cache directory",
            dir,
            err,
        )),
    }
}

async fn create_temp_file(paths: &CachePaths) -> PrebuildResult<(tokio::fs::File, TempPath)> {
    let dir = paths.shared_dir().to_path_buf();
    let prefix = paths.temp_prefix.clone();
    let error_dir = dir.clone();
    let named = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&dir)
    })
    .await
    .map_err(io::Error::other)
    .and_then(|result| result)
    .map_err(|err| PrebuildError::file_system("failed to create temp file", error_dir, err))?;

    let (file, temp_path) = named.into_parts();
    Ok((tokio::fs::File::from_std(file), temp_path))
}

/// Atomically renames the completed temp file onto `shared_file`.
///
/// A failed rename still succeeds when `shared_file` exists, because a
/// concurrent run promoted the same archive first.
async fn promote(temp_path: TempPath, shared_file: &Utf8Path) -> PrebuildResult<()> {
    let target = shared_file.to_path_buf();
    let outcome = tokio::task::spawn_blocking(move || temp_path.persist(&target))
        .await
        .map_err(|err| {
            PrebuildError::file_system("failed to promote download", shared_file, io::Error::other(err))
        })?;

    match outcome {
        Ok(()) => Ok(()),
        Err(persist_err) => {
            let source = persist_err.error;
            drop(persist_err.path);
            if matches!(tokio::fs::try_exists(shared_file).await, Ok(true)) {
                debug!(
                    target: FETCH_TARGET,
                    path = %shared_file,
                    error = %source,
                    "rename failed but the cache entry exists; keeping it"
                );
                Ok(())
            } else {
                Err(PrebuildError::file_system(
                    "failed to promote download",
                    shared_file,
                    source,
                ))
            }
        }
    }
}

fn utf8_lossy(path: &TempPath) -> Utf8PathBuf {
    Utf8PathBuf::from(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::TracingLogger;
    use crate::test_support::utf8_temp_dir;

    fn cache_paths(root: &Utf8Path) -> CachePaths {
        let url = DownloadUrl::from_raw("https://example.com/v1/addon-v1-node-v93-linux-x64.tar.gz");
        CachePaths::resolve(&url, &root.join("nested").join("cache"), root)
    }

    #[tokio::test]
    async fn ensure_cache_dir_is_idempotent() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let dir = root.join("a").join("b");
        ensure_cache_dir(&dir, &TracingLogger).await.expect("first create");
        ensure_cache_dir(&dir, &TracingLogger).await.expect("second create");
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn temp_file_lives_beside_the_cache_entry() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let paths = cache_paths(&root);
        ensure_cache_dir(paths.shared_dir(), &TracingLogger)
            .await
            .expect("create cache dir");
        let (_file, temp_path) = create_temp_file(&paths).await.expect("temp file");
        let name = temp_path
            .file_name()
            .and_then(|n| n.to_str())
            .expect("temp file name");
        assert!(name.starts_with(&paths.temp_prefix));
        assert!(name.ends_with(TEMP_SUFFIX));
        assert_eq!(
            temp_path.parent(),
            Some(paths.shared_dir().as_std_path())
        );
    }

    #[tokio::test]
    async fn dropped_temp_file_is_removed() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let paths = cache_paths(&root);
        ensure_cache_dir(paths.shared_dir(), &TracingLogger)
            .await
            .expect("create cache dir");
        let (file, temp_path) = create_temp_file(&paths).await.expect("temp file");
        let location = temp_path.to_path_buf();
        drop(file);
        drop(temp_path);
        assert!(!location.exists());
    }

    #[tokio::test]
    async fn promote_moves_the_archive_into_place() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let paths = cache_paths(&root);
        ensure_cache_dir(paths.shared_dir(), &TracingLogger)
            .await
            .expect("create cache dir");
        let (mut file, temp_path) = create_temp_file(&paths).await.expect("temp file");
        file.write_all(b"archive").await.expect("write");
        file.sync_all().await.expect("sync");
        drop(file);
        let location = temp_path.to_path_buf();

        promote(temp_path, &paths.shared_file).await.expect("promote");
        assert_eq!(std::fs::read(&paths.shared_file).expect("read"), b"archive");
        assert!(!location.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_promotion_onto_existing_entry_is_tolerated() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let paths = cache_paths(&root);
        ensure_cache_dir(paths.shared_dir(), &TracingLogger)
            .await
            .expect("create cache dir");
        // A directory at the destination makes the rename fail while the
        // entry still exists.
        std::fs::create_dir(&paths.shared_file).expect("occupy destination");
        std::fs::write(paths.shared_file.join("child"), b"x").expect("populate");
        let (file, temp_path) = create_temp_file(&paths).await.expect("temp file");
        drop(file);
        let location = temp_path.to_path_buf();

        promote(temp_path, &paths.shared_file)
            .await
            .expect("existing entry counts as success");
        assert!(!location.exists(), "temp file must be cleaned up");
    }

    #[tokio::test]
    async fn failed_promotion_without_entry_is_a_file_system_error() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let paths = cache_paths(&root);
        ensure_cache_dir(paths.shared_dir(), &TracingLogger)
            .await
            .expect("create cache dir");
        let (file, temp_path) = create_temp_file(&paths).await.expect("temp file");
        drop(file);
        let missing_dir_target = root.join("missing").join("entry.tar.gz");

        let err = promote(temp_path, &missing_dir_target)
            .await
            .expect_err("rename into a missing directory fails");
        assert_eq!(err.kind(), crate::PrebuildErrorKind::FileSystem);
    }
}
