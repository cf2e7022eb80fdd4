//! Decides which cache tier, if any, already holds the archive.

use camino::Utf8Path;
use tracing::debug;

use crate::observability::{CACHE_TARGET, Logger};
use crate::paths::CachePaths;

/// Where the archive for a run was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// The consuming project ships the archive under `prebuilds/`.
    LocalProject,
    /// A previous run downloaded the archive into the shared cache.
    Shared,
    /// Neither tier holds the archive; it must be fetched.
    None,
}

impl CacheTier {
    /// Returns the archive path this tier refers to, or `None` on a miss.
    #[must_use]
    pub fn archive_path(self, paths: &CachePaths) -> Option<&Utf8Path> {
        match self {
            Self::LocalProject => Some(&paths.local_file),
            Self::Shared => Some(&paths.shared_file),
            Self::None => None,
        }
    }

    /// Returns the tier name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalProject => "local",
            Self::Shared => "shared",
            Self::None => "none",
        }
    }
}

/// Checks the project-local tier and then the shared tier.
///
/// When `disable_local_cache` is set the local path is never touched. Errors
/// from existence checks count as absence.
pub async fn probe_cache(
    paths: &CachePaths,
    disable_local_cache: bool,
    logger: &dyn Logger,
) -> CacheTier {
    if !disable_local_cache {
        logger.info(&format!("looking for local prebuild @ {}", paths.local_file));
        if exists(&paths.local_file).await {
            logger.info("found local prebuild");
            return CacheTier::LocalProject;
        }
    }

    probe_shared(paths, logger).await
}

/// Checks the shared tier only.
pub(crate) async fn probe_shared(paths: &CachePaths, logger: &dyn Logger) -> CacheTier {
    logger.info(&format!("looking for cached prebuild @ {}", paths.shared_file));
    if exists(&paths.shared_file).await {
        logger.info("found cached prebuild");
        return CacheTier::Shared;
    }
    CacheTier::None
}

async fn exists(path: &Utf8Path) -> bool {
    match tokio::fs::try_exists(path).await {
        Ok(found) => found,
        Err(err) => {
            debug!(
                target: CACHE_TARGET,
                path = %path,
                error = %err,
                "existence check failed; treating as absent"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::TracingLogger;
    use crate::test_support::utf8_temp_dir;
    use crate::url::DownloadUrl;
    use camino::Utf8PathBuf;

    fn paths(root: &Utf8Path) -> CachePaths {
        let url = DownloadUrl::from_raw("https://example.com/v1/addon-v1-node-v93-linux-x64.tar.gz");
        CachePaths::resolve(&url, &root.join("cache"), &root.join("project"))
    }

    fn touch(path: &Utf8PathBuf) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        std::fs::write(path, b"archive").expect("write archive");
    }

    #[tokio::test]
    async fn empty_caches_miss() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let tier = probe_cache(&paths(&root), false, &TracingLogger).await;
        assert_eq!(tier, CacheTier::None);
        assert!(tier.archive_path(&paths(&root)).is_none());
    }

    #[tokio::test]
    async fn local_tier_wins_over_shared() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let paths = paths(&root);
        touch(&paths.local_file);
        touch(&paths.shared_file);
        let tier = probe_cache(&paths, false, &TracingLogger).await;
        assert_eq!(tier, CacheTier::LocalProject);
        assert_eq!(tier.archive_path(&paths), Some(paths.local_file.as_path()));
    }

    #[tokio::test]
    async fn disabled_local_tier_falls_through_to_shared() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let paths = paths(&root);
        touch(&paths.local_file);
        touch(&paths.shared_file);
        let tier = probe_cache(&paths, true, &TracingLogger).await;
        assert_eq!(tier, CacheTier::Shared);
    }

    #[tokio::test]
    async fn disabled_local_tier_ignores_local_file() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let paths = paths(&root);
        touch(&paths.local_file);
        assert_eq!(probe_cache(&paths, true, &TracingLogger).await, CacheTier::None);
    }

    #[cfg(unix)]
    #[rstest::rstest]
    #[case::shared_present(true, CacheTier::Shared)]
    #[case::shared_absent(false, CacheTier::None)]
    #[tokio::test]
    async fn failed_existence_check_counts_as_absent(
        #[case] shared_present: bool,
        #[case] expected: CacheTier,
    ) {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let paths = paths(&root);
        // A regular file where the `prebuilds` directory belongs makes the
        // local check fail with ENOTDIR rather than report a miss.
        let blocker = paths.local_file.parent().expect("prebuilds dir").to_path_buf();
        touch(&blocker);
        if shared_present {
            touch(&paths.shared_file);
        }

        assert!(tokio::fs::try_exists(&paths.local_file).await.is_err());
        assert_eq!(probe_cache(&paths, false, &TracingLogger).await, expected);
    }
}
