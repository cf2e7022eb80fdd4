//! Cross-process advisory locking for shared cache entries.
//!
//! On Unix systems the lock is a `flock(2)` on a file under `.locks/`. On
//! other platforms acquisition always succeeds without coordinating.

use camino::Utf8Path;
use std::fs::{File, OpenOptions};
use std::io;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Subdirectory within the cache for lock files.
const LOCKS_SUBDIR: &str = ".locks";

/// Guard that holds a cache entry lock until dropped.
#[derive(Debug)]
pub struct CacheLock {
    _file: File,
}

impl CacheLock {
    /// Acquires an exclusive lock on the cache entry named `key`, blocking
    /// until any other holder releases it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or the lock cannot
    /// be acquired.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use camino::Utf8Path;
    /// use prebuild_fetch::CacheLock;
    ///
    /// let cache_dir = Utf8Path::new("/tmp/prebuilds");
    /// let _lock = CacheLock::acquire_exclusive(cache_dir, "3f2a1c-addon-v1.0.0-node-v93-linux-x64.tar.gz")?;
    /// # Ok::<(), std::io::Error>(())
    /// ```
    pub fn acquire_exclusive(cache_dir: &Utf8Path, key: &str) -> io::Result<Self> {
        let locks_dir = cache_dir.join(LOCKS_SUBDIR);
        std::fs::create_dir_all(&locks_dir)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(locks_dir.join(format!("{key}.lock")))?;
        lock_file(&file)?;
        Ok(Self { _file: file })
    }
}

#[cfg(unix)]
fn lock_file(file: &File) -> io::Result<()> {
    // SAFETY: `file` is an open descriptor borrowed for the duration of the
    // call and is not closed or moved while `flock` runs.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
#[expect(
    clippy::unnecessary_wraps,
    reason = "mirrors the fallible Unix implementation"
)]
const fn lock_file(_file: &File) -> io::Result<()> {
    Ok(())
}
