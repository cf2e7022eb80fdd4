//! Temporary directory helpers with UTF-8 paths.

use std::io;

use camino::Utf8PathBuf;
use tempfile::TempDir;

/// Creates a temporary directory and returns its guard with the UTF-8 path.
///
/// The directory is removed when the guard drops.
///
/// # Errors
///
/// Returns an error when the directory cannot be created or its path is not
/// valid UTF-8.
///
/// # Examples
/// ```
/// use prebuild_fetch::test_support::utf8_temp_dir;
///
/// let (_guard, root) = utf8_temp_dir()?;
/// assert!(root.is_dir());
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn utf8_temp_dir() -> io::Result<(TempDir, Utf8PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).map_err(|path| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("temporary directory {} is not valid UTF-8", path.display()),
        )
    })?;
    Ok((dir, path))
}
