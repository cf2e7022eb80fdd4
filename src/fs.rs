//! Filesystem helpers that operate through capability handles.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs::Dir};

/// Resolves a path to an ambient directory handle paired with the relative
/// path component.
///
/// Absolute paths are opened relative to the ambient root; relative paths
/// reuse the current working directory.
#[cfg(unix)]
pub(crate) fn ambient_dir_and_path(path: &Utf8Path) -> io::Result<(Dir, Utf8PathBuf)> {
    if path.has_root() {
        let stripped = path
            .strip_prefix("/")
            .map_or_else(|_| path.to_path_buf(), Utf8Path::to_path_buf);
        let dir = Dir::open_ambient_dir("/", ambient_authority())?;
        Ok((dir, stripped))
    } else {
        let dir = Dir::open_ambient_dir(".", ambient_authority())?;
        Ok((dir, path.to_path_buf()))
    }
}

/// Adds the `bits` permission bits to `path` without clearing existing ones.
///
/// Symlinks are left alone since changing their mode would follow the link.
#[cfg(unix)]
pub(crate) fn add_permissions(path: &Utf8Path, bits: u32) -> io::Result<()> {
    use cap_std::fs::{Permissions, PermissionsExt};

    let (dir, relative) = ambient_dir_and_path(path)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }

    let metadata = dir.symlink_metadata(relative.as_std_path())?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mode = metadata.permissions().mode();
    if mode & bits == bits {
        return Ok(());
    }
    dir.set_permissions(relative.as_std_path(), Permissions::from_mode(mode | bits))
}

/// Permission bits are not adjusted on this platform.
#[cfg(not(unix))]
#[expect(
    clippy::unnecessary_wraps,
    reason = "mirrors the fallible Unix implementation"
)]
pub(crate) const fn add_permissions(_path: &Utf8Path, _bits: u32) -> io::Result<()> {
    Ok(())
}
