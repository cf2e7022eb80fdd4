//! Builds gzip-compressed tarballs for unpack and pipeline tests.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header};

#[derive(Debug, Clone)]
struct FixtureEntry {
    name: String,
    data: Vec<u8>,
    mode: u32,
    checked_path: bool,
}

/// Describes the entries of a test archive.
///
/// # Examples
/// ```
/// use prebuild_fetch::test_support::{ArchiveBuilder, utf8_temp_dir};
///
/// let (_guard, root) = utf8_temp_dir()?;
/// let archive = ArchiveBuilder::new()
///     .file("build/Release/addon.node", b"\x7fELF")
///     .write_to(&root.join("addon.tar.gz"))?;
/// assert!(archive.exists());
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    entries: Vec<FixtureEntry>,
}

impl ArchiveBuilder {
    /// Starts an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a regular file with mode `0o644`.
    #[must_use]
    pub fn file(self, name: &str, data: &[u8]) -> Self {
        self.file_with_mode(name, data, 0o644)
    }

    /// Adds a regular file with an explicit mode.
    #[must_use]
    pub fn file_with_mode(mut self, name: &str, data: &[u8], mode: u32) -> Self {
        self.entries.push(FixtureEntry {
            name: name.to_owned(),
            data: data.to_vec(),
            mode,
            checked_path: true,
        });
        self
    }

    /// Adds a file whose name is written verbatim, bypassing the path checks
    /// the tar builder applies. Used to model hostile archives.
    #[must_use]
    pub fn raw_file(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push(FixtureEntry {
            name: name.to_owned(),
            data: data.to_vec(),
            mode: 0o644,
            checked_path: false,
        });
        self
    }

    /// Encodes the archive into memory.
    ///
    /// # Errors
    ///
    /// Returns an error when an entry cannot be appended.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = Builder::new(encoder);
        for entry in &self.entries {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(entry.data.len() as u64);
            header.set_mode(entry.mode);
            if entry.checked_path {
                header.set_path(&entry.name)?;
            } else {
                for (slot, byte) in header
                    .as_old_mut()
                    .name
                    .iter_mut()
                    .zip(entry.name.as_bytes())
                {
                    *slot = *byte;
                }
            }
            header.set_cksum();
            builder.append(&header, entry.data.as_slice())?;
        }
        builder.into_inner()?.finish()
    }

    /// Writes the archive to `path`, creating parent directories, and returns
    /// the path.
    ///
    /// # Errors
    ///
    /// Returns an error when encoding or writing fails.
    pub fn write_to(&self, path: &Utf8Path) -> io::Result<Utf8PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes()?)?;
        Ok(path.to_path_buf())
    }
}
