//! Extracts a cached archive and locates the native binary inside it.
//!
//! The archive is a gzip-compressed tarball. Extraction and the optional load
//! check block, so both run on Tokio's blocking pool.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::{debug, info};

use crate::error::{PrebuildError, PrebuildResult};
use crate::fs::add_permissions;
use crate::observability::{Logger, UNPACK_TARGET};
use crate::validate::BinaryValidator;

const FILE_MODE_BITS: u32 = 0o644;
const DIR_MODE_BITS: u32 = 0o755;

/// What an archive entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// A symbolic or hard link.
    Link,
    /// Anything else the archive format can carry.
    Other,
}

impl From<EntryType> for EntryKind {
    fn from(entry_type: EntryType) -> Self {
        if entry_type.is_file() || entry_type.is_contiguous() {
            Self::File
        } else if entry_type.is_dir() {
            Self::Directory
        } else if entry_type.is_symlink() || entry_type.is_hard_link() {
            Self::Link
        } else {
            Self::Other
        }
    }
}

/// An archive entry as it is extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path of the entry inside the archive.
    pub name: String,
    /// Entry type.
    pub kind: EntryKind,
    /// Size of the entry's data in bytes.
    pub size: u64,
}

/// Selects the archive entry that is the native binary.
///
/// Every extracted entry is offered in archive order; when several match, the
/// last one wins.
///
/// # Examples
///
/// ```
/// use prebuild_fetch::{ArchiveEntry, EntryKind, EntryMatcher};
///
/// let matcher = |entry: &ArchiveEntry| entry.name.ends_with(".dylib");
/// let entry = ArchiveEntry { name: "lib/addon.dylib".into(), kind: EntryKind::File, size: 1 };
/// assert!(matcher.matches(&entry));
/// ```
pub trait EntryMatcher: Send + Sync {
    /// Reports whether `entry` is the binary of interest.
    fn matches(&self, entry: &ArchiveEntry) -> bool;
}

impl<F> EntryMatcher for F
where
    F: Fn(&ArchiveEntry) -> bool + Send + Sync,
{
    fn matches(&self, entry: &ArchiveEntry) -> bool {
        self(entry)
    }
}

/// Matches non-directory entries by a case-insensitive name suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSuffixMatcher {
    suffix: String,
}

impl NativeSuffixMatcher {
    /// Matches names ending with `suffix`, ignoring ASCII case.
    #[must_use]
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into().to_ascii_lowercase(),
        }
    }
}

impl Default for NativeSuffixMatcher {
    fn default() -> Self {
        Self::new(".node")
    }
}

impl EntryMatcher for NativeSuffixMatcher {
    fn matches(&self, entry: &ArchiveEntry) -> bool {
        entry.kind != EntryKind::Directory
            && entry.name.to_ascii_lowercase().ends_with(&self.suffix)
    }
}

/// Extracts archives and resolves the binary they carry.
#[derive(Clone)]
pub struct Unpacker {
    matcher: Arc<dyn EntryMatcher>,
    validator: Option<Arc<dyn BinaryValidator>>,
}

impl Unpacker {
    /// Creates an unpacker that selects entries with `matcher` and performs no
    /// load check.
    #[must_use]
    pub fn new(matcher: Arc<dyn EntryMatcher>) -> Self {
        Self {
            matcher,
            validator: None,
        }
    }

    /// Loads the resolved binary with `validator` before returning it.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn BinaryValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Extracts `archive` into `destination` and returns the absolute path of
    /// the matched binary.
    ///
    /// # Errors
    ///
    /// - [`PrebuildError::InvalidArchive`] when the archive cannot be decoded
    ///   or no entry matched.
    /// - [`PrebuildError::FileSystem`] when the archive cannot be opened or
    ///   the destination cannot be written.
    /// - [`PrebuildError::LoadValidation`] when a configured validator rejects
    ///   the binary.
    pub async fn unpack(
        &self,
        archive: &Utf8Path,
        destination: &Utf8Path,
        logger: &dyn Logger,
    ) -> PrebuildResult<Utf8PathBuf> {
        logger.info(&format!("unpacking @ {archive}"));
        let matcher = Arc::clone(&self.matcher);
        let archive_path = archive.to_path_buf();
        let destination_path = destination.to_path_buf();
        let entry = run_blocking(archive, move || {
            extract(&archive_path, &destination_path, matcher.as_ref())
        })
        .await?
        .ok_or_else(|| PrebuildError::InvalidArchive {
            archive: archive.to_path_buf(),
            reason: "no matching binary entry".to_owned(),
        })?;

        let resolved = resolve_entry(archive, destination, &entry)?;
        logger.info(&format!("unpack resolved to {resolved}"));
        info!(target: UNPACK_TARGET, archive = %archive, path = %resolved, "binary extracted");

        if let Some(validator) = &self.validator {
            let check = Arc::clone(validator);
            let target = resolved.clone();
            run_blocking(&resolved, move || Ok(check.validate(&target)))
                .await?
                .map_err(|failure| PrebuildError::LoadValidation {
                    path: resolved.clone(),
                    reason: failure.to_string(),
                })?;
            logger.info(&format!("unpack loaded {resolved} successfully"));
        }

        Ok(resolved)
    }
}

/// Runs `task` on the blocking pool, reporting a lost task against `path`.
async fn run_blocking<T, F>(path: &Utf8Path, task: F) -> PrebuildResult<T>
where
    F: FnOnce() -> PrebuildResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|err| {
        PrebuildError::file_system("blocking task failed", path, io::Error::other(err))
    })?
}

/// Extracts every entry and returns the path of the last matching one.
fn extract(
    archive: &Utf8Path,
    destination: &Utf8Path,
    matcher: &dyn EntryMatcher,
) -> PrebuildResult<Option<PathBuf>> {
    let file = File::open(archive)
        .map_err(|err| PrebuildError::file_system("failed to open archive", archive, err))?;
    std::fs::create_dir_all(destination).map_err(|err| {
        PrebuildError::file_system("failed to create destination", destination, err)
    })?;

    let mut tarball = Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = tarball
        .entries()
        .map_err(|err| invalid_archive(archive, &err))?;

    let mut matched = None;
    for item in entries {
        let mut entry = item.map_err(|err| invalid_archive(archive, &err))?;
        let raw = entry
            .path()
            .map_err(|err| invalid_archive(archive, &err))?
            .into_owned();
        let path = normalise_entry_path(&raw);
        let candidate = ArchiveEntry {
            name: path.to_string_lossy().into_owned(),
            kind: EntryKind::from(entry.header().entry_type()),
            size: entry.header().size().unwrap_or(0),
        };

        let unpacked = entry
            .unpack_in(destination.as_std_path())
            .map_err(|err| unpack_error(archive, destination, err))?;
        if !unpacked {
            debug!(target: UNPACK_TARGET, entry = %raw.display(), "skipping entry outside destination");
            continue;
        }
        relax_permissions(destination, &path, candidate.kind);

        if matcher.matches(&candidate) {
            matched = Some(path);
        }
    }
    Ok(matched)
}

/// Keeps only the normal components of an entry path, matching where
/// `unpack_in` places the entry under the destination.
fn normalise_entry_path(raw: &Path) -> PathBuf {
    raw.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn relax_permissions(destination: &Utf8Path, entry: &Path, kind: EntryKind) {
    let bits = match kind {
        EntryKind::File => FILE_MODE_BITS,
        EntryKind::Directory => DIR_MODE_BITS,
        EntryKind::Link | EntryKind::Other => return,
    };
    let Some(relative) = Utf8Path::from_path(entry) else {
        return;
    };
    let target = destination.join(relative);
    if let Err(err) = add_permissions(&target, bits) {
        debug!(target: UNPACK_TARGET, path = %target, error = %err, "could not adjust permissions");
    }
}

fn resolve_entry(
    archive: &Utf8Path,
    destination: &Utf8Path,
    entry: &Path,
) -> PrebuildResult<Utf8PathBuf> {
    let joined = destination.as_std_path().join(entry);
    let absolute = std::path::absolute(&joined)
        .map_err(|err| PrebuildError::file_system("failed to resolve binary path", destination, err))?;
    Utf8PathBuf::from_path_buf(absolute).map_err(|path| PrebuildError::InvalidArchive {
        archive: archive.to_path_buf(),
        reason: format!("entry path {} is not valid UTF-8", path.display()),
    })
}

fn invalid_archive(archive: &Utf8Path, err: &io::Error) -> PrebuildError {
    PrebuildError::InvalidArchive {
        archive: archive.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Decode failures surface with data-shaped error kinds; anything else came
/// from writing the destination.
fn unpack_error(archive: &Utf8Path, destination: &Utf8Path, err: io::Error) -> PrebuildError {
    match err.kind() {
        io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::Other => invalid_archive(archive, &err),
        _ => PrebuildError::file_system("failed to extract archive", destination, err),
    }
}
