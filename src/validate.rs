//! In-process load check for extracted binaries.

use std::fmt;

use camino::Utf8Path;

/// Reason a binary failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure(String);

impl ValidationFailure {
    /// Wraps a loader diagnostic.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// Returns the loader diagnostic.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Smoke-tests a freshly extracted binary by loading it.
///
/// Runs on the blocking pool; implementations may block.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use prebuild_fetch::{BinaryValidator, ValidationFailure};
///
/// let reject_all = |path: &Utf8Path| -> Result<(), ValidationFailure> {
///     Err(ValidationFailure::new(format!("{path} rejected")))
/// };
/// assert!(reject_all.validate(Utf8Path::new("/tmp/addon.node")).is_err());
/// ```
pub trait BinaryValidator: Send + Sync {
    /// Loads the binary at `path`.
    ///
    /// # Errors
    ///
    /// Returns the loader diagnostic when the binary cannot be loaded.
    fn validate(&self, path: &Utf8Path) -> Result<(), ValidationFailure>;
}

impl<F> BinaryValidator for F
where
    F: Fn(&Utf8Path) -> Result<(), ValidationFailure> + Send + Sync,
{
    fn validate(&self, path: &Utf8Path) -> Result<(), ValidationFailure> {
        self(path)
    }
}

/// Loads the binary with the platform dynamic loader and optionally checks
/// that it exports the given symbols.
///
/// Symbols are bound lazily because native addons reference functions that
/// only the host runtime provides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicLoadValidator {
    symbols: Vec<String>,
}

impl DynamicLoadValidator {
    /// Requires each of `symbols` to be exported.
    #[must_use]
    pub fn with_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(unix)]
impl BinaryValidator for DynamicLoadValidator {
    fn validate(&self, path: &Utf8Path) -> Result<(), ValidationFailure> {
        let library = loader::Library::open(path)?;
        self.symbols
            .iter()
            .try_for_each(|symbol| library.require_symbol(symbol))
    }
}

#[cfg(not(unix))]
impl BinaryValidator for DynamicLoadValidator {
    fn validate(&self, path: &Utf8Path) -> Result<(), ValidationFailure> {
        tracing::debug!(
            target: crate::observability::UNPACK_TARGET,
            path = %path,
            "dynamic load check unsupported on this platform; skipping"
        );
        Ok(())
    }
}

#[cfg(unix)]
mod loader {
    use std::ffi::{CStr, CString, c_void};

    use camino::Utf8Path;

    use super::ValidationFailure;

    /// Handle closed on drop.
    pub(super) struct Library {
        handle: *mut c_void,
    }

    impl Library {
        pub(super) fn open(path: &Utf8Path) -> Result<Self, ValidationFailure> {
            let c_path = CString::new(path.as_str())
                .map_err(|err| ValidationFailure::new(format!("invalid path: {err}")))?;
            // SAFETY: `c_path` is a valid NUL-terminated string that outlives
            // the call.
            let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL) };
            if handle.is_null() {
                return Err(ValidationFailure::new(last_error()));
            }
            Ok(Self { handle })
        }

        pub(super) fn require_symbol(&self, name: &str) -> Result<(), ValidationFailure> {
            let c_name = CString::new(name)
                .map_err(|err| ValidationFailure::new(format!("invalid symbol name: {err}")))?;
            // SAFETY: `self.handle` is a live handle from `dlopen`; `dlerror`
            // is called first to clear stale state.
            let symbol = unsafe {
                libc::dlerror();
                libc::dlsym(self.handle, c_name.as_ptr())
            };
            if symbol.is_null() {
                return Err(ValidationFailure::new(format!(
                    "missing symbol {name}: {}",
                    last_error()
                )));
            }
            Ok(())
        }
    }

    impl Drop for Library {
        fn drop(&mut self) {
            // SAFETY: the handle came from a successful `dlopen` and is closed
            // exactly once.
            unsafe {
                libc::dlclose(self.handle);
            }
        }
    }

    fn last_error() -> String {
        // SAFETY: `dlerror` returns either null or a pointer to a
        // NUL-terminated string valid until the next loader call on this
        // thread; it is copied immediately.
        unsafe {
            let err = libc::dlerror();
            if err.is_null() {
                "unknown loader error".to_owned()
            } else {
                CStr::from_ptr(err).to_string_lossy().into_owned()
            }
        }
    }
}
