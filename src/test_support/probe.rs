//! Scripted ABI probe for tests that must not spawn a runtime.

use std::io;
use std::sync::{Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};

use crate::abi::{AbiProbe, ProbeOutput};

/// [`AbiProbe`] that returns a fixed output and records its invocations.
///
/// # Examples
/// ```
/// use prebuild_fetch::test_support::StaticAbiProbe;
///
/// let probe = StaticAbiProbe::printing("87");
/// assert_eq!(probe.calls(), 0);
/// ```
#[derive(Debug)]
pub struct StaticAbiProbe {
    output: ProbeOutput,
    invocations: Mutex<Vec<Utf8PathBuf>>,
}

impl StaticAbiProbe {
    /// Succeeds with `stdout` and an empty stderr.
    #[must_use]
    pub fn printing(stdout: &str) -> Self {
        Self::with_output(ProbeOutput {
            success: true,
            stdout: stdout.to_owned(),
            stderr: String::new(),
        })
    }

    /// Returns `output` verbatim.
    #[must_use]
    pub fn with_output(output: ProbeOutput) -> Self {
        Self {
            output,
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Number of times the probe ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.lock().len()
    }

    /// Executable passed to the most recent run.
    #[must_use]
    pub fn last_executable(&self) -> Option<Utf8PathBuf> {
        self.lock().last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Utf8PathBuf>> {
        self.invocations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AbiProbe for StaticAbiProbe {
    async fn run(&self, executable: &Utf8Path, _script: &Utf8Path) -> io::Result<ProbeOutput> {
        self.lock().push(executable.to_path_buf());
        Ok(self.output.clone())
    }
}
