//! Discovers the ABI of a secondary runtime by asking its executable.

use std::future::Future;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::error::{PrebuildError, PrebuildResult};
use crate::observability::ABI_TARGET;
use crate::options::BuildOptions;

/// Script that prints the runtime's module ABI and exits.
pub const PROBE_SCRIPT: &str = "console.log(process.versions.modules);process.exit(0)";

const PROBE_SCRIPT_NAME: &str = "prebuild_fetch_abi_probe.js";
const DEFAULT_EXECUTABLE: &str = "electron";

/// Captured result of running the probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutput {
    /// Whether the process exited successfully.
    pub success: bool,
    /// Everything written to stdout.
    pub stdout: String,
    /// Everything written to stderr.
    pub stderr: String,
}

/// Runs a runtime executable with the probe script preloaded.
pub trait AbiProbe: Send + Sync {
    /// Invokes `executable --require <script>` and captures its output.
    ///
    /// # Errors
    ///
    /// Returns an error when the process cannot be spawned.
    fn run(
        &self,
        executable: &Utf8Path,
        script: &Utf8Path,
    ) -> impl Future<Output = io::Result<ProbeOutput>> + Send;
}

/// [`AbiProbe`] that spawns a real subprocess.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessAbiProbe;

impl AbiProbe for ProcessAbiProbe {
    async fn run(&self, executable: &Utf8Path, script: &Utf8Path) -> io::Result<ProbeOutput> {
        let output = tokio::process::Command::new(executable.as_std_path())
            .arg("--require")
            .arg(script.as_std_path())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(ProbeOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Fills in `options.abi` by probing the runtime executable.
///
/// Does nothing when the runtime needs no discovery or the ABI is already
/// set.
///
/// # Errors
///
/// Returns [`PrebuildError::AbiProbe`] when the probe script cannot be
/// written, the executable cannot be spawned, exits unsuccessfully, writes to
/// stderr, or prints anything other than a single integer.
pub async fn resolve_abi<P: AbiProbe>(options: &mut BuildOptions, probe: &P) -> PrebuildResult<()> {
    if !options.runtime.requires_abi_probe() || options.abi.is_some() {
        return Ok(());
    }

    let runtime = options.runtime;
    let executable = locate_executable(&options.project_root).await;
    options
        .logger
        .info(&format!("fetching {runtime} abi from \"{executable}\""));
    let failure = |reason: String| PrebuildError::AbiProbe {
        runtime: runtime.as_str().to_owned(),
        executable: executable.clone(),
        reason,
    };

    let script = write_probe_script()
        .await
        .map_err(|err| failure(format!("failed to write probe script: {err}")))?;
    let output = probe
        .run(&executable, &script)
        .await
        .map_err(|err| failure(format!("failed to run: {err}")))?;
    let abi = parse_probe_output(&output).map_err(failure)?;

    options
        .logger
        .info(&format!("found {runtime} abi version {abi}"));
    info!(target: ABI_TARGET, runtime = %runtime, abi, "runtime ABI discovered");
    options.abi = Some(abi);
    Ok(())
}

/// Prefers the project's own copy of the runtime over the one on `PATH`.
async fn locate_executable(project_root: &Utf8Path) -> Utf8PathBuf {
    let local = project_root
        .join("node_modules")
        .join(".bin")
        .join(DEFAULT_EXECUTABLE);
    if matches!(tokio::fs::try_exists(&local).await, Ok(true)) {
        local
    } else {
        debug!(target: ABI_TARGET, candidate = %local, "no project-local runtime; using PATH");
        Utf8PathBuf::from(DEFAULT_EXECUTABLE)
    }
}

async fn write_probe_script() -> io::Result<Utf8PathBuf> {
    let dir = Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|path| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not valid UTF-8", path.display()),
        )
    })?;
    write_probe_script_in(&dir).await
}

/// Writes the probe script under `dir` at a fixed name.
///
/// The name is predictable and `dir` is usually shared, so the final path
/// component is opened without following symlinks.
async fn write_probe_script_in(dir: &Utf8Path) -> io::Result<Utf8PathBuf> {
    use tokio::io::AsyncWriteExt;

    let path = dir.join(PROBE_SCRIPT_NAME);
    let mut open = tokio::fs::OpenOptions::new();
    open.write(true).create(true).truncate(true);
    #[cfg(unix)]
    open.custom_flags(libc::O_NOFOLLOW);
    let mut file = open.open(&path).await?;
    file.write_all(PROBE_SCRIPT.as_bytes()).await?;
    file.flush().await?;
    Ok(path)
}

fn parse_probe_output(output: &ProbeOutput) -> Result<u32, String> {
    if !output.success {
        return Err(format!(
            "probe exited unsuccessfully: {}",
            output.stderr.trim()
        ));
    }
    if !output.stderr.is_empty() {
        return Err(output.stderr.trim().to_owned());
    }
    let printed = output.stdout.trim();
    printed
        .parse::<u32>()
        .map_err(|_| format!("expected an ABI number, got {printed:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PrebuildErrorKind;
    use crate::options::RuntimeKind;
    use crate::package::PackageInfo;
    use crate::test_support::{StaticAbiProbe, utf8_temp_dir};
    use rstest::rstest;

    fn electron_options(root: &Utf8Path) -> BuildOptions {
        let mut options = BuildOptions::new(PackageInfo::new("addon", "1.0.0"));
        options.runtime = RuntimeKind::Electron;
        options.project_root = root.to_path_buf();
        options
    }

    #[rstest]
    #[case("87\n", 87)]
    #[case("  116  ", 116)]
    fn parses_printed_abi(#[case] stdout: &str, #[case] expected: u32) {
        let output = ProbeOutput {
            success: true,
            stdout: stdout.to_owned(),
            stderr: String::new(),
        };
        assert_eq!(parse_probe_output(&output), Ok(expected));
    }

    #[rstest]
    #[case(true, "not-a-number", "")]
    #[case(true, "87\n88\n", "")]
    #[case(true, "87", "warning: deprecated")]
    #[case(false, "87", "")]
    fn rejects_unusable_output(#[case] success: bool, #[case] stdout: &str, #[case] stderr: &str) {
        let output = ProbeOutput {
            success,
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
        };
        assert!(parse_probe_output(&output).is_err());
    }

    #[tokio::test]
    async fn node_runtime_skips_probe() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let mut options = electron_options(&root);
        options.runtime = RuntimeKind::Node;
        let probe = StaticAbiProbe::printing("87");
        resolve_abi(&mut options, &probe).await.expect("no probe");
        assert_eq!(options.abi, None);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn explicit_abi_skips_probe() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let mut options = electron_options(&root);
        options.abi = Some(99);
        let probe = StaticAbiProbe::printing("87");
        resolve_abi(&mut options, &probe).await.expect("no probe");
        assert_eq!(options.abi, Some(99));
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn electron_abi_is_written_back() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let mut options = electron_options(&root);
        let probe = StaticAbiProbe::printing("87\n");
        resolve_abi(&mut options, &probe).await.expect("probe");
        assert_eq!(options.abi, Some(87));
        assert_eq!(probe.calls(), 1);
        assert_eq!(probe.last_executable().as_deref(), Some(Utf8Path::new("electron")));
    }

    #[tokio::test]
    async fn project_local_runtime_is_preferred() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let local = root.join("node_modules").join(".bin").join("electron");
        std::fs::create_dir_all(local.parent().expect("parent")).expect("bin dir");
        std::fs::write(&local, b"").expect("fake executable");
        let mut options = electron_options(&root);
        let probe = StaticAbiProbe::printing("87");
        resolve_abi(&mut options, &probe).await.expect("probe");
        assert_eq!(probe.last_executable(), Some(local));
    }

    #[tokio::test]
    async fn garbage_output_is_an_abi_probe_error() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let mut options = electron_options(&root);
        let err = resolve_abi(&mut options, &StaticAbiProbe::printing("not-a-number"))
            .await
            .expect_err("garbage output");
        assert_eq!(err.kind(), PrebuildErrorKind::AbiProbe);
        assert_eq!(options.abi, None);
    }

    #[rstest]
    #[case::failed_exit(false, "87", "Error: cannot find module")]
    #[case::stderr_noise(true, "87", "(node:1) DeprecationWarning")]
    #[tokio::test]
    async fn unusable_probe_runs_are_abi_probe_errors(
        #[case] success: bool,
        #[case] stdout: &str,
        #[case] stderr: &str,
    ) {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let mut options = electron_options(&root);
        let probe = StaticAbiProbe::with_output(ProbeOutput {
            success,
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
        });

        let err = resolve_abi(&mut options, &probe)
            .await
            .expect_err("unusable probe output");

        assert_eq!(err.kind(), PrebuildErrorKind::AbiProbe);
        assert!(err.to_string().contains(stderr), "error: {err}");
        assert_eq!(options.abi, None);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn probe_script_is_rewritten_in_place() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        std::fs::write(root.join(PROBE_SCRIPT_NAME), "stale contents that are longer")
            .expect("stale script");

        let path = write_probe_script_in(&root).await.expect("write script");

        assert_eq!(path, root.join(PROBE_SCRIPT_NAME));
        assert_eq!(std::fs::read_to_string(&path).expect("read script"), PROBE_SCRIPT);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_script_does_not_follow_planted_symlinks() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let victim = root.join("victim.txt");
        std::fs::write(&victim, "untouched").expect("victim file");
        std::os::unix::fs::symlink(&victim, root.join(PROBE_SCRIPT_NAME)).expect("plant link");

        assert!(write_probe_script_in(&root).await.is_err());
        assert_eq!(std::fs::read_to_string(&victim).expect("read victim"), "untouched");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_probe_runs_the_executable() {
        use std::os::unix::fs::PermissionsExt;

        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let executable = root.join("fake-electron");
        std::fs::write(&executable, "#!/bin/sh\necho 110\n").expect("write script");
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");

        let output = ProcessAbiProbe
            .run(&executable, Utf8Path::new("/dev/null"))
            .await
            .expect("spawn");
        assert!(output.success);
        assert_eq!(parse_probe_output(&output), Ok(110));
    }

    #[tokio::test]
    async fn missing_executable_fails_to_spawn() {
        let (_guard, root) = utf8_temp_dir().expect("temp dir");
        let result = ProcessAbiProbe
            .run(&root.join("no-such-runtime"), Utf8Path::new("probe.js"))
            .await;
        assert!(result.is_err());
    }
}
