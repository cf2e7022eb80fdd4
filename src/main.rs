//! Resolves the prebuilt native binary for the package in the current
//! project and prints its absolute path.
//!
//! Configuration is provided via `PREBUILD_*` environment variables parsed by
//! [`OrthoConfig`](https://github.com/leynos/ortho-config). Progress is logged
//! to stderr; set `RUST_LOG` to adjust verbosity. The binary exits with status
//! code `0` on success and `1` on error.

use std::io::Write;

use color_eyre::eyre::{Context, Result, eyre};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    color_eyre::install()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prebuild=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let binary = prebuild_fetch::run().map_err(|err| eyre!(err))?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{binary}").context("failed to write binary path")?;
    Ok(())
}
