//! Internal helpers shared by unit and integration tests.
//!
//! Provides log capture, UTF-8 temporary directories, tarball fixtures, and
//! a scripted ABI probe so tests can drive the pipeline without a real
//! runtime or network.

mod archive;
mod filesystem;
mod logging;
mod probe;

pub use archive::ArchiveBuilder;
pub use filesystem::utf8_temp_dir;
pub use logging::{RecordingLogger, capture_debug_logs, capture_info_logs};
pub use probe::StaticAbiProbe;
