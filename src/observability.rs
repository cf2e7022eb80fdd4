//! Shared tracing configuration and the caller-facing logging capability.
//!
//! Each pipeline stage logs under its own target so subscribers can filter,
//! for example, network activity without the cache chatter. Messages passed
//! through [`Logger`] are informational only; no outcome depends on them.

/// Target used by the orchestrator.
pub(crate) const PIPELINE_TARGET: &str = "prebuild::pipeline";
/// Target used by cache probing and locking.
pub(crate) const CACHE_TARGET: &str = "prebuild::cache";
/// Target used by the fetcher.
pub(crate) const FETCH_TARGET: &str = "prebuild::fetch";
/// Target used by the unpacker and validator.
pub(crate) const UNPACK_TARGET: &str = "prebuild::unpack";
/// Target used by secondary-runtime ABI discovery.
pub(crate) const ABI_TARGET: &str = "prebuild::abi";
/// Target used by [`TracingLogger`].
pub const LOGGER_TARGET: &str = "prebuild::log";

/// Informational sink handed to the pipeline through
/// [`BuildOptions`](crate::BuildOptions).
///
/// # Examples
///
/// ```
/// use prebuild_fetch::Logger;
///
/// struct Quiet;
///
/// impl Logger for Quiet {
///     fn info(&self, _message: &str) {}
///     fn http(&self, _status: &str, _url: &str) {}
/// }
/// ```
pub trait Logger: Send + Sync {
    /// Records a progress message.
    fn info(&self, message: &str);

    /// Records an HTTP exchange. `status` is either a numeric status code or
    /// the literal `request` when the request is issued.
    fn http(&self, status: &str, url: &str);
}

/// Default [`Logger`] forwarding every message to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(target: LOGGER_TARGET, "{message}");
    }

    fn http(&self, status: &str, url: &str) {
        tracing::info!(target: LOGGER_TARGET, status = %status, url = %url, "http");
    }
}
