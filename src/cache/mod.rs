//! Cache tiers for prebuilt archives.
//!
//! A run first looks in the consuming project's `prebuilds/` directory, then
//! in a shared cache keyed by download URL. Only a miss in both reaches the
//! network.
//!
//! # Cache Location
//!
//! The shared cache root is resolved by [`resolve_cache_dir`]; by default it
//! lives beside the npm cache so all projects on the machine share it.
//!
//! # Cross-Process Coordination
//!
//! Promotion into the shared cache is an atomic rename, so readers never see
//! a partial archive. [`CacheLock`] additionally serialises downloads of the
//! same entry when a caller opts in.

mod config;
mod lock;
mod probe;

pub use config::resolve_cache_dir;
pub use lock::CacheLock;
pub(crate) use probe::probe_shared;
pub use probe::{CacheTier, probe_cache};
