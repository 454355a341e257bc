//! Accessors over the machine the agent runs on

pub mod files;
pub mod registry;
pub mod version;

pub use files::LiveFileStore;
pub use registry::LiveKeyStore;
pub use version::{parse_kernel_release, LiveVersionProbe};

use privscan_core::Accessors;
use std::sync::Arc;

/// Build the live accessor bundle.
///
/// All three capabilities are provided on every platform; off Windows the
/// key store answers every open with `Unsupported`, which checks report as
/// an unavailable resource.
pub fn live_accessors() -> Accessors {
    Accessors::new()
        .with_keys(Arc::new(LiveKeyStore::new()))
        .with_files(Arc::new(LiveFileStore::new()))
        .with_version(Arc::new(LiveVersionProbe::new()))
}
