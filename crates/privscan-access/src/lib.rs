//! PrivScan Access - live and fixture implementations of the accessor traits
//!
//! - `live`: the registry through `reg query`, files through `std::fs`, and the
//!   OS version from the registry (Windows) or `uname -r` (elsewhere)
//! - `fixture`: deterministic in-memory trees for tests
//!
//! A run picks one family once, when its `Accessors` bundle is built.

pub mod fixture;
pub mod live;

pub use fixture::{
    Fixture, FixtureFileStore, FixtureKeyStore, FixtureSet, FixtureVersionProbe, InjectedError,
};
pub use live::{live_accessors, LiveFileStore, LiveKeyStore, LiveVersionProbe};

use std::sync::{Mutex, MutexGuard};

/// Split a key or file path into segments, accepting both separators
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split(|c: char| c == '\\' || c == '/')
        .filter(|s| !s.is_empty())
}

/// Lock a handle table, recovering from poisoning since the tables stay consistent
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        let parts: Vec<&str> = split_path(r"HKLM\SOFTWARE\\Microsoft/").collect();
        assert_eq!(parts, vec!["HKLM", "SOFTWARE", "Microsoft"]);
        assert_eq!(split_path("").count(), 0);
    }
}
