//! PrivScan Checks - Check catalog and the built-in check units
//!
//! This crate provides:
//! - `CheckCatalog`: index of check units keyed by stable `ResultId`
//! - `builtin_catalog`: the catalog the agent ships with
//! - The built-in units, grouped by what they inspect

pub mod browser;
pub mod catalog;
pub mod policy;
pub mod startup;
pub mod system;

pub use browser::{detect_adblocker, AdblockerCheck, DoNotTrackCheck};
pub use catalog::{builtin_catalog, CatalogOptions, CheckCatalog};
pub use policy::{ExpectedValue, RegistryPolicyCheck};
pub use startup::StartupProgramsCheck;
pub use system::{OsBuildCheck, ProductNameCheck};
