//! Browser profile checks
//!
//! Both checks walk a list of Chromium-style profile directories. A profile
//! root that does not exist is skipped; the browser is simply not installed.

use privscan_core::{
    AccessMode, AccessResult, AccessResultExt, Capabilities, Check, CheckCategory,
    CheckContext, CheckError, CheckMetadata, CheckOutcome, CheckResult, ErrorKind, FileStore,
    ResultId, ScopedFile, Severity, NO_LIMIT,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Lowercase name fragments of well-known content blockers
const KNOWN_ADBLOCKERS: &[&str] = &[
    "ublock origin",
    "ublock",
    "adblock plus",
    "adblock",
    "adguard",
    "ghostery",
    "privacy badger",
];

const MESSAGE_PREFIX: &str = "__MSG_";

fn join(base: &str, name: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches(|c: char| c == '/' || c == '\\'),
        name
    )
}

/// `Ok(None)` when the directory does not exist
fn list_existing(files: &dyn FileStore, path: &str) -> AccessResult<Option<Vec<String>>> {
    match files.list_dir(path, NO_LIMIT) {
        Ok(names) => Ok(Some(names)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_json<T: DeserializeOwned>(files: &dyn FileStore, path: &str) -> Option<T> {
    let bytes = match ScopedFile::open(files, path, AccessMode::Read).and_then(|f| f.read()) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Skipping {}: {}", path, e);
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Malformed JSON in {}: {}", path, e);
            None
        }
    }
}

/// The fields of an extension manifest this crate reads
#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    #[serde(default)]
    default_locale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocaleMessage {
    message: String,
}

/// Resolve the display name of one installed extension version directory
fn extension_name(files: &dyn FileStore, version_dir: &str) -> Option<String> {
    let manifest: Manifest = read_json(files, &join(version_dir, "manifest.json"))?;

    let Some(key) = manifest
        .name
        .strip_prefix(MESSAGE_PREFIX)
        .and_then(|rest| rest.strip_suffix("__"))
    else {
        return Some(manifest.name.clone());
    };

    let locale = manifest.default_locale.as_deref().unwrap_or("en");
    let messages_path = join(&join(&join(version_dir, "_locales"), locale), "messages.json");
    let messages: BTreeMap<String, LocaleMessage> = read_json(files, &messages_path)?;

    // message keys are case-insensitive
    messages
        .into_iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, m)| m.message)
}

/// Names of every extension installed under the given profile roots
fn extension_names(
    ctx: &CheckContext,
    files: &dyn FileStore,
    roots: &[String],
) -> AccessResult<Vec<String>> {
    let mut names = Vec::new();
    for root in roots {
        let store = join(root, "Extensions");
        let Some(ids) = list_existing(files, &store)? else {
            debug!("No extension store at {}", store);
            continue;
        };

        for id in ids {
            if ctx.is_cancelled() {
                return Ok(names);
            }
            let ext_dir = join(&store, &id);
            let versions = match files.list_dir(&ext_dir, NO_LIMIT) {
                Ok(versions) => versions,
                Err(e) => {
                    debug!("Skipping extension {}: {}", id, e);
                    continue;
                }
            };
            // sorted, so the last entry is the newest install
            if let Some(version) = versions.last() {
                if let Some(name) = extension_name(files, &join(&ext_dir, version)) {
                    names.push(name);
                }
            }
        }
    }
    Ok(names)
}

/// Find a known content blocker among extension names.
///
/// Names are compared in lowercase. Returns the matching name as given.
pub fn detect_adblocker(names: &[String]) -> Option<&str> {
    names
        .iter()
        .find(|name| {
            let lower = name.to_lowercase();
            KNOWN_ADBLOCKERS.iter().any(|known| lower.contains(known))
        })
        .map(String::as_str)
}

/// Reports a browser without any content-blocking extension
pub struct AdblockerCheck {
    metadata: CheckMetadata,
    profile_roots: Vec<String>,
}

impl AdblockerCheck {
    pub fn new(profile_roots: Vec<String>) -> Self {
        Self {
            metadata: CheckMetadata::new(30, "Adblocker", CheckCategory::Browser, Severity::Medium)
                .with_description("A content blocker limits cross-site tracking")
                .with_weight(2),
            profile_roots,
        }
    }
}

impl Check for AdblockerCheck {
    fn id(&self) -> ResultId {
        self.metadata.id
    }

    fn metadata(&self) -> &CheckMetadata {
        &self.metadata
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::FILES
    }

    fn execute(&self, ctx: &CheckContext) -> CheckResult {
        let files = ctx.files().for_check(self.id())?;
        let names = extension_names(ctx, files, &self.profile_roots).for_check(self.id())?;
        debug!("Found {} extensions", names.len());

        match detect_adblocker(&names) {
            Some(name) => Ok(CheckOutcome::clear(
                self.id(),
                [format!("adblocker found: {}", name)],
            )),
            None => Ok(CheckOutcome::finding(
                self.id(),
                self.metadata.severity,
                ["adblocker not found".to_string()],
            )),
        }
    }
}

/// The fields of a profile `Preferences` file this crate reads
#[derive(Debug, Default, Deserialize)]
struct Preferences {
    #[serde(default)]
    enable_do_not_track: Option<bool>,
}

/// Reports profiles that do not send the Do Not Track header.
///
/// `Preferences` is held open by a running browser, so it is read through a
/// snapshot copy.
pub struct DoNotTrackCheck {
    metadata: CheckMetadata,
    profile_roots: Vec<String>,
}

impl DoNotTrackCheck {
    pub fn new(profile_roots: Vec<String>) -> Self {
        Self {
            metadata: CheckMetadata::new(31, "Do Not Track", CheckCategory::Browser, Severity::Low)
                .with_description("Browsers should send the Do Not Track request header"),
            profile_roots,
        }
    }

    fn preferences(&self, files: &dyn FileStore, root: &str) -> Result<Option<Preferences>, CheckError> {
        let path = join(root, "Preferences");
        let bytes = match files.snapshot(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into_check_error(self.id())),
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            CheckError::new(self.id(), ErrorKind::ParseFailure, format!("{}: {}", path, e))
                .with_cause(e)
        })
    }
}

impl Check for DoNotTrackCheck {
    fn id(&self) -> ResultId {
        self.metadata.id
    }

    fn metadata(&self) -> &CheckMetadata {
        &self.metadata
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::FILES
    }

    fn execute(&self, ctx: &CheckContext) -> CheckResult {
        let files = ctx.files().for_check(self.id())?;
        let mut profiles = 0;
        let mut off = Vec::new();

        for root in &self.profile_roots {
            let Some(prefs) = self.preferences(files, root)? else {
                continue;
            };
            profiles += 1;
            if prefs.enable_do_not_track != Some(true) {
                off.push(format!("{}: Do Not Track off", root));
            }
        }

        if profiles == 0 {
            Ok(CheckOutcome::clear(self.id(), ["no browser profiles found"]))
        } else if off.is_empty() {
            Ok(CheckOutcome::clear(
                self.id(),
                [format!("Do Not Track on in {} profiles", profiles)],
            ))
        } else {
            Ok(CheckOutcome::finding(self.id(), self.metadata.severity, off))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privscan_access::{Fixture, FixtureSet};
    use privscan_core::{AccessErrorKind, OsVersion};

    const ROOT: &str = "profiles/Default";

    fn extension(id: &str, version: Fixture) -> Fixture {
        Fixture::new(id).child(version)
    }

    fn ublock() -> Fixture {
        extension(
            "cjpalhdlnbpafiamejdnhcphjbkeiagm",
            Fixture::new("1.58.0_0")
                .child(Fixture::file(
                    "manifest.json",
                    r#"{"name": "__MSG_extName__", "default_locale": "en", "version": "1.58.0"}"#,
                ))
                .child(Fixture::new("_locales").child(Fixture::new("en").child(Fixture::file(
                    "messages.json",
                    r#"{"extName": {"message": "uBlock Origin", "description": "name"}}"#,
                )))),
        )
    }

    fn docs() -> Fixture {
        extension(
            "ghbmnnjooekpmoecnnnilnnbdlolhkhi",
            Fixture::new("1.0_0").child(Fixture::file(
                "manifest.json",
                r#"{"name": "Google Docs Offline"}"#,
            )),
        )
    }

    fn profile(extensions: Vec<Fixture>, preferences: Option<&str>) -> FixtureSet {
        let mut store = Fixture::new("Extensions");
        for ext in extensions {
            store = store.child(ext);
        }
        let mut default = Fixture::new("Default").child(store);
        if let Some(prefs) = preferences {
            default = default.child(Fixture::file("Preferences", prefs));
        }
        let files = Fixture::new("").child(Fixture::new("profiles").child(default));
        FixtureSet::new(Fixture::new(""), files, OsVersion::new(10, 0, 22631))
    }

    #[test]
    fn test_detect_adblocker() {
        assert_eq!(
            detect_adblocker(&["uBlock Origin".to_string()]),
            Some("uBlock Origin")
        );
        assert_eq!(
            detect_adblocker(&["Grammarly".to_string(), "AdGuard AdBlocker".to_string()]),
            Some("AdGuard AdBlocker")
        );
        assert_eq!(detect_adblocker(&["Google Docs Offline".to_string()]), None);
        assert_eq!(detect_adblocker(&[]), None);
    }

    #[test]
    fn test_adblocker_found_via_locale() {
        let set = profile(vec![docs(), ublock()], None);
        let check = AdblockerCheck::new(vec![ROOT.to_string()]);
        let outcome = check.execute(&CheckContext::new(set.accessors())).unwrap();
        assert_eq!(outcome.severity(), Severity::Info);
        assert_eq!(outcome.summary(), "adblocker found: uBlock Origin");
        assert_eq!(set.open_handles(), 0);
    }

    #[test]
    fn test_no_extensions_is_a_finding() {
        let set = profile(vec![], None);
        let check = AdblockerCheck::new(vec![ROOT.to_string()]);
        let outcome = check.execute(&CheckContext::new(set.accessors())).unwrap();
        assert_eq!(outcome.severity(), Severity::Medium);
        assert_eq!(outcome.summary(), "adblocker not found");

        // no profile roots at all reads the same
        let check = AdblockerCheck::new(vec!["missing/profile".to_string()]);
        let outcome = check.execute(&CheckContext::new(set.accessors())).unwrap();
        assert_eq!(outcome.summary(), "adblocker not found");
    }

    #[test]
    fn test_malformed_manifest_is_skipped() {
        let broken = extension(
            "broken",
            Fixture::new("0.1").child(Fixture::file("manifest.json", "{not json")),
        );
        let set = profile(vec![broken, docs()], None);
        let names = extension_names(
            &CheckContext::new(set.accessors()),
            set.files.as_ref(),
            &[ROOT.to_string()],
        )
        .unwrap();
        assert_eq!(names, vec!["Google Docs Offline"]);
        assert_eq!(set.open_handles(), 0);
    }

    #[test]
    fn test_do_not_track() {
        let check = DoNotTrackCheck::new(vec![ROOT.to_string()]);

        let on = profile(vec![], Some(r#"{"enable_do_not_track": true, "profile": {}}"#));
        let outcome = check.execute(&CheckContext::new(on.accessors())).unwrap();
        assert_eq!(outcome.severity(), Severity::Info);

        let off = profile(vec![], Some(r#"{"profile": {"name": "Person 1"}}"#));
        let outcome = check.execute(&CheckContext::new(off.accessors())).unwrap();
        assert_eq!(outcome.severity(), Severity::Low);
        assert_eq!(outcome.summary(), "profiles/Default: Do Not Track off");

        let none = profile(vec![], None);
        let outcome = check.execute(&CheckContext::new(none.accessors())).unwrap();
        assert_eq!(outcome.summary(), "no browser profiles found");
    }

    #[test]
    fn test_do_not_track_errors() {
        let check = DoNotTrackCheck::new(vec![ROOT.to_string()]);

        let bad = profile(vec![], Some(r#"{"enable_do_not_track": "yes"}"#));
        let err = check.execute(&CheckContext::new(bad.accessors())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailure);
        assert!(err.cause().is_some());

        let files = Fixture::new("").child(Fixture::new("profiles").child(
            Fixture::new("Default").child(
                Fixture::file("Preferences", "{}").error(AccessErrorKind::CopyFailed, "file is locked"),
            ),
        ));
        let locked = FixtureSet::new(Fixture::new(""), files, OsVersion::new(10, 0, 22631));
        let err = check.execute(&CheckContext::new(locked.accessors())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialDataLoss);
    }
}
