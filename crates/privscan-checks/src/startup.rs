//! Programs launched at logon

use privscan_core::{
    AccessErrorKind, AccessMode, AccessResultExt, Capabilities, Check, CheckCategory,
    CheckContext, CheckError, CheckMetadata, CheckOutcome, CheckResult, ErrorKind, ResultId,
    ScopedKey, Severity, NO_LIMIT,
};
use tracing::debug;

const RUN_KEYS: [&str; 2] = [
    r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Run",
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Run",
];

/// Lists every `Run` entry. Any entry at all is reported for review.
pub struct StartupProgramsCheck {
    metadata: CheckMetadata,
}

impl StartupProgramsCheck {
    pub fn new() -> Self {
        Self {
            metadata: CheckMetadata::new(
                20,
                "Startup programs",
                CheckCategory::Applications,
                Severity::Low,
            )
            .with_description("Programs started automatically at logon"),
        }
    }
}

impl Default for StartupProgramsCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl Check for StartupProgramsCheck {
    fn id(&self) -> ResultId {
        self.metadata.id
    }

    fn metadata(&self) -> &CheckMetadata {
        &self.metadata
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::KEYS
    }

    fn execute(&self, ctx: &CheckContext) -> CheckResult {
        let keys = ctx.keys().for_check(self.id())?;
        let mut entries = Vec::new();

        for path in RUN_KEYS {
            if ctx.is_cancelled() {
                return Err(CheckError::new(
                    self.id(),
                    ErrorKind::Timeout,
                    "stopped before all Run keys were read",
                ));
            }

            let key = match ScopedKey::open(keys, path, AccessMode::Read) {
                Ok(key) => key,
                Err(e) if e.is_not_found() => {
                    debug!("{} absent", path);
                    continue;
                }
                Err(e) => return Err(e.into_check_error(self.id())),
            };

            for name in key.value_names(NO_LIMIT).for_check(self.id())? {
                match key.read_string(&name) {
                    Ok((command, _)) => entries.push(format!("{}: {}", name, command)),
                    // a binary or DWORD entry is still a startup entry
                    Err(e) if e.kind() == AccessErrorKind::TypeMismatch => {
                        debug!("{} in {} is not a string", name, path);
                        entries.push(format!("{}: <non-string value>", name));
                    }
                    Err(e) => return Err(e.into_check_error(self.id())),
                }
            }
        }

        if entries.is_empty() {
            Ok(CheckOutcome::clear(self.id(), ["no startup programs"]))
        } else {
            Ok(CheckOutcome::finding(self.id(), self.metadata.severity, entries))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privscan_access::{Fixture, FixtureSet};
    use privscan_core::OsVersion;

    fn run_key(hive: &str, software: &str, run: Fixture) -> Fixture {
        Fixture::new(hive).child(
            Fixture::new(software).child(
                Fixture::new("Microsoft").child(
                    Fixture::new("Windows").child(Fixture::new("CurrentVersion").child(run)),
                ),
            ),
        )
    }

    #[test]
    fn test_lists_run_entries() {
        let keys = Fixture::new("")
            .child(run_key(
                "HKLM",
                "SOFTWARE",
                Fixture::new("Run").string("SecurityHealth", r"C:\Windows\system32\SecurityHealthSystray.exe"),
            ))
            .child(run_key(
                "HKCU",
                "Software",
                Fixture::new("Run").string("OneDrive", r"C:\OneDrive.exe /background"),
            ));
        let set = FixtureSet::new(keys, Fixture::new(""), OsVersion::new(10, 0, 22631));

        let outcome = StartupProgramsCheck::new()
            .execute(&CheckContext::new(set.accessors()))
            .unwrap();
        assert_eq!(outcome.severity(), Severity::Low);
        assert_eq!(
            outcome.evidence().unwrap(),
            [
                r"SecurityHealth: C:\Windows\system32\SecurityHealthSystray.exe",
                r"OneDrive: C:\OneDrive.exe /background",
            ]
        );
        assert_eq!(set.open_handles(), 0);
    }

    #[test]
    fn test_no_run_keys() {
        let set = FixtureSet::new(Fixture::new(""), Fixture::new(""), OsVersion::new(10, 0, 22631));
        let outcome = StartupProgramsCheck::new()
            .execute(&CheckContext::new(set.accessors()))
            .unwrap();
        assert_eq!(outcome.severity(), Severity::Info);
    }

    #[test]
    fn test_non_string_entry_is_kept() {
        let keys = Fixture::new("")
            .child(run_key(
                "HKLM",
                "SOFTWARE",
                Fixture::new("Run")
                    .integer("Broken", 1)
                    .string("Updater", r"C:\updater.exe"),
            ))
            .child(run_key(
                "HKCU",
                "Software",
                Fixture::new("Run").string("OneDrive", r"C:\OneDrive.exe"),
            ));
        let set = FixtureSet::new(keys, Fixture::new(""), OsVersion::new(10, 0, 22631));
        let outcome = StartupProgramsCheck::new()
            .execute(&CheckContext::new(set.accessors()))
            .unwrap();
        let evidence = outcome.evidence().unwrap();
        assert_eq!(evidence.len(), 3);
        assert!(evidence.contains(&"Broken: <non-string value>".to_string()));
        assert!(evidence.contains(&r"Updater: C:\updater.exe".to_string()));
        assert_eq!(evidence[2], r"OneDrive: C:\OneDrive.exe");
        assert_eq!(set.open_handles(), 0);
    }

    #[test]
    fn test_unreadable_run_key_is_unavailable() {
        let keys = Fixture::new("").child(run_key(
            "HKLM",
            "SOFTWARE",
            Fixture::new("Run").error(AccessErrorKind::PermissionDenied, "Access is denied"),
        ));
        let set = FixtureSet::new(keys, Fixture::new(""), OsVersion::new(10, 0, 22631));
        let err = StartupProgramsCheck::new()
            .execute(&CheckContext::new(set.accessors()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
        assert_eq!(set.open_handles(), 0);
    }

    #[test]
    fn test_stops_when_cancelled() {
        let set = FixtureSet::new(Fixture::new(""), Fixture::new(""), OsVersion::new(10, 0, 22631));
        let ctx = CheckContext::new(set.accessors());
        ctx.deadline.cancel();
        let err = StartupProgramsCheck::new().execute(&ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
