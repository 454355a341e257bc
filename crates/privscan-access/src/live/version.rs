//! Live OS version probe

use super::registry::LiveKeyStore;
use privscan_core::{
    lookup_integer, lookup_string, AccessError, AccessErrorKind, AccessResult, KeyStore, OsVersion,
    VersionProbe,
};
use regex::Regex;
use std::process::Command;
use std::sync::OnceLock;
use tracing::debug;

const CURRENT_VERSION_KEY: &str = r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion";

static KERNEL_RELEASE: OnceLock<Option<Regex>> = OnceLock::new();

/// Parse the leading `major.minor[.patch]` of a kernel release string such
/// as `6.8.0-45-generic`. A missing patch component reads as zero.
pub fn parse_kernel_release(release: &str) -> Option<OsVersion> {
    let re = KERNEL_RELEASE
        .get_or_init(|| Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?").ok())
        .as_ref()?;
    let caps = re.captures(release.trim())?;
    let part = |i: usize| -> Option<u32> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };
    Some(OsVersion::new(part(1)?, part(2)?, part(3)?))
}

/// Reads the Windows version from the registry, or the kernel release elsewhere
#[derive(Debug, Default)]
pub struct LiveVersionProbe {
    keys: LiveKeyStore,
}

impl LiveVersionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_registry(&self) -> AccessResult<OsVersion> {
        let integer = |name: &str| -> AccessResult<u32> {
            let value = lookup_integer(&self.keys as &dyn KeyStore, CURRENT_VERSION_KEY, name)?
                .ok_or_else(|| AccessError::not_found(CURRENT_VERSION_KEY, format!("no {}", name)))?;
            u32::try_from(value).map_err(|_| {
                AccessError::new(
                    AccessErrorKind::Malformed,
                    CURRENT_VERSION_KEY,
                    format!("{} out of range: {}", name, value),
                )
            })
        };

        // CurrentBuildNumber is stored as a string
        let build = lookup_string(&self.keys, CURRENT_VERSION_KEY, "CurrentBuildNumber")?
            .ok_or_else(|| AccessError::not_found(CURRENT_VERSION_KEY, "no CurrentBuildNumber"))?;
        let build = build.trim().parse::<u32>().map_err(|e| {
            AccessError::new(
                AccessErrorKind::Malformed,
                CURRENT_VERSION_KEY,
                format!("CurrentBuildNumber '{}': {}", build, e),
            )
        })?;

        Ok(OsVersion::new(
            integer("CurrentMajorVersionNumber")?,
            integer("CurrentMinorVersionNumber")?,
            build,
        ))
    }

    fn from_uname(&self) -> AccessResult<OsVersion> {
        let output = Command::new("uname")
            .arg("-r")
            .output()
            .map_err(|e| AccessError::from_io("uname -r", e))?;
        let release = String::from_utf8_lossy(&output.stdout);
        debug!("Kernel release: {}", release.trim());

        parse_kernel_release(&release).ok_or_else(|| {
            AccessError::new(
                AccessErrorKind::Malformed,
                "uname -r",
                format!("unrecognized release '{}'", release.trim()),
            )
        })
    }
}

impl VersionProbe for LiveVersionProbe {
    fn os_version(&self) -> AccessResult<OsVersion> {
        if cfg!(windows) {
            self.from_registry()
        } else {
            self.from_uname()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(
            parse_kernel_release("6.8.0-45-generic\n"),
            Some(OsVersion::new(6, 8, 0))
        );
        assert_eq!(parse_kernel_release("5.15"), Some(OsVersion::new(5, 15, 0)));
        assert_eq!(
            parse_kernel_release("23.6.0"),
            Some(OsVersion::new(23, 6, 0))
        );
        assert_eq!(parse_kernel_release("unknown"), None);
        assert_eq!(parse_kernel_release(""), None);
    }

    #[cfg(all(unix, not(windows)))]
    #[test]
    fn test_live_probe_reads_kernel() {
        let version = LiveVersionProbe::new().os_version().unwrap();
        assert!(version.major > 0);
    }
}
