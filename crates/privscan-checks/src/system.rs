//! Operating system identity checks

use privscan_core::{
    check_key, AccessResultExt, Capabilities, Check, CheckCategory, CheckContext, CheckError,
    CheckMetadata, CheckOutcome, CheckResult, OsVersion, ResultId, Severity, NOT_FOUND,
};

const CURRENT_VERSION: &str = r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion";

/// Reports the installed Windows edition
pub struct ProductNameCheck {
    metadata: CheckMetadata,
}

impl ProductNameCheck {
    pub fn new() -> Self {
        Self {
            metadata: CheckMetadata::new(1, "Windows edition", CheckCategory::System, Severity::Info)
                .with_description("Installed Windows product name")
                .with_weight(0),
        }
    }
}

impl Default for ProductNameCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl Check for ProductNameCheck {
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
        let product = check_key(keys, CURRENT_VERSION, "ProductName");
        if product == NOT_FOUND {
            return Err(CheckError::resource_unavailable(
                self.id(),
                format!(r"{}\ProductName is not readable", CURRENT_VERSION),
            ));
        }
        Ok(CheckOutcome::clear(self.id(), [product]))
    }
}

/// Flags an OS older than the configured minimum
pub struct OsBuildCheck {
    metadata: CheckMetadata,
    minimum: OsVersion,
}

impl OsBuildCheck {
    pub fn new(minimum: OsVersion) -> Self {
        Self {
            metadata: CheckMetadata::new(2, "OS build support", CheckCategory::System, Severity::High)
                .with_description("Builds older than the minimum no longer receive security updates")
                .with_weight(5),
            minimum,
        }
    }
}

impl Check for OsBuildCheck {
    fn id(&self) -> ResultId {
        self.metadata.id
    }

    fn metadata(&self) -> &CheckMetadata {
        &self.metadata
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::VERSION
    }

    fn execute(&self, ctx: &CheckContext) -> CheckResult {
        let version = ctx
            .version()
            .and_then(|probe| probe.os_version())
            .for_check(self.id())?;

        if version < self.minimum {
            Ok(CheckOutcome::finding(
                self.id(),
                self.metadata.severity,
                [
                    format!("version {}", version),
                    format!("minimum supported {}", self.minimum),
                ],
            ))
        } else {
            Ok(CheckOutcome::clear(self.id(), [format!("version {}", version)]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privscan_access::{Fixture, FixtureSet, FixtureVersionProbe};
    use privscan_core::{AccessError, AccessErrorKind, ErrorKind};

    fn registry(product: Option<&str>) -> Fixture {
        let mut current = Fixture::new("CurrentVersion");
        if let Some(name) = product {
            current = current.string("ProductName", name);
        }
        Fixture::new("").child(
            Fixture::new("HKLM").child(
                Fixture::new("SOFTWARE").child(
                    Fixture::new("Microsoft").child(Fixture::new("Windows NT").child(current)),
                ),
            ),
        )
    }

    #[test]
    fn test_product_name() {
        let set = FixtureSet::new(
            registry(Some("Windows 11 Pro")),
            Fixture::new(""),
            OsVersion::new(10, 0, 22631),
        );
        let outcome = ProductNameCheck::new()
            .execute(&CheckContext::new(set.accessors()))
            .unwrap();
        assert_eq!(outcome.severity(), Severity::Info);
        assert_eq!(outcome.evidence().unwrap(), ["Windows 11 Pro"]);
        assert_eq!(set.open_handles(), 0);
    }

    #[test]
    fn test_product_name_missing() {
        let set = FixtureSet::new(registry(None), Fixture::new(""), OsVersion::new(10, 0, 22631));
        let err = ProductNameCheck::new()
            .execute(&CheckContext::new(set.accessors()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
        assert_eq!(set.open_handles(), 0);
    }

    #[test]
    fn test_os_build() {
        let check = OsBuildCheck::new(OsVersion::new(10, 0, 19045));

        let old = FixtureSet::new(Fixture::new(""), Fixture::new(""), OsVersion::new(10, 0, 17763));
        let outcome = check.execute(&CheckContext::new(old.accessors())).unwrap();
        assert_eq!(outcome.severity(), Severity::High);
        assert_eq!(outcome.summary(), "version 10.0.17763; minimum supported 10.0.19045");

        let current = FixtureSet::new(Fixture::new(""), Fixture::new(""), OsVersion::new(10, 0, 22631));
        let outcome = check.execute(&CheckContext::new(current.accessors())).unwrap();
        assert_eq!(outcome.severity(), Severity::Info);
    }

    #[test]
    fn test_os_build_probe_failure() {
        let set = FixtureSet::new(Fixture::new(""), Fixture::new(""), OsVersion::new(0, 0, 0))
            .with_version_probe(FixtureVersionProbe::failing(AccessError::new(
                AccessErrorKind::Malformed,
                "uname -r",
                "unrecognized release",
            )));
        let err = OsBuildCheck::new(OsVersion::new(10, 0, 19045))
            .execute(&CheckContext::new(set.accessors()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailure);
        assert_eq!(err.id(), ResultId(2));
    }
}
