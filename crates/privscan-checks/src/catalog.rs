//! Check catalog - index of all available check units

use crate::browser::{AdblockerCheck, DoNotTrackCheck};
use crate::policy::{ExpectedValue, RegistryPolicyCheck};
use crate::startup::StartupProgramsCheck;
use crate::system::{OsBuildCheck, ProductNameCheck};
use privscan_core::{
    Check, CheckCategory, CheckMetadata, Error, OsVersion, Result, ResultId, Severity,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of check units, keyed and iterated by ascending id.
///
/// Read-only once built. A duplicate id is rejected at registration.
#[derive(Clone, Default)]
pub struct CheckCatalog {
    checks: BTreeMap<ResultId, Arc<dyn Check>>,
}

impl std::fmt::Debug for CheckCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckCatalog")
            .field("ids", &self.checks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CheckCatalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check
    pub fn register(&mut self, check: Arc<dyn Check>) -> Result<()> {
        let id = check.id();
        if let Some(existing) = self.checks.get(&id) {
            return Err(Error::DuplicateCheckId {
                id,
                existing: existing.metadata().name.clone(),
            });
        }
        debug!("Registered check {} ({})", id, check.metadata().name);
        self.checks.insert(id, check);
        Ok(())
    }

    /// Build a catalog from a list of checks, failing on the first duplicate
    pub fn from_checks<I>(checks: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn Check>>,
    {
        let mut catalog = Self::new();
        for check in checks {
            catalog.register(check)?;
        }
        Ok(catalog)
    }

    /// Get a check by ID
    pub fn get(&self, id: ResultId) -> Option<Arc<dyn Check>> {
        self.checks.get(&id).cloned()
    }

    /// Get check metadata by ID
    pub fn metadata(&self, id: ResultId) -> Option<&CheckMetadata> {
        self.checks.get(&id).map(|c| c.metadata())
    }

    /// Category of a registered check
    pub fn category_of(&self, id: ResultId) -> Option<CheckCategory> {
        self.metadata(id).map(|m| m.category)
    }

    /// All check IDs, ascending
    pub fn ids(&self) -> impl Iterator<Item = ResultId> + '_ {
        self.checks.keys().copied()
    }

    /// All checks, ascending by ID
    pub fn all(&self) -> Vec<Arc<dyn Check>> {
        self.checks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Filter checks by category
    pub fn by_category(&self, category: CheckCategory) -> Vec<Arc<dyn Check>> {
        self.checks
            .values()
            .filter(|c| c.metadata().category == category)
            .cloned()
            .collect()
    }

    /// Get checks that are enabled by default
    pub fn enabled_by_default(&self) -> Vec<Arc<dyn Check>> {
        self.checks
            .values()
            .filter(|c| c.metadata().enabled_by_default)
            .cloned()
            .collect()
    }

    /// Look up checks by ID. Every ID must be registered.
    pub fn by_ids(&self, ids: &[ResultId]) -> Result<Vec<Arc<dyn Check>>> {
        let mut selected: BTreeMap<ResultId, Arc<dyn Check>> = BTreeMap::new();
        for &id in ids {
            let check = self.get(id).ok_or(Error::CheckNotFound { id })?;
            selected.insert(id, check);
        }
        Ok(selected.into_values().collect())
    }

    /// Resolve a run selection: `only` if given, otherwise the default set,
    /// minus anything in `skip`
    pub fn select(&self, only: &[ResultId], skip: &[ResultId]) -> Result<Vec<Arc<dyn Check>>> {
        let base = if only.is_empty() {
            self.enabled_by_default()
        } else {
            self.by_ids(only)?
        };
        Ok(base
            .into_iter()
            .filter(|c| !skip.contains(&c.id()))
            .collect())
    }
}

/// Parameters for the built-in checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogOptions {
    /// Browser profile directories searched for extensions and preferences
    pub profile_roots: Vec<String>,
    /// Oldest OS version still considered supported
    pub minimum_version: OsVersion,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            profile_roots: Vec::new(),
            // Windows 10 22H2
            minimum_version: OsVersion::new(10, 0, 19045),
        }
    }
}

const DATA_COLLECTION: &str = r"HKLM\SOFTWARE\Policies\Microsoft\Windows\DataCollection";
const ADVERTISING_INFO: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\AdvertisingInfo";
const LOCATION_CONSENT: &str =
    r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\CapabilityAccessManager\ConsentStore\location";
const SYSTEM_POLICY: &str = r"HKLM\SOFTWARE\Policies\Microsoft\Windows\System";
const SEARCH_POLICY: &str = r"HKLM\SOFTWARE\Policies\Microsoft\Windows\Windows Search";

/// The catalog the agent ships with
pub fn builtin_catalog(options: &CatalogOptions) -> Result<CheckCatalog> {
    let checks: Vec<Arc<dyn Check>> = vec![
        Arc::new(ProductNameCheck::new()),
        Arc::new(OsBuildCheck::new(options.minimum_version)),
        Arc::new(RegistryPolicyCheck::new(
            CheckMetadata::new(10, "Telemetry level", CheckCategory::Privacy, Severity::Medium)
                .with_description("Diagnostic data collection should be limited to the security level")
                .with_weight(3),
            DATA_COLLECTION,
            "AllowTelemetry",
            ExpectedValue::Dword(0),
        )),
        Arc::new(RegistryPolicyCheck::new(
            CheckMetadata::new(11, "Advertising ID", CheckCategory::Privacy, Severity::Medium)
                .with_description("Apps should not receive a per-user advertising identifier")
                .with_weight(2),
            ADVERTISING_INFO,
            "Enabled",
            ExpectedValue::Dword(0),
        )),
        Arc::new(RegistryPolicyCheck::new(
            CheckMetadata::new(12, "Location access", CheckCategory::Privacy, Severity::Medium)
                .with_description("System-wide location access should be denied")
                .with_weight(2),
            LOCATION_CONSENT,
            "Value",
            ExpectedValue::String("Deny".to_string()),
        )),
        Arc::new(RegistryPolicyCheck::new(
            CheckMetadata::new(13, "Activity history", CheckCategory::Privacy, Severity::Low)
                .with_description("Activity history should not be published"),
            SYSTEM_POLICY,
            "PublishUserActivities",
            ExpectedValue::Dword(0),
        )),
        Arc::new(RegistryPolicyCheck::new(
            CheckMetadata::new(14, "Cortana", CheckCategory::Privacy, Severity::Low)
                .with_description("Cortana should be disabled by policy"),
            SEARCH_POLICY,
            "AllowCortana",
            ExpectedValue::Dword(0),
        )),
        Arc::new(StartupProgramsCheck::new()),
        Arc::new(AdblockerCheck::new(options.profile_roots.clone())),
        Arc::new(DoNotTrackCheck::new(options.profile_roots.clone())),
    ];

    CheckCatalog::from_checks(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use privscan_core::{Capabilities, CheckContext, CheckOutcome, CheckResult};

    struct TestCheck {
        metadata: CheckMetadata,
    }

    impl TestCheck {
        fn arc(id: u32, category: CheckCategory) -> Arc<dyn Check> {
            Arc::new(Self {
                metadata: CheckMetadata::new(id, format!("check {}", id), category, Severity::Low),
            })
        }
    }

    impl Check for TestCheck {
        fn id(&self) -> ResultId {
            self.metadata.id
        }

        fn metadata(&self) -> &CheckMetadata {
            &self.metadata
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::NONE
        }

        fn execute(&self, _ctx: &CheckContext) -> CheckResult {
            Ok(CheckOutcome::clear(self.id(), Vec::<String>::new()))
        }
    }

    #[test]
    fn test_catalog() {
        let mut catalog = CheckCatalog::new();
        catalog.register(TestCheck::arc(30, CheckCategory::Browser)).unwrap();
        catalog.register(TestCheck::arc(2, CheckCategory::System)).unwrap();
        catalog.register(TestCheck::arc(10, CheckCategory::Privacy)).unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.ids().collect::<Vec<_>>(),
            vec![ResultId(2), ResultId(10), ResultId(30)]
        );
        assert!(catalog.get(ResultId(10)).is_some());
        assert!(catalog.get(ResultId(11)).is_none());
        assert_eq!(catalog.category_of(ResultId(30)), Some(CheckCategory::Browser));
        assert_eq!(catalog.by_category(CheckCategory::System).len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result = CheckCatalog::from_checks(vec![
            TestCheck::arc(7, CheckCategory::System),
            TestCheck::arc(7, CheckCategory::Privacy),
        ]);
        match result {
            Err(Error::DuplicateCheckId { id, existing }) => {
                assert_eq!(id, ResultId(7));
                assert_eq!(existing, "check 7");
            }
            other => panic!("expected duplicate id error, got {:?}", other.map(|c| c.len())),
        }
    }

    #[test]
    fn test_select() {
        let catalog = CheckCatalog::from_checks(vec![
            TestCheck::arc(1, CheckCategory::System),
            TestCheck::arc(2, CheckCategory::System),
            TestCheck::arc(3, CheckCategory::System),
        ])
        .unwrap();

        let ids = |checks: Vec<Arc<dyn Check>>| checks.iter().map(|c| c.id().0).collect::<Vec<_>>();
        assert_eq!(ids(catalog.select(&[], &[]).unwrap()), vec![1, 2, 3]);
        assert_eq!(ids(catalog.select(&[], &[ResultId(2)]).unwrap()), vec![1, 3]);
        assert_eq!(
            ids(catalog.select(&[ResultId(3), ResultId(1), ResultId(3)], &[]).unwrap()),
            vec![1, 3]
        );
        assert!(matches!(
            catalog.select(&[ResultId(9)], &[]),
            Err(Error::CheckNotFound { id: ResultId(9) })
        ));
    }

    #[test]
    fn test_builtin_catalog_ids() {
        let catalog = builtin_catalog(&CatalogOptions::default()).unwrap();
        assert_eq!(
            catalog.ids().map(|id| id.0).collect::<Vec<_>>(),
            vec![1, 2, 10, 11, 12, 13, 14, 20, 30, 31]
        );
        for check in catalog.all() {
            assert_eq!(check.id(), check.metadata().id);
        }
    }
}
