//! In-memory fixture accessors
//!
//! A [`Fixture`] is a literal tree of named nodes. The same tree shape backs
//! both the key store (nodes are keys, maps are values) and the file store
//! (nodes with `contents` are files, the rest are directories). Fixtures are
//! read-only for the whole run.

use crate::{lock, split_path};
use privscan_core::{
    AccessError, AccessErrorKind, AccessMode, AccessResult, Accessors, CloseOutcome, FileHandle,
    FileInfo, FileStore, KeyHandle, KeyInfo, KeyStore, OsVersion, ValueType, VersionProbe,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Error a fixture node raises whenever it is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedError {
    pub kind: AccessErrorKind,
    pub message: String,
}

/// A named node of literal data standing in for a key, directory, or file
#[derive(Debug, Clone, Default)]
pub struct Fixture {
    pub name: String,
    pub string_values: BTreeMap<String, String>,
    pub binary_values: BTreeMap<String, Vec<u8>>,
    pub integer_values: BTreeMap<String, u64>,
    pub children: Vec<Fixture>,
    pub injected_error: Option<InjectedError>,
    /// File contents; `None` for keys and directories
    pub contents: Option<Vec<u8>>,
}

impl Fixture {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A file node
    pub fn file(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            contents: Some(contents.into()),
            ..Default::default()
        }
    }

    pub fn string(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_values.insert(name.into(), value.into());
        self
    }

    pub fn binary(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.binary_values.insert(name.into(), value.into());
        self
    }

    pub fn integer(mut self, name: impl Into<String>, value: u64) -> Self {
        self.integer_values.insert(name.into(), value);
        self
    }

    pub fn child(mut self, child: Fixture) -> Self {
        self.children.push(child);
        self
    }

    pub fn error(mut self, kind: AccessErrorKind, message: impl Into<String>) -> Self {
        self.injected_error = Some(InjectedError {
            kind,
            message: message.into(),
        });
        self
    }

    fn find_child(&self, name: &str) -> Option<&Fixture> {
        self.children
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn raise(&self, path: &str) -> AccessResult<()> {
        match &self.injected_error {
            Some(injected) => Err(AccessError::new(injected.kind, path, injected.message.clone())),
            None => Ok(()),
        }
    }

    /// Walk the tree by path segment. The root itself is unnamed.
    fn resolve(&self, path: &str) -> AccessResult<&Fixture> {
        let mut node = self;
        node.raise(path)?;
        for segment in split_path(path) {
            node = node
                .find_child(segment)
                .ok_or_else(|| AccessError::not_found(path, format!("no entry named '{}'", segment)))?;
            node.raise(path)?;
        }
        Ok(node)
    }

    fn lookup<'a, V>(map: &'a BTreeMap<String, V>, name: &str) -> Option<&'a V> {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    fn has_value(&self, name: &str) -> bool {
        Self::lookup(&self.string_values, name).is_some()
            || Self::lookup(&self.binary_values, name).is_some()
            || Self::lookup(&self.integer_values, name).is_some()
    }

    fn value_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .string_values
            .keys()
            .chain(self.binary_values.keys())
            .chain(self.integer_values.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn value_count(&self) -> usize {
        self.string_values.len() + self.binary_values.len() + self.integer_values.len()
    }
}

fn missing_value(node: &Fixture, path: &str, name: &str, wanted: &str) -> AccessError {
    if node.has_value(name) {
        AccessError::new(
            AccessErrorKind::TypeMismatch,
            path,
            format!("value '{}' is not {}", name, wanted),
        )
    } else {
        AccessError::not_found(path, format!("no value named '{}'", name))
    }
}

/// Open-handle bookkeeping shared by the fixture stores
#[derive(Debug, Default)]
struct HandleTable {
    open: Mutex<HashMap<u64, String>>,
    next_id: AtomicU64,
}

impl HandleTable {
    fn issue(&self, path: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.open).insert(id, path.to_string());
        id
    }

    fn path_of(&self, id: u64, handle_path: &str) -> AccessResult<String> {
        lock(&self.open)
            .get(&id)
            .cloned()
            .ok_or_else(|| AccessError::invalid_handle(handle_path))
    }

    fn release(&self, id: u64, handle_path: &str) -> CloseOutcome {
        match lock(&self.open).remove(&id) {
            Some(_) => CloseOutcome::Closed,
            None => {
                debug!("Close of handle {} ({}) that is not open", id, handle_path);
                CloseOutcome::AlreadyClosed
            }
        }
    }

    fn len(&self) -> usize {
        lock(&self.open).len()
    }

    fn issued(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}

/// Key store over a fixture tree
#[derive(Debug)]
pub struct FixtureKeyStore {
    root: Arc<Fixture>,
    handles: HandleTable,
}

impl FixtureKeyStore {
    pub fn new(root: Fixture) -> Self {
        Self {
            root: Arc::new(root),
            handles: HandleTable::default(),
        }
    }

    /// Handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Handles ever issued
    pub fn opens_total(&self) -> u64 {
        self.handles.issued()
    }

    fn node(&self, handle: &KeyHandle) -> AccessResult<&Fixture> {
        let path = self.handles.path_of(handle.id(), handle.path())?;
        self.root.resolve(&path)
    }
}

impl KeyStore for FixtureKeyStore {
    fn open(&self, path: &str, _mode: AccessMode) -> AccessResult<KeyHandle> {
        self.root.resolve(path)?;
        let id = self.handles.issue(path);
        Ok(KeyHandle::new(id, path))
    }

    fn read_string(&self, handle: &KeyHandle, name: &str) -> AccessResult<(String, ValueType)> {
        let node = self.node(handle)?;
        match Fixture::lookup(&node.string_values, name) {
            Some(value) => Ok((value.clone(), ValueType::String)),
            None => Err(missing_value(node, handle.path(), name, "a string")),
        }
    }

    fn read_binary(&self, handle: &KeyHandle, name: &str) -> AccessResult<(Vec<u8>, ValueType)> {
        let node = self.node(handle)?;
        match Fixture::lookup(&node.binary_values, name) {
            Some(value) => Ok((value.clone(), ValueType::Binary)),
            None => Err(missing_value(node, handle.path(), name, "binary")),
        }
    }

    fn read_integer(&self, handle: &KeyHandle, name: &str) -> AccessResult<(u64, ValueType)> {
        let node = self.node(handle)?;
        match Fixture::lookup(&node.integer_values, name) {
            Some(&value) if value <= u64::from(u32::MAX) => Ok((value, ValueType::Dword)),
            Some(&value) => Ok((value, ValueType::Qword)),
            None => Err(missing_value(node, handle.path(), name, "an integer")),
        }
    }

    fn value_names(&self, handle: &KeyHandle, limit: usize) -> AccessResult<Vec<String>> {
        let node = self.node(handle)?;
        Ok(node.value_names().into_iter().take(limit).collect())
    }

    fn child_names(&self, handle: &KeyHandle, limit: usize) -> AccessResult<Vec<String>> {
        let node = self.node(handle)?;
        Ok(node
            .children
            .iter()
            .take(limit)
            .map(|c| c.name.clone())
            .collect())
    }

    fn stat(&self, handle: &KeyHandle) -> AccessResult<KeyInfo> {
        let node = self.node(handle)?;
        Ok(KeyInfo {
            value_count: node.value_count(),
            child_count: node.children.len(),
        })
    }

    fn close(&self, handle: &KeyHandle) -> AccessResult<CloseOutcome> {
        Ok(self.handles.release(handle.id(), handle.path()))
    }
}

/// File store over a fixture tree. Read-only.
#[derive(Debug)]
pub struct FixtureFileStore {
    root: Arc<Fixture>,
    handles: HandleTable,
}

impl FixtureFileStore {
    pub fn new(root: Fixture) -> Self {
        Self {
            root: Arc::new(root),
            handles: HandleTable::default(),
        }
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn opens_total(&self) -> u64 {
        self.handles.issued()
    }

    fn file_node(&self, path: &str) -> AccessResult<(&Fixture, &[u8])> {
        let node = self.root.resolve(path)?;
        match &node.contents {
            Some(contents) => Ok((node, contents.as_slice())),
            None => Err(AccessError::new(
                AccessErrorKind::Unsupported,
                path,
                "is a directory",
            )),
        }
    }

    fn contents(&self, handle: &FileHandle) -> AccessResult<&[u8]> {
        let path = self.handles.path_of(handle.id(), handle.path())?;
        self.file_node(&path).map(|(_, contents)| contents)
    }
}

impl FileStore for FixtureFileStore {
    fn open(&self, path: &str, mode: AccessMode) -> AccessResult<FileHandle> {
        self.file_node(path)?;
        if mode == AccessMode::ReadWrite {
            return Err(AccessError::new(
                AccessErrorKind::PermissionDenied,
                path,
                "fixture files are read-only",
            ));
        }
        let id = self.handles.issue(path);
        Ok(FileHandle::new(id, path))
    }

    fn read(&self, handle: &FileHandle) -> AccessResult<Vec<u8>> {
        self.contents(handle).map(<[u8]>::to_vec)
    }

    fn write(&self, handle: &FileHandle, _data: &[u8]) -> AccessResult<usize> {
        self.handles.path_of(handle.id(), handle.path())?;
        Err(AccessError::new(
            AccessErrorKind::PermissionDenied,
            handle.path(),
            "fixture files are read-only",
        ))
    }

    fn stat(&self, handle: &FileHandle) -> AccessResult<FileInfo> {
        let contents = self.contents(handle)?;
        Ok(FileInfo {
            len: contents.len() as u64,
            read_only: true,
            modified: None,
        })
    }

    fn close(&self, handle: &FileHandle) -> AccessResult<CloseOutcome> {
        Ok(self.handles.release(handle.id(), handle.path()))
    }

    fn list_dir(&self, path: &str, limit: usize) -> AccessResult<Vec<String>> {
        let node = self.root.resolve(path)?;
        if node.contents.is_some() {
            return Err(AccessError::new(
                AccessErrorKind::Unsupported,
                path,
                "is not a directory",
            ));
        }
        let mut names: Vec<String> = node.children.iter().map(|c| c.name.clone()).collect();
        names.sort();
        names.truncate(limit);
        Ok(names)
    }

    fn snapshot(&self, path: &str) -> AccessResult<Vec<u8>> {
        self.file_node(path).map(|(_, contents)| contents.to_vec())
    }
}

/// Version probe returning a fixed answer
#[derive(Debug, Clone)]
pub struct FixtureVersionProbe {
    answer: AccessResult<OsVersion>,
}

impl FixtureVersionProbe {
    pub fn new(version: OsVersion) -> Self {
        Self {
            answer: Ok(version),
        }
    }

    pub fn failing(error: AccessError) -> Self {
        Self { answer: Err(error) }
    }
}

impl VersionProbe for FixtureVersionProbe {
    fn os_version(&self) -> AccessResult<OsVersion> {
        self.answer.clone()
    }
}

/// The three fixture accessors for one test, kept reachable for inspection
#[derive(Debug, Clone)]
pub struct FixtureSet {
    pub keys: Arc<FixtureKeyStore>,
    pub files: Arc<FixtureFileStore>,
    pub version: Arc<FixtureVersionProbe>,
}

impl FixtureSet {
    pub fn new(keys: Fixture, files: Fixture, version: OsVersion) -> Self {
        Self {
            keys: Arc::new(FixtureKeyStore::new(keys)),
            files: Arc::new(FixtureFileStore::new(files)),
            version: Arc::new(FixtureVersionProbe::new(version)),
        }
    }

    pub fn with_version_probe(mut self, probe: FixtureVersionProbe) -> Self {
        self.version = Arc::new(probe);
        self
    }

    /// Bundle for a runner
    pub fn accessors(&self) -> Accessors {
        Accessors::new()
            .with_keys(self.keys.clone())
            .with_files(self.files.clone())
            .with_version(self.version.clone())
    }

    /// Handles still open across both stores
    pub fn open_handles(&self) -> usize {
        self.keys.open_handles() + self.files.open_handles()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privscan_core::{
        check_key, lookup_integer, lookup_string, AccessResultExt, ErrorKind, ResultId, ScopedKey,
        NOT_FOUND, NO_LIMIT,
    };

    const CURRENT_VERSION: &str = r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion";

    fn registry() -> Fixture {
        Fixture::new("").child(
            Fixture::new("HKLM").child(
                Fixture::new("SOFTWARE")
                    .child(
                        Fixture::new("Microsoft").child(
                            Fixture::new("Windows NT").child(
                                Fixture::new("CurrentVersion")
                                    .string("ProductName", "Windows 11 Pro")
                                    .string("CurrentBuildNumber", "22631")
                                    .integer("CurrentMajorVersionNumber", 10)
                                    .binary("DigitalProductId", vec![0xa4, 0x00]),
                            ),
                        ),
                    )
                    .child(Fixture::new("Locked").error(AccessErrorKind::PermissionDenied, "access is denied")),
            ),
        )
    }

    #[test]
    fn test_check_key_present_and_absent() {
        let store = FixtureKeyStore::new(registry());
        assert_eq!(check_key(&store, CURRENT_VERSION, "ProductName"), "Windows 11 Pro");
        assert_eq!(check_key(&store, CURRENT_VERSION, "EditionID"), NOT_FOUND);
        assert_eq!(check_key(&store, r"HKLM\SOFTWARE\Nope", "ProductName"), NOT_FOUND);
        assert_eq!(check_key(&store, CURRENT_VERSION, "CurrentMajorVersionNumber"), "10");
        assert_eq!(store.open_handles(), 0);
    }

    #[test]
    fn test_missing_segment_is_resource_unavailable() {
        let store = FixtureKeyStore::new(registry());
        let err = store
            .open(r"HKLM\SOFTWARE\Policies\Microsoft", AccessMode::Read)
            .for_check(ResultId(10))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
        assert!(err.message().contains("Policies"));
    }

    #[test]
    fn test_injected_error_surfaces_on_open() {
        let store = FixtureKeyStore::new(registry());
        let err = store.open(r"HKLM\SOFTWARE\Locked", AccessMode::Read).unwrap_err();
        assert_eq!(err.kind(), AccessErrorKind::PermissionDenied);
        assert!(lookup_string(&store, r"HKLM\SOFTWARE\Locked", "x").is_err());
    }

    #[test]
    fn test_double_close_is_idempotent() {
        let store = FixtureKeyStore::new(registry());
        let handle = store.open(CURRENT_VERSION, AccessMode::Read).unwrap();
        assert_eq!(store.close(&handle).unwrap(), CloseOutcome::Closed);
        assert_eq!(store.close(&handle).unwrap(), CloseOutcome::AlreadyClosed);
        assert_eq!(store.open_handles(), 0);

        let err = store.read_string(&handle, "ProductName").unwrap_err();
        assert_eq!(err.kind(), AccessErrorKind::InvalidHandle);
    }

    #[test]
    fn test_typed_reads_and_enumeration() {
        let store = FixtureKeyStore::new(registry());
        let key = ScopedKey::open(&store, CURRENT_VERSION, AccessMode::Read).unwrap();

        assert_eq!(key.read_integer("CurrentMajorVersionNumber").unwrap(), (10, ValueType::Dword));
        assert_eq!(key.read_binary("DigitalProductId").unwrap().0, vec![0xa4, 0x00]);
        assert_eq!(
            key.read_integer("ProductName").unwrap_err().kind(),
            AccessErrorKind::TypeMismatch
        );
        assert_eq!(
            key.value_names(NO_LIMIT).unwrap(),
            vec!["CurrentBuildNumber", "CurrentMajorVersionNumber", "DigitalProductId", "ProductName"]
        );
        assert_eq!(key.value_names(2).unwrap().len(), 2);
        assert_eq!(key.stat().unwrap(), KeyInfo { value_count: 4, child_count: 0 });
        assert_eq!(store.open_handles(), 1);
        drop(key);
        assert_eq!(store.open_handles(), 0);
    }

    #[test]
    fn test_lookups_treat_absence_as_none() {
        let store = FixtureKeyStore::new(registry());
        assert_eq!(lookup_string(&store, r"HKLM\Nowhere", "x").unwrap(), None);
        assert_eq!(
            lookup_integer(&store, CURRENT_VERSION, "CurrentMajorVersionNumber").unwrap(),
            Some(10)
        );
        assert_eq!(lookup_integer(&store, CURRENT_VERSION, "Missing").unwrap(), None);
    }

    #[test]
    fn test_paths_are_case_insensitive() {
        let store = FixtureKeyStore::new(registry());
        assert_eq!(
            check_key(&store, r"hklm\software\microsoft\windows nt\currentversion", "productname"),
            "Windows 11 Pro"
        );
    }

    #[test]
    fn test_file_store_is_read_only() {
        let files = Fixture::new("").child(
            Fixture::new("profile")
                .child(Fixture::file("Preferences", br#"{"enable_do_not_track":true}"#.to_vec()))
                .child(Fixture::new("Extensions")),
        );
        let store = FixtureFileStore::new(files);

        assert_eq!(store.list_dir("profile", NO_LIMIT).unwrap(), vec!["Extensions", "Preferences"]);
        assert_eq!(
            store.open("profile/Preferences", AccessMode::ReadWrite).unwrap_err().kind(),
            AccessErrorKind::PermissionDenied
        );

        let handle = store.open("profile/Preferences", AccessMode::Read).unwrap();
        assert_eq!(store.stat(&handle).unwrap().len, 28);
        assert!(store.write(&handle, b"x").is_err());
        assert_eq!(store.close(&handle).unwrap(), CloseOutcome::Closed);
        assert_eq!(store.close(&handle).unwrap(), CloseOutcome::AlreadyClosed);
        assert_eq!(store.open("profile", AccessMode::Read).unwrap_err().kind(), AccessErrorKind::Unsupported);
    }

    #[test]
    fn test_snapshot_copy_failure() {
        let files = Fixture::new("").child(
            Fixture::file("History", b"sqlite".to_vec()).error(AccessErrorKind::CopyFailed, "file is locked"),
        );
        let store = FixtureFileStore::new(files);
        let err = store.snapshot("History").for_check(ResultId(31)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialDataLoss);
    }
}
