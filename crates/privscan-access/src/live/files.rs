//! Live file access through `std::fs`

use crate::lock;
use privscan_core::{
    AccessError, AccessErrorKind, AccessMode, AccessResult, CloseOutcome, FileHandle, FileInfo,
    FileStore,
};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug)]
struct OpenFile {
    file: File,
    mode: AccessMode,
}

/// File accessor for the local machine.
///
/// The handle table lock is only held to look a handle up; each open file
/// has its own lock, so reads of different files proceed in parallel.
#[derive(Debug, Default)]
pub struct LiveFileStore {
    handles: Mutex<HashMap<u64, Arc<Mutex<OpenFile>>>>,
    next_id: AtomicU64,
}

impl LiveFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, handle: &FileHandle) -> AccessResult<Arc<Mutex<OpenFile>>> {
        lock(&self.handles)
            .get(&handle.id())
            .cloned()
            .ok_or_else(|| AccessError::invalid_handle(handle.path()))
    }
}

impl FileStore for LiveFileStore {
    fn open(&self, path: &str, mode: AccessMode) -> AccessResult<FileHandle> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == AccessMode::ReadWrite)
            .open(path)
            .map_err(|e| AccessError::from_io(path, e))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.handles).insert(id, Arc::new(Mutex::new(OpenFile { file, mode })));
        Ok(FileHandle::new(id, path))
    }

    fn read(&self, handle: &FileHandle) -> AccessResult<Vec<u8>> {
        let entry = self.entry(handle)?;
        let mut open = lock(&entry);
        let mut buf = Vec::new();
        open.file
            .read_to_end(&mut buf)
            .map_err(|e| AccessError::from_io(handle.path(), e))?;
        Ok(buf)
    }

    fn write(&self, handle: &FileHandle, data: &[u8]) -> AccessResult<usize> {
        let entry = self.entry(handle)?;
        let mut open = lock(&entry);
        if open.mode != AccessMode::ReadWrite {
            return Err(AccessError::new(
                AccessErrorKind::PermissionDenied,
                handle.path(),
                "file was opened read-only",
            ));
        }
        open.file
            .write_all(data)
            .map_err(|e| AccessError::from_io(handle.path(), e))?;
        Ok(data.len())
    }

    fn stat(&self, handle: &FileHandle) -> AccessResult<FileInfo> {
        let entry = self.entry(handle)?;
        let open = lock(&entry);
        let meta = open
            .file
            .metadata()
            .map_err(|e| AccessError::from_io(handle.path(), e))?;
        Ok(FileInfo {
            len: meta.len(),
            read_only: meta.permissions().readonly(),
            modified: meta.modified().ok(),
        })
    }

    fn close(&self, handle: &FileHandle) -> AccessResult<CloseOutcome> {
        match lock(&self.handles).remove(&handle.id()) {
            Some(_) => Ok(CloseOutcome::Closed),
            None => Ok(CloseOutcome::AlreadyClosed),
        }
    }

    fn list_dir(&self, path: &str, limit: usize) -> AccessResult<Vec<String>> {
        let entries = std::fs::read_dir(path).map_err(|e| AccessError::from_io(path, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AccessError::from_io(path, e))?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        names.truncate(limit);
        Ok(names)
    }

    fn snapshot(&self, path: &str) -> AccessResult<Vec<u8>> {
        let copy = tempfile::NamedTempFile::new().map_err(|e| AccessError::from_io(path, e))?;

        std::fs::copy(path, copy.path()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                return AccessError::from_io(path, e);
            }
            AccessError::new(
                AccessErrorKind::CopyFailed,
                path,
                format!("could not copy to {}: {}", copy.path().display(), e),
            )
            .with_cause(e)
        })?;

        debug!("Snapshot of {} at {}", path, copy.path().display());
        std::fs::read(copy.path()).map_err(|e| AccessError::from_io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privscan_core::{ScopedFile, NO_LIMIT};

    #[test]
    fn test_open_read_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Preferences");
        std::fs::write(&path, b"{}").unwrap();
        let path = path.to_string_lossy().to_string();

        let store = LiveFileStore::new();
        let handle = store.open(&path, AccessMode::Read).unwrap();
        assert_eq!(store.read(&handle).unwrap(), b"{}");
        assert_eq!(store.stat(&handle).unwrap().len, 2);
        assert_eq!(
            store.write(&handle, b"x").unwrap_err().kind(),
            AccessErrorKind::PermissionDenied
        );
        assert_eq!(store.close(&handle).unwrap(), CloseOutcome::Closed);
        assert_eq!(store.close(&handle).unwrap(), CloseOutcome::AlreadyClosed);
    }

    #[test]
    fn test_write_through_scoped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, b"").unwrap();
        let path_str = path.to_string_lossy().to_string();

        let store = LiveFileStore::new();
        {
            let file = ScopedFile::open(&store, &path_str, AccessMode::ReadWrite).unwrap();
            assert_eq!(file.write(b"hello").unwrap(), 5);
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert!(lock(&store.handles).is_empty());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").to_string_lossy().to_string();
        let store = LiveFileStore::new();
        assert_eq!(
            store.open(&path, AccessMode::Read).unwrap_err().kind(),
            AccessErrorKind::NotFound
        );
        assert_eq!(store.snapshot(&path).unwrap_err().kind(), AccessErrorKind::NotFound);
    }

    #[test]
    fn test_list_dir_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("b-ext")).unwrap();
        std::fs::create_dir(dir.path().join("a-ext")).unwrap();
        std::fs::write(dir.path().join("History"), b"rows").unwrap();
        let root = dir.path().to_string_lossy().to_string();

        let store = LiveFileStore::new();
        assert_eq!(
            store.list_dir(&root, NO_LIMIT).unwrap(),
            vec!["History", "a-ext", "b-ext"]
        );
        assert_eq!(store.list_dir(&root, 1).unwrap().len(), 1);

        let history = dir.path().join("History").to_string_lossy().to_string();
        assert_eq!(store.snapshot(&history).unwrap(), b"rows");
    }
}
