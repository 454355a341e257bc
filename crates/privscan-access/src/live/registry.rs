//! Live registry access through `reg query`
//!
//! Opening a key runs one `reg query` and caches the parsed listing for the
//! lifetime of the handle, so reads through that handle see a consistent
//! snapshot. Concurrent opens of the same path are independent processes.

use crate::lock;
use privscan_core::{
    AccessError, AccessErrorKind, AccessMode, AccessResult, CloseOutcome, KeyHandle, KeyInfo,
    KeyStore, ValueType,
};
use std::collections::HashMap;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Kind of a failed `reg query`, from its stderr.
///
/// Only the explicit missing-key message is `NotFound`. Anything else,
/// including messages in another display language, is `Io` so callers never
/// mistake an unreadable key for an absent one.
pub(crate) fn classify_query_failure(stderr: &str) -> AccessErrorKind {
    let stderr = stderr.to_lowercase();
    if stderr.contains("unable to find the specified registry key") {
        AccessErrorKind::NotFound
    } else if stderr.contains("access is denied") {
        AccessErrorKind::PermissionDenied
    } else {
        AccessErrorKind::Io
    }
}

/// Name `reg query` prints for a key's unnamed value
const DEFAULT_VALUE_NAME: &str = "(Default)";

/// One value line of a `reg query` listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegEntry {
    pub name: String,
    pub value_type: Option<ValueType>,
    pub data: String,
}

/// Parsed `reg query <key>` output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct KeyListing {
    pub values: Vec<RegEntry>,
    pub subkeys: Vec<String>,
}

impl KeyListing {
    fn entry(&self, name: &str) -> Option<&RegEntry> {
        self.values
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }
}

/// Parse the listing of a single key.
///
/// Value lines are indented by four spaces and split into name, type, and
/// data on four-space runs. The first unindented line echoes the key itself;
/// every later unindented line is a full subkey path.
pub(crate) fn parse_reg_listing(output: &str) -> KeyListing {
    let mut listing = KeyListing::default();
    let mut seen_header = false;

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(body) = line.strip_prefix("    ") {
            let parts: Vec<&str> = body.splitn(3, "    ").collect();
            if parts.len() < 2 {
                trace!("Skipping unparseable reg line: {}", line);
                continue;
            }
            let name = if parts[0] == DEFAULT_VALUE_NAME {
                String::new()
            } else {
                parts[0].to_string()
            };
            listing.values.push(RegEntry {
                name,
                value_type: ValueType::from_reg_name(parts[1].trim()),
                data: parts.get(2).map(|d| d.trim_end().to_string()).unwrap_or_default(),
            });
        } else if !seen_header {
            seen_header = true;
        } else if let Some(name) = line.trim().rsplit('\\').next() {
            listing.subkeys.push(name.to_string());
        }
    }

    listing
}

/// Parse `0x...` integer data
fn parse_integer(data: &str) -> Option<u64> {
    u64::from_str_radix(data.trim().trim_start_matches("0x"), 16).ok()
}

/// Parse contiguous hex pairs such as `A400FF`
fn parse_binary(data: &str) -> Option<Vec<u8>> {
    let hex: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// Registry accessor backed by `reg.exe`
#[derive(Debug, Default)]
pub struct LiveKeyStore {
    handles: Mutex<HashMap<u64, Arc<KeyListing>>>,
    next_id: AtomicU64,
}

impl LiveKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn query(path: &str) -> AccessResult<KeyListing> {
        if !cfg!(windows) {
            return Err(AccessError::new(
                AccessErrorKind::Unsupported,
                path,
                "the registry is only available on Windows",
            ));
        }

        debug!("reg query {}", path);
        let output = Command::new("reg")
            .args(["query", path])
            .output()
            .map_err(|e| AccessError::from_io(path, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let kind = classify_query_failure(&stderr);
            return Err(AccessError::new(kind, path, stderr.trim().to_string()));
        }

        Ok(parse_reg_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    fn listing(&self, handle: &KeyHandle) -> AccessResult<Arc<KeyListing>> {
        lock(&self.handles)
            .get(&handle.id())
            .cloned()
            .ok_or_else(|| AccessError::invalid_handle(handle.path()))
    }

    fn entry(&self, handle: &KeyHandle, name: &str) -> AccessResult<RegEntry> {
        let listing = self.listing(handle)?;
        listing.entry(name).cloned().ok_or_else(|| {
            AccessError::not_found(handle.path(), format!("no value named '{}'", name))
        })
    }
}

fn mismatch(handle: &KeyHandle, name: &str, wanted: &str) -> AccessError {
    AccessError::new(
        AccessErrorKind::TypeMismatch,
        handle.path(),
        format!("value '{}' is not {}", name, wanted),
    )
}

fn malformed(handle: &KeyHandle, entry: &RegEntry) -> AccessError {
    AccessError::new(
        AccessErrorKind::Malformed,
        handle.path(),
        format!("cannot decode value '{}': {}", entry.name, entry.data),
    )
}

impl KeyStore for LiveKeyStore {
    fn open(&self, path: &str, mode: AccessMode) -> AccessResult<KeyHandle> {
        if mode == AccessMode::ReadWrite {
            return Err(AccessError::new(
                AccessErrorKind::PermissionDenied,
                path,
                "registry keys are opened read-only",
            ));
        }
        let listing = Self::query(path)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.handles).insert(id, Arc::new(listing));
        Ok(KeyHandle::new(id, path))
    }

    fn read_string(&self, handle: &KeyHandle, name: &str) -> AccessResult<(String, ValueType)> {
        let entry = self.entry(handle, name)?;
        match entry.value_type {
            Some(ty) if ty.is_string() => Ok((entry.data, ty)),
            _ => Err(mismatch(handle, name, "a string")),
        }
    }

    fn read_binary(&self, handle: &KeyHandle, name: &str) -> AccessResult<(Vec<u8>, ValueType)> {
        let entry = self.entry(handle, name)?;
        match entry.value_type {
            Some(ValueType::Binary) => parse_binary(&entry.data)
                .map(|bytes| (bytes, ValueType::Binary))
                .ok_or_else(|| malformed(handle, &entry)),
            _ => Err(mismatch(handle, name, "binary")),
        }
    }

    fn read_integer(&self, handle: &KeyHandle, name: &str) -> AccessResult<(u64, ValueType)> {
        let entry = self.entry(handle, name)?;
        match entry.value_type {
            Some(ty) if ty.is_integer() => parse_integer(&entry.data)
                .map(|value| (value, ty))
                .ok_or_else(|| malformed(handle, &entry)),
            _ => Err(mismatch(handle, name, "an integer")),
        }
    }

    fn value_names(&self, handle: &KeyHandle, limit: usize) -> AccessResult<Vec<String>> {
        let listing = self.listing(handle)?;
        Ok(listing
            .values
            .iter()
            .take(limit)
            .map(|e| e.name.clone())
            .collect())
    }

    fn child_names(&self, handle: &KeyHandle, limit: usize) -> AccessResult<Vec<String>> {
        let listing = self.listing(handle)?;
        Ok(listing.subkeys.iter().take(limit).cloned().collect())
    }

    fn stat(&self, handle: &KeyHandle) -> AccessResult<KeyInfo> {
        let listing = self.listing(handle)?;
        Ok(KeyInfo {
            value_count: listing.values.len(),
            child_count: listing.subkeys.len(),
        })
    }

    fn close(&self, handle: &KeyHandle) -> AccessResult<CloseOutcome> {
        match lock(&self.handles).remove(&handle.id()) {
            Some(_) => Ok(CloseOutcome::Closed),
            None => Ok(CloseOutcome::AlreadyClosed),
        }
    }
}
