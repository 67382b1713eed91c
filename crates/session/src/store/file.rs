// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key-value persistence in a single JSON file with atomic writes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::KeyValueStore;

/// JSON object file holding string entries.
///
/// Entries are cached after the first read. Every mutation rewrites the whole
/// file through a temp file and rename.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), entries: Mutex::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut guard = self.entries.lock();
        if guard.is_none() {
            *guard = Some(read_entries(&self.path)?);
        }
        match guard.as_mut() {
            Some(entries) => f(entries),
            None => anyhow::bail!("entries not loaded"),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.with_entries(|entries| Ok(entries.get(key).cloned()))
    }

    fn set_string(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.with_entries(|entries| {
            let mut next = entries.clone();
            next.insert(key.to_owned(), value.to_owned());
            write_entries(&self.path, &next)?;
            *entries = next;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.with_entries(|entries| {
            if !entries.contains_key(key) {
                return Ok(());
            }
            let mut next = entries.clone();
            next.remove(key);
            write_entries(&self.path, &next)?;
            *entries = next;
            Ok(())
        })
    }
}

fn read_entries(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    match std::fs::read_to_string(path) {
        Ok(data) if data.trim().is_empty() => Ok(BTreeMap::new()),
        Ok(data) => match serde_json::from_str(&data) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(path = %path.display(), "discarding unreadable state file: {e}");
                Ok(BTreeMap::new())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no persisted state");
            Ok(BTreeMap::new())
        }
        Err(e) => Err(anyhow::anyhow!("cannot read {}: {e}", path.display())),
    }
}

/// Write tmp + rename so a crash never leaves a truncated file behind.
fn write_entries(path: &Path, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(entries)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_name = format!(
        "{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
