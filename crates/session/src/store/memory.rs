// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::KeyValueStore;

/// Process-local key-value store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes and removals fail, simulating a broken disk.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("store is read-only");
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.check_writable()?;
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.check_writable()?;
        self.entries.lock().remove(key);
        Ok(())
    }
}
