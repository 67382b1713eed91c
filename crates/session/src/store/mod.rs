// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session token storage: an in-memory snapshot backed by a key-value store.
//!
//! The in-memory copy is the single source of truth for the running process.
//! Durable writes happen after the memory update; when they fail the caller
//! gets [`SessionError::Persistence`] but the new tokens stay in effect.

pub mod file;
pub mod memory;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::SessionError;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const EXPIRES_AT_KEY: &str = "expires_at_ms";

/// Durable string storage consumed by [`TokenStore`].
pub trait KeyValueStore: Send + Sync {
    fn get_string(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set_string(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Authentication state of the running client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Absolute access token expiry, epoch milliseconds.
    pub expires_at_ms: Option<u64>,
}

impl Session {
    /// Both tokens present. A half session counts as signed out.
    pub fn has_session(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.expires_at_ms.is_none()
    }
}

/// Owner of the current [`Session`].
pub struct TokenStore {
    session: RwLock<Session>,
    backend: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    /// Create an empty store. Call [`TokenStore::load`] to restore a saved session.
    pub fn new(backend: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { session: RwLock::new(Session::default()), backend, clock }
    }

    /// Restore the session from durable storage.
    ///
    /// Unreadable or partial entries leave the store signed out; this never fails.
    pub fn load(&self) {
        let access_token = self.read_key(ACCESS_TOKEN_KEY);
        let refresh_token = self.read_key(REFRESH_TOKEN_KEY);
        let expires_at_ms = self.read_key(EXPIRES_AT_KEY).and_then(|raw| match raw.parse() {
            Ok(ms) => Some(ms),
            Err(e) => {
                warn!(key = EXPIRES_AT_KEY, "ignoring malformed expiry: {e}");
                None
            }
        });

        let restored = Session { access_token, refresh_token, expires_at_ms };
        let restored = if restored.has_session() {
            debug!(expires_at_ms = ?restored.expires_at_ms, "restored persisted session");
            restored
        } else {
            if !restored.is_empty() {
                debug!("discarding partial persisted session");
            }
            Session::default()
        };
        *self.session.write() = restored;
    }

    fn read_key(&self, key: &str) -> Option<String> {
        match self.backend.get_string(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, "failed to read persisted session: {e:#}");
                None
            }
        }
    }

    /// Replace the session with a freshly issued token pair.
    pub fn save(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_ms: u64,
    ) -> Result<(), SessionError> {
        let expires_at_ms = self.clock.now_ms().saturating_add(expires_in_ms);
        *self.session.write() = Session {
            access_token: Some(access_token.to_owned()),
            refresh_token: Some(refresh_token.to_owned()),
            expires_at_ms: Some(expires_at_ms),
        };

        self.backend
            .set_string(ACCESS_TOKEN_KEY, access_token)
            .and_then(|()| self.backend.set_string(REFRESH_TOKEN_KEY, refresh_token))
            .and_then(|()| self.backend.set_string(EXPIRES_AT_KEY, &expires_at_ms.to_string()))
            .map_err(|e| {
                warn!("failed to persist session: {e:#}");
                SessionError::Persistence(format!("{e:#}"))
            })?;

        debug!(expires_at_ms, "session saved");
        Ok(())
    }

    /// Forget the session in memory and in durable storage.
    ///
    /// Returns whether a session was present. Clearing an empty store is a no-op.
    pub fn clear(&self) -> Result<bool, SessionError> {
        let had_session = {
            let mut session = self.session.write();
            let had = !session.is_empty();
            *session = Session::default();
            had
        };

        let mut failure = None;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY] {
            if let Err(e) = self.backend.remove(key) {
                warn!(key, "failed to remove persisted session entry: {e:#}");
                failure.get_or_insert(format!("{e:#}"));
            }
        }
        match failure {
            Some(msg) => Err(SessionError::Persistence(msg)),
            None => {
                if had_session {
                    debug!("session cleared");
                }
                Ok(had_session)
            }
        }
    }

    /// Consistent copy of all session fields.
    pub fn snapshot(&self) -> Session {
        self.session.read().clone()
    }

    pub fn has_session(&self) -> bool {
        self.session.read().has_session()
    }

    /// Current access token, for out-of-band use such as media URLs.
    pub fn access_token(&self) -> Option<String> {
        let session = self.session.read();
        if session.has_session() {
            session.access_token.clone()
        } else {
            None
        }
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
