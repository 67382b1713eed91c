// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle broadcast.
//!
//! Subscribers (persistent connections, UI routing) see every transition at
//! least once and must treat repeated identical events as no-ops.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Authenticated / unauthenticated transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A usable credential is available (sign-in or successful refresh).
    Established,
    /// The session is gone and the user has to sign in again.
    Lost { reason: String },
}

/// Fan-out of [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct SessionNotifier {
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionNotifier {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn session_established(&self) {
        self.emit(SessionEvent::Established);
    }

    pub fn session_lost(&self, reason: impl Into<String>) {
        self.emit(SessionEvent::Lost { reason: reason.into() });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let receivers = self.event_tx.send(event.clone()).unwrap_or(0);
        debug!(?event, receivers, "session event");
    }
}

impl Default for SessionNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
