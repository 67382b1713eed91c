// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access token expiry decision.

use std::time::Duration;

use crate::store::Session;

/// Default margin before expiry at which a token stops being used (5 minutes).
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// Decides whether an access token is still usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    buffer: Duration,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_BUFFER)
    }
}

impl ExpiryPolicy {
    pub fn new(buffer: Duration) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    pub fn is_expired(&self, session: &Session, now_ms: u64) -> bool {
        is_expired(session, now_ms, self.buffer)
    }

    /// Milliseconds of use left before the buffer kicks in, if any.
    pub fn remaining_ms(&self, session: &Session, now_ms: u64) -> Option<u64> {
        let refresh_at = session.expires_at_ms?.saturating_sub(self.buffer.as_millis() as u64);
        refresh_at.checked_sub(now_ms).filter(|ms| *ms > 0)
    }
}

/// True when `expires_at_ms` is unknown or `now_ms` has reached
/// `expires_at_ms - buffer`.
pub fn is_expired(session: &Session, now_ms: u64, buffer: Duration) -> bool {
    match session.expires_at_ms {
        Some(expires_at_ms) => now_ms >= expires_at_ms.saturating_sub(buffer.as_millis() as u64),
        None => true,
    }
}

#[cfg(test)]
#[path = "expiry_tests.rs"]
mod tests;
