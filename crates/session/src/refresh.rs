// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight access token refresh.
//!
//! At most one refresh call is outstanding. Callers that ask while one is
//! running are parked as waiters and receive the same outcome, in arrival
//! order. The refresh itself runs on its own task so a caller that gives up
//! never strands the others.
//!
//! Store writes are fenced by a session epoch that login and logout advance:
//! a refresh only writes back into the session it started from.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::events::SessionNotifier;
use crate::expiry::ExpiryPolicy;
use crate::store::{Session, TokenStore};

/// Token pair issued by the backend on login, registration, or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: String,
    /// Omitted by some refresh responses; the current refresh token stays valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token lifetime in milliseconds.
    #[serde(alias = "expiresIn")]
    pub expires_in_millis: u64,
}

/// Why a refresh did not produce a token. Every variant ends the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The backend refused the refresh token.
    Rejected(String),
    /// The refresh call itself failed (network, 5xx, bad payload).
    Transport(String),
    /// No refresh token is stored.
    NoSession,
    /// The session was torn down while the refresh was in flight.
    TornDown,
}

impl fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "refresh token rejected: {msg}"),
            Self::Transport(msg) => write!(f, "refresh failed: {msg}"),
            Self::NoSession => f.write_str("not signed in"),
            Self::TornDown => f.write_str("session closed"),
        }
    }
}

impl std::error::Error for RefreshFailure {}

impl From<RefreshFailure> for SessionError {
    fn from(failure: RefreshFailure) -> Self {
        SessionError::AuthenticationExpired(failure.to_string())
    }
}

/// New access token, or the shared failure.
pub type RefreshOutcome = Result<String, RefreshFailure>;

/// Calls the remote refresh endpoint.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshFailure>;
}

/// What prompted a refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshReason {
    /// The stored token is inside the expiry buffer.
    Expired,
    /// The backend rejected this access token.
    Rejected(String),
    /// Refresh unconditionally.
    Forced,
}

struct Inflight {
    generation: u64,
    epoch: u64,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    abort: AbortHandle,
}

/// Serialization point for refresh calls.
pub struct RefreshCoordinator {
    store: Arc<TokenStore>,
    refresher: Arc<dyn Refresher>,
    notifier: SessionNotifier,
    policy: ExpiryPolicy,
    inflight: Mutex<Option<Inflight>>,
    /// Locked for every store write made on behalf of a session.
    epoch: Mutex<u64>,
    generation: AtomicU64,
    refresh_calls: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<TokenStore>,
        refresher: Arc<dyn Refresher>,
        notifier: SessionNotifier,
        policy: ExpiryPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            refresher,
            notifier,
            policy,
            inflight: Mutex::new(None),
            epoch: Mutex::new(0),
            generation: AtomicU64::new(0),
            refresh_calls: AtomicU64::new(0),
        })
    }

    /// Obtain a usable access token, refreshing at most once across all
    /// concurrent callers.
    ///
    /// If another caller already replaced the token this request is about
    /// (see [`RefreshReason`]), the current token is returned without a call.
    pub async fn request_refresh(self: &Arc<Self>, reason: RefreshReason) -> RefreshOutcome {
        self.acquire(reason).await.map(|(token, _)| token)
    }

    /// Like [`request_refresh`](Self::request_refresh), also reporting whether
    /// the token came out of a refresh call (`true`) or was already stored.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        reason: RefreshReason,
    ) -> Result<(String, bool), RefreshFailure> {
        let rx = {
            let mut inflight = self.inflight.lock();
            match inflight.as_mut() {
                Some(current) => {
                    let (tx, rx) = oneshot::channel();
                    current.waiters.push(tx);
                    debug!(waiters = current.waiters.len(), "joining in-flight refresh");
                    rx
                }
                None => {
                    let (epoch, snapshot) = {
                        let epoch = self.epoch.lock();
                        (*epoch, self.store.snapshot())
                    };
                    if let Some(token) = self.reusable_token(&snapshot, &reason) {
                        debug!("token already replaced, skipping refresh");
                        return Ok((token, false));
                    }
                    let Some(refresh_token) =
                        snapshot.refresh_token.filter(|_| snapshot.access_token.is_some())
                    else {
                        return Err(RefreshFailure::NoSession);
                    };

                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let (tx, rx) = oneshot::channel();
                    let coordinator = Arc::clone(self);
                    let handle = tokio::spawn(async move {
                        coordinator.run_refresh(generation, refresh_token).await;
                    });
                    *inflight = Some(Inflight {
                        generation,
                        epoch,
                        waiters: vec![tx],
                        abort: handle.abort_handle(),
                    });
                    rx
                }
            }
        };

        let token = rx.await.unwrap_or(Err(RefreshFailure::TornDown))?;
        Ok((token, true))
    }

    fn reusable_token(&self, snapshot: &Session, reason: &RefreshReason) -> Option<String> {
        if !snapshot.has_session() {
            return None;
        }
        let expired = self.policy.is_expired(snapshot, self.store.now_ms());
        let current = snapshot.access_token.as_deref()?;
        let reusable = match reason {
            RefreshReason::Expired => !expired,
            RefreshReason::Rejected(rejected) => !expired && current != rejected,
            RefreshReason::Forced => false,
        };
        reusable.then(|| current.to_owned())
    }

    async fn run_refresh(self: Arc<Self>, generation: u64, refresh_token: String) {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        info!(generation, "refreshing access token");
        let result = self.refresher.refresh(&refresh_token).await;

        // Still marked in flight while writing, so new callers join as waiters.
        let Some(epoch) = self.inflight_epoch(generation) else {
            debug!(generation, "discarding refresh result after teardown");
            return;
        };
        let outcome = self.write_back(epoch, result, refresh_token);

        let Some(waiters) = self.inflight_waiters(generation) else {
            debug!(generation, "refresh torn down while writing back");
            return;
        };

        match &outcome {
            Ok(_) => {
                info!(generation, waiters = waiters.len(), "access token refreshed");
                self.notifier.session_established();
            }
            Err(RefreshFailure::TornDown) => {
                debug!(generation, "session replaced during refresh, result discarded");
            }
            Err(failure) => {
                warn!(
                    generation,
                    waiters = waiters.len(),
                    reason = %failure,
                    "refresh failed, session lost"
                );
                self.notifier.session_lost(failure.to_string());
            }
        }

        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
    }

    fn inflight_epoch(&self, generation: u64) -> Option<u64> {
        self.inflight.lock().as_ref().filter(|c| c.generation == generation).map(|c| c.epoch)
    }

    fn inflight_waiters(&self, generation: u64) -> Option<Vec<oneshot::Sender<RefreshOutcome>>> {
        let mut inflight = self.inflight.lock();
        if inflight.as_ref().map(|c| c.generation) != Some(generation) {
            return None;
        }
        inflight.take().map(|c| c.waiters)
    }

    /// Apply a refresh result to the store, unless the session it was started
    /// from has since been ended or replaced.
    fn write_back(
        &self,
        epoch: u64,
        result: Result<TokenGrant, RefreshFailure>,
        refresh_token: String,
    ) -> RefreshOutcome {
        let current = self.epoch.lock();
        if *current != epoch {
            return Err(RefreshFailure::TornDown);
        }
        match result {
            Ok(grant) => {
                let refresh = grant.refresh_token.unwrap_or(refresh_token);
                if let Err(e) =
                    self.store.save(&grant.access_token, &refresh, grant.expires_in_millis)
                {
                    warn!(err = %e, "refreshed tokens kept in memory only");
                }
                Ok(grant.access_token)
            }
            Err(failure) => {
                if let Err(e) = self.store.clear() {
                    warn!(err = %e, "failed to clear persisted session");
                }
                Err(failure)
            }
        }
    }

    /// Install a newly issued token pair. Any refresh belonging to the
    /// previous session is torn down and can no longer write back.
    pub fn begin_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_ms: u64,
    ) -> Result<(), SessionError> {
        self.teardown();
        let mut epoch = self.epoch.lock();
        *epoch += 1;
        self.store.save(access_token, refresh_token, expires_in_ms)
    }

    /// Tear down any in-flight refresh and clear the store. Refreshes that
    /// started before this call cannot bring the session back.
    ///
    /// Returns whether a session was present.
    pub fn end_session(&self) -> Result<bool, SessionError> {
        self.teardown();
        let mut epoch = self.epoch.lock();
        *epoch += 1;
        self.store.clear()
    }

    /// Abandon any in-flight refresh. Its waiters resolve with
    /// [`RefreshFailure::TornDown`] and its result is discarded.
    ///
    /// Returns the number of waiters released.
    pub fn teardown(&self) -> usize {
        let Some(inflight) = self.inflight.lock().take() else {
            return 0;
        };
        inflight.abort.abort();
        let released = inflight.waiters.len();
        for tx in inflight.waiters {
            let _ = tx.send(Err(RefreshFailure::TornDown));
        }
        info!(generation = inflight.generation, released, "in-flight refresh torn down");
        released
    }

    pub fn in_progress(&self) -> bool {
        self.inflight.lock().is_some()
    }

    /// Callers parked on the in-flight refresh, including the one that started it.
    pub fn waiters(&self) -> usize {
        self.inflight.lock().as_ref().map_or(0, |c| c.waiters.len())
    }

    /// Number of refresh calls issued so far.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }
}

// -- HTTP refresh endpoint ----------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Refresher backed by `POST {base}/auth/refresh`.
pub struct HttpRefresher {
    http: reqwest::Client,
    url: String,
}

impl HttpRefresher {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            http: crate::transport::http_client(timeout),
            url: format!("{}/auth/refresh", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl Refresher for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshFailure> {
        let resp = self
            .http
            .post(&self.url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshFailure::Transport(format!("HTTP error: {e}")))?;

        let status = resp.status();
        let body =
            resp.text().await.map_err(|e| RefreshFailure::Transport(format!("read body: {e}")))?;

        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(RefreshFailure::Rejected(crate::transport::error_message(status, &body)));
        }
        if !status.is_success() {
            return Err(RefreshFailure::Transport(crate::transport::error_message(status, &body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| RefreshFailure::Transport(format!("parse response: {e}")))
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
