// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::{any, MethodRouter};
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::clock::ManualClock;
use crate::events::SessionNotifier;
use crate::expiry::ExpiryPolicy;
use crate::pipeline::{Attempt, AuthPipeline, PendingRequest, RequestFailure};
use crate::refresh::{RefreshCoordinator, RefreshFailure, Refresher, TokenGrant};
use crate::store::memory::MemoryStore;
use crate::store::TokenStore;

pub const NOW: u64 = 1_700_000_000_000;
pub const HOUR_MS: u64 = 3_600_000;

pub fn grant(access: &str, refresh: Option<&str>, expires_in_millis: u64) -> TokenGrant {
    TokenGrant {
        access_token: access.to_owned(),
        refresh_token: refresh.map(str::to_owned),
        expires_in_millis,
    }
}

/// Refresher that replays canned outcomes and can be held closed.
pub struct ScriptedRefresher {
    responses: Mutex<VecDeque<Result<TokenGrant, RefreshFailure>>>,
    last: Mutex<Option<Result<TokenGrant, RefreshFailure>>>,
    gate: Semaphore,
    calls: AtomicU32,
    seen: Mutex<Vec<String>>,
}

impl ScriptedRefresher {
    pub fn new(responses: Vec<Result<TokenGrant, RefreshFailure>>) -> Self {
        Self::with_permits(responses, Semaphore::MAX_PERMITS)
    }

    /// Like [`ScriptedRefresher::new`], but every call blocks until [`open`](Self::open).
    pub fn gated(responses: Vec<Result<TokenGrant, RefreshFailure>>) -> Self {
        Self::with_permits(responses, 0)
    }

    fn with_permits(responses: Vec<Result<TokenGrant, RefreshFailure>>, permits: usize) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            gate: Semaphore::new(permits),
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(1024);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Refresher for ScriptedRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(refresh_token.to_owned());
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        let next = self.responses.lock().pop_front();
        match next {
            Some(response) => {
                *self.last.lock() = Some(response.clone());
                response
            }
            None => self
                .last
                .lock()
                .clone()
                .unwrap_or(Err(RefreshFailure::Transport("no scripted response".into()))),
        }
    }
}

/// Request that succeeds only with one specific token.
pub struct AcceptToken {
    accepted: String,
    executions: Mutex<Vec<(String, Attempt)>>,
}

impl AcceptToken {
    pub fn new(accepted: &str) -> Self {
        Self { accepted: accepted.to_owned(), executions: Mutex::new(Vec::new()) }
    }

    pub fn executions(&self) -> Vec<(String, Attempt)> {
        self.executions.lock().clone()
    }
}

#[async_trait]
impl PendingRequest for AcceptToken {
    type Output = String;

    async fn execute(&self, access_token: &str, attempt: Attempt) -> Result<String, RequestFailure> {
        self.executions.lock().push((access_token.to_owned(), attempt));
        if self.accepted == access_token {
            Ok(format!("ok:{access_token}"))
        } else {
            Err(RequestFailure::Unauthorized("HTTP 401".into()))
        }
    }
}

/// Everything wired together over an in-memory store and a manual clock.
pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub backend: Arc<MemoryStore>,
    pub store: Arc<TokenStore>,
    pub refresher: Arc<ScriptedRefresher>,
    pub notifier: SessionNotifier,
    pub coordinator: Arc<RefreshCoordinator>,
    pub pipeline: AuthPipeline,
}

impl Fixture {
    pub fn new(refresher: ScriptedRefresher) -> Self {
        let clock = Arc::new(ManualClock::new(NOW));
        let backend = Arc::new(MemoryStore::new());
        let store = Arc::new(TokenStore::new(backend.clone(), clock.clone()));
        let refresher = Arc::new(refresher);
        let notifier = SessionNotifier::default();
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            refresher.clone(),
            notifier.clone(),
            ExpiryPolicy::default(),
        );
        let pipeline = AuthPipeline::new(Arc::clone(&store), Arc::clone(&coordinator));
        Self { clock, backend, store, refresher, notifier, coordinator, pipeline }
    }

    /// Signed in with a token valid for an hour.
    pub fn signed_in(self) -> anyhow::Result<Self> {
        self.store.save("a1", "r1", HOUR_MS)?;
        Ok(self)
    }

    /// Signed in with a token that expired ten minutes ago.
    pub fn signed_in_expired(self) -> anyhow::Result<Self> {
        self.store.save("a1", "r1", 0)?;
        self.clock.advance(Duration::from_secs(600));
        Ok(self)
    }

    /// Wait until `n` callers are parked on the in-flight refresh.
    pub async fn wait_for_waiters(&self, n: usize) -> anyhow::Result<()> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.coordinator.waiters() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for {n} waiters"))
    }
}

/// One request as seen by a mock endpoint.
#[derive(Debug, Clone)]
pub struct Captured {
    pub uri: String,
    pub authorization: Option<String>,
    pub body: String,
}

/// Handle on a [`scripted`] endpoint.
#[derive(Clone, Default)]
pub struct Scripted {
    pub calls: Arc<AtomicU32>,
    pub captured: Arc<Mutex<Vec<Captured>>>,
}

impl Scripted {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn captured(&self) -> Vec<Captured> {
        self.captured.lock().clone()
    }
}

/// Endpoint answering with `responses` in order, repeating the last one.
pub fn scripted(responses: Vec<(u16, String)>) -> (MethodRouter, Scripted) {
    let handle = Scripted::default();
    let responses = Arc::new(responses);
    let state = handle.clone();
    let route = any(move |headers: HeaderMap, uri: Uri, body: String| {
        let state = state.clone();
        let responses = Arc::clone(&responses);
        async move {
            let idx = state.calls.fetch_add(1, Ordering::SeqCst) as usize;
            state.captured.lock().push(Captured {
                uri: uri.to_string(),
                authorization: headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned),
                body,
            });
            let (status, body) = responses
                .get(idx)
                .or(responses.last())
                .cloned()
                .unwrap_or((500, "{}".to_owned()));
            (StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), body)
        }
    });
    (route, handle)
}

/// Serve `app` on an ephemeral local port.
pub async fn serve(app: Router) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(addr)
}
