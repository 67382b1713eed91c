// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side session lifecycle for an authenticated chat backend.
//!
//! An [`AuthSession`] owns the token pair, keeps it fresh, and hands out
//! adapters (REST, socket, media) whose calls all go through one
//! [`AuthPipeline`](pipeline::AuthPipeline): credential injection, a single
//! coordinated refresh on expiry or rejection, and one retry.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod expiry;
pub mod pipeline;
pub mod refresh;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::auth::AuthClient;
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{SessionEvent, SessionNotifier};
use crate::expiry::ExpiryPolicy;
use crate::pipeline::AuthPipeline;
use crate::refresh::{HttpRefresher, RefreshCoordinator, Refresher};
use crate::store::file::FileStore;
use crate::store::memory::MemoryStore;
use crate::store::{KeyValueStore, TokenStore};
use crate::transport::http::ApiClient;
use crate::transport::media::MediaLoader;
use crate::transport::ws::SocketConnector;

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    /// Until the access token expires; `None` when signed out or unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_ms: Option<u64>,
    /// The next authenticated call will refresh first.
    pub needs_refresh: bool,
    pub refresh_in_flight: bool,
}

/// One authenticated session and everything that talks to the backend with it.
///
/// Construct once per process and share by reference or `Arc`.
pub struct AuthSession {
    store: Arc<TokenStore>,
    notifier: SessionNotifier,
    coordinator: Arc<RefreshCoordinator>,
    pipeline: AuthPipeline,
    api: ApiClient,
    media: MediaLoader,
    socket: SocketConnector,
    auth: AuthClient,
}

impl AuthSession {
    /// Session persisted to `config.state_path()`, talking to `config.base_url`.
    pub fn open(config: &SessionConfig) -> Self {
        let path = config.state_path();
        debug!(path = %path.display(), "opening session store");
        let refresher = HttpRefresher::new(&config.base_url, config.refresh_timeout());
        Self::with_parts(
            config,
            Arc::new(FileStore::new(path)),
            Arc::new(SystemClock),
            Arc::new(refresher),
        )
    }

    /// Session that is forgotten when the process exits.
    pub fn in_memory(config: &SessionConfig) -> Self {
        let refresher = HttpRefresher::new(&config.base_url, config.refresh_timeout());
        Self::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            Arc::new(refresher),
        )
    }

    /// Wire a session from explicit parts and restore any persisted tokens.
    pub fn with_parts(
        config: &SessionConfig,
        backend: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        refresher: Arc<dyn Refresher>,
    ) -> Self {
        let store = Arc::new(TokenStore::new(backend, clock));
        store.load();

        let notifier = SessionNotifier::default();
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            refresher,
            notifier.clone(),
            ExpiryPolicy::new(config.refresh_buffer()),
        );
        let pipeline = AuthPipeline::new(Arc::clone(&store), Arc::clone(&coordinator));

        let api = ApiClient::new(&config.base_url, config.api_timeout(), pipeline.clone());
        let media = MediaLoader::new(&config.base_url, config.media_timeout(), pipeline.clone());
        let socket = SocketConnector::new(&config.base_url, &config.socket_path, pipeline.clone());
        let auth = AuthClient::new(
            &config.base_url,
            config.api_timeout(),
            Arc::clone(&store),
            Arc::clone(&coordinator),
            notifier.clone(),
        );

        Self { store, notifier, coordinator, pipeline, api, media, socket, auth }
    }

    pub fn status(&self) -> SessionStatus {
        let session = self.store.snapshot();
        let now_ms = self.store.now_ms();
        let authenticated = session.has_session();
        SessionStatus {
            authenticated,
            expires_in_ms: session
                .expires_at_ms
                .filter(|_| authenticated)
                .map(|at| at.saturating_sub(now_ms)),
            needs_refresh: authenticated && self.coordinator.policy().is_expired(&session, now_ms),
            refresh_in_flight: self.coordinator.in_progress(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.has_session()
    }

    /// Current access token without refreshing, for out-of-band consumers.
    pub fn current_access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.notifier.subscribe()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        self.auth.login(username, password).await
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        self.auth.register(username, email, password).await
    }

    /// Returns whether a session existed.
    pub async fn logout(&self) -> Result<bool, SessionError> {
        self.auth.logout().await
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn media(&self) -> &MediaLoader {
        &self.media
    }

    pub fn socket(&self) -> &SocketConnector {
        &self.socket
    }

    pub fn pipeline(&self) -> &AuthPipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }
}
