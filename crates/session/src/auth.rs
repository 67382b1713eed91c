// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session creation and teardown against the backend's auth endpoints.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::events::SessionNotifier;
use crate::refresh::{RefreshCoordinator, TokenGrant};
use crate::store::TokenStore;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

/// Unauthenticated auth calls plus logout.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
    notifier: SessionNotifier,
}

impl AuthClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        store: Arc<TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
        notifier: SessionNotifier,
    ) -> Self {
        Self {
            http: crate::transport::http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_owned(),
            store,
            coordinator,
            notifier,
        }
    }

    /// Sign in with a username and password.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let grant = self.post_for_grant("/auth/login", &LoginRequest { username, password }).await?;
        info!(username, "signed in");
        self.establish(grant)
    }

    /// Create an account and sign in to it.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        let body = RegisterRequest { username, email, password };
        let grant = self.post_for_grant("/auth/register", &body).await?;
        info!(username, "registered");
        self.establish(grant)
    }

    /// End the session locally, then tell the backend, best effort.
    ///
    /// The session is gone before the backend call starts, so requests made
    /// while it is outstanding fail instead of refreshing. Returns whether a
    /// session existed.
    pub async fn logout(&self) -> Result<bool, SessionError> {
        let token = self.store.access_token();
        let had_session = !self.store.snapshot().is_empty();
        let cleared = self.coordinator.end_session();
        if had_session {
            info!("signed out");
            self.notifier.session_lost("signed out");
        }

        if let Some(token) = token {
            let url = format!("{}/auth/logout", self.base_url);
            match self.http.post(&url).bearer_auth(token).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!(status = resp.status().as_u16(), "logout not acknowledged"),
                Err(e) => warn!(err = %e, "logout request failed"),
            }
        }

        cleared.map(|_| had_session)
    }

    fn establish(&self, grant: TokenGrant) -> Result<(), SessionError> {
        let Some(refresh_token) = grant.refresh_token else {
            return Err(SessionError::Transport(anyhow::anyhow!(
                "auth response is missing refreshToken"
            )));
        };
        let saved = self.coordinator.begin_session(
            &grant.access_token,
            &refresh_token,
            grant.expires_in_millis,
        );
        self.notifier.session_established();
        saved
    }

    async fn post_for_grant<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<TokenGrant, SessionError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| SessionError::Transport(anyhow::anyhow!("HTTP error: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| SessionError::Transport(anyhow::anyhow!("read body: {e}")))?;

        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(SessionError::Unauthorized(crate::transport::error_message(status, &text)));
        }
        if !status.is_success() {
            return Err(SessionError::Transport(anyhow::anyhow!(
                "{}",
                crate::transport::error_message(status, &text)
            )));
        }
        serde_json::from_str(&text)
            .map_err(|e| SessionError::Transport(anyhow::anyhow!("parse response: {e}")))
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
