// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request pipeline.
//!
//! Every outbound call that needs a credential goes through
//! [`AuthPipeline::submit`]:
//!
//! ```text
//! Preparing -> Executing -> Succeeded
//!                        -> NeedsRefresh -> Refreshing -> Retrying -> Succeeded | Failed
//! ```
//!
//! Only authorization failures are intercepted. A submitted request sees at
//! most one refresh and at most one retried execution.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SessionError;
use crate::refresh::{RefreshCoordinator, RefreshFailure, RefreshReason};
use crate::store::TokenStore;

/// Which execution of a request this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    /// The single retry after a refresh.
    Retry,
}

/// How a single execution failed.
#[derive(Debug)]
pub enum RequestFailure {
    /// The credential was rejected (HTTP 401 or a transport equivalent).
    Unauthorized(String),
    /// Anything else. Returned to the caller untouched.
    Transport(anyhow::Error),
}

impl From<anyhow::Error> for RequestFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::Transport(err)
    }
}

/// One unit of outbound work that needs a bearer token.
///
/// `execute` may be called twice: once with the current token and, after an
/// authorization failure, once more with a refreshed token. Anything derived
/// from the token (headers, URLs) must be rebuilt on each call.
#[async_trait]
pub trait PendingRequest: Send + Sync {
    type Output: Send;

    async fn execute(
        &self,
        access_token: &str,
        attempt: Attempt,
    ) -> Result<Self::Output, RequestFailure>;
}

/// Pipeline position, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preparing,
    Executing,
    NeedsRefresh,
    Refreshing,
    Retrying,
    Succeeded,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Executing => "executing",
            Self::NeedsRefresh => "needs_refresh",
            Self::Refreshing => "refreshing",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wraps request executors with credential injection, refresh, and one retry.
#[derive(Clone)]
pub struct AuthPipeline {
    store: Arc<TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthPipeline {
    pub fn new(store: Arc<TokenStore>, coordinator: Arc<RefreshCoordinator>) -> Self {
        Self { store, coordinator }
    }

    /// Run `request` with a valid credential.
    pub async fn submit<R>(&self, request: &R) -> Result<R::Output, SessionError>
    where
        R: PendingRequest + ?Sized,
    {
        enter(Stage::Preparing);
        let snapshot = self.store.snapshot();
        if !snapshot.has_session() {
            enter(Stage::Failed);
            return Err(RefreshFailure::NoSession.into());
        }

        // True only when a refresh call produced the token.
        let (token, refreshed) =
            if self.coordinator.policy().is_expired(&snapshot, self.store.now_ms()) {
                enter(Stage::Refreshing);
                self.coordinator.acquire(RefreshReason::Expired).await.map_err(fail)?
            } else {
                match snapshot.access_token {
                    Some(token) => (token, false),
                    None => return Err(fail(RefreshFailure::NoSession)),
                }
            };

        enter(Stage::Executing);
        let rejection = match request.execute(&token, Attempt::First).await {
            Ok(output) => {
                enter(Stage::Succeeded);
                return Ok(output);
            }
            Err(RequestFailure::Transport(err)) => {
                enter(Stage::Failed);
                return Err(SessionError::Transport(err));
            }
            Err(RequestFailure::Unauthorized(msg)) => msg,
        };

        enter(Stage::NeedsRefresh);
        if refreshed {
            // The token was minted for this request and still got rejected.
            enter(Stage::Failed);
            return Err(SessionError::Unauthorized(rejection));
        }

        enter(Stage::Refreshing);
        let token =
            self.coordinator.request_refresh(RefreshReason::Rejected(token)).await.map_err(fail)?;

        enter(Stage::Retrying);
        match request.execute(&token, Attempt::Retry).await {
            Ok(output) => {
                enter(Stage::Succeeded);
                Ok(output)
            }
            Err(RequestFailure::Transport(err)) => {
                enter(Stage::Failed);
                Err(SessionError::Transport(err))
            }
            Err(RequestFailure::Unauthorized(msg)) => {
                enter(Stage::Failed);
                Err(SessionError::Unauthorized(msg))
            }
        }
    }

    /// Run a closure as a [`PendingRequest`].
    pub async fn submit_fn<F, Fut, T>(&self, f: F) -> Result<T, SessionError>
    where
        F: Fn(String, Attempt) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<T, RequestFailure>> + Send,
        T: Send,
    {
        self.submit(&FnRequest(f)).await
    }

    /// Read-only snapshot of the current access token.
    pub fn current_access_token(&self) -> Option<String> {
        self.store.access_token()
    }
}

fn enter(stage: Stage) {
    debug!(stage = stage.as_str(), "pipeline stage");
}

fn fail(failure: RefreshFailure) -> SessionError {
    enter(Stage::Failed);
    failure.into()
}

/// Adapter turning a closure into a [`PendingRequest`].
pub struct FnRequest<F>(pub F);

#[async_trait]
impl<F, Fut, T> PendingRequest for FnRequest<F>
where
    F: Fn(String, Attempt) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<T, RequestFailure>> + Send,
    T: Send,
{
    type Output = T;

    async fn execute(&self, access_token: &str, attempt: Attempt) -> Result<T, RequestFailure> {
        (self.0)(access_token.to_owned(), attempt).await
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
