// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Media downloads authorized by a `token` query parameter.
//!
//! Media URLs are often handed to consumers that cannot set headers, so the
//! access token travels in the URL. The URL is rebuilt on every attempt so a
//! retry after refresh carries the new token.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::SessionError;
use crate::pipeline::{Attempt, AuthPipeline, PendingRequest, RequestFailure};

/// Authenticated media fetches with their own (longer) timeout.
#[derive(Clone)]
pub struct MediaLoader {
    http: reqwest::Client,
    base_url: String,
    pipeline: AuthPipeline,
}

impl MediaLoader {
    pub fn new(base_url: &str, timeout: Duration, pipeline: AuthPipeline) -> Self {
        Self {
            http: super::http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_owned(),
            pipeline,
        }
    }

    /// Resolve a possibly relative media path against the API base.
    pub fn normalize_url(&self, url: &str) -> String {
        super::join_url(&self.base_url, url)
    }

    /// Media URL carrying the current access token, for consumers that fetch
    /// it themselves. `None` when signed out.
    pub fn current_url(&self, url: &str) -> Option<String> {
        let token = self.pipeline.current_access_token()?;
        super::authorized_url(&self.normalize_url(url), &token).ok()
    }

    /// Download a media object.
    pub async fn fetch(&self, url: &str) -> Result<Bytes, SessionError> {
        let request = MediaRequest { http: self.http.clone(), url: self.normalize_url(url) };
        self.pipeline.submit(&request).await
    }
}

struct MediaRequest {
    http: reqwest::Client,
    url: String,
}

#[async_trait]
impl PendingRequest for MediaRequest {
    type Output = Bytes;

    async fn execute(&self, access_token: &str, attempt: Attempt) -> Result<Bytes, RequestFailure> {
        debug!(path = %self.url, ?attempt, "media request");
        let url = super::authorized_url(&self.url, access_token)?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP error: {e}"))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            return Err(RequestFailure::Unauthorized(super::error_message(status, &body)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RequestFailure::Transport(anyhow::anyhow!(
                "{}",
                super::error_message(status, &body)
            )));
        }
        Ok(resp.bytes().await.map_err(|e| anyhow::anyhow!("read body: {e}"))?)
    }
}

#[cfg(test)]
#[path = "media_tests.rs"]
mod tests;
