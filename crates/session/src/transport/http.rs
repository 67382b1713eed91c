// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON API calls routed through the [`AuthPipeline`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::SessionError;
use crate::pipeline::{Attempt, AuthPipeline, PendingRequest, RequestFailure};

/// Authenticated client for the backend's JSON API.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    pipeline: AuthPipeline,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration, pipeline: AuthPipeline) -> Self {
        Self {
            http: super::http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_owned(),
            pipeline,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        let body = self.send(Method::GET, path, None).await?;
        parse(&body)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, SessionError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_value(body)
            .map_err(|e| SessionError::Transport(anyhow::anyhow!("encode request: {e}")))?;
        let body = self.send(Method::POST, path, Some(payload)).await?;
        parse(&body)
    }

    pub async fn delete(&self, path: &str) -> Result<(), SessionError> {
        self.send(Method::DELETE, path, None).await.map(drop)
    }

    /// Issue a request and return the raw response body.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<String, SessionError> {
        let request = HttpRequest {
            http: self.http.clone(),
            url: super::join_url(&self.base_url, path),
            method,
            body,
        };
        self.pipeline.submit(&request).await
    }
}

fn parse<T: DeserializeOwned>(body: &str) -> Result<T, SessionError> {
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body)
        .map_err(|e| SessionError::Transport(anyhow::anyhow!("parse response: {e}")))
}

struct HttpRequest {
    http: reqwest::Client,
    method: Method,
    url: String,
    body: Option<serde_json::Value>,
}

#[async_trait]
impl PendingRequest for HttpRequest {
    type Output = String;

    async fn execute(&self, access_token: &str, attempt: Attempt) -> Result<String, RequestFailure> {
        debug!(method = %self.method, path = %self.url, ?attempt, "api request");
        let mut req = self.http.request(self.method.clone(), &self.url).bearer_auth(access_token);
        if let Some(ref body) = self.body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| anyhow::anyhow!("HTTP error: {e}"))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| anyhow::anyhow!("read body: {e}"))?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(RequestFailure::Unauthorized(super::error_message(status, &text)));
        }
        if !status.is_success() {
            return Err(RequestFailure::Transport(anyhow::anyhow!(
                "{}",
                super::error_message(status, &text)
            )));
        }
        Ok(text)
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
