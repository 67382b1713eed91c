// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executors that carry the access token to the backend.

pub mod http;
pub mod media;
pub mod ws;

use std::sync::Once;
use std::time::Duration;

use reqwest::Url;

const TOKEN_PARAM: &str = "token";

static CRYPTO: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// HTTP client with a whole-request timeout.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    ensure_crypto_provider();
    reqwest::Client::builder().timeout(timeout).build().unwrap_or_default()
}

/// Human-readable message for a failed response.
///
/// Prefers the backend's `error` or `message` field, falling back to the raw body.
pub fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok().and_then(|v| {
        ["error", "message"]
            .iter()
            .find_map(|key| v.get(key).and_then(|m| m.as_str()).map(str::to_owned))
    });
    match parsed {
        Some(msg) => msg,
        None if body.trim().is_empty() => format!("HTTP {}", status.as_u16()),
        None => format!("HTTP {}: {}", status.as_u16(), body.trim()),
    }
}

/// Join `path` onto `base_url`; absolute URLs pass through unchanged.
pub fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        base.to_owned()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// `url` with its `token` query parameter set to `token`.
pub fn authorized_url(url: &str, token: &str) -> anyhow::Result<String> {
    let mut parsed = Url::parse(url)?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != TOKEN_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut query = parsed.query_pairs_mut();
        query.clear();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        query.append_pair(TOKEN_PARAM, token);
    }
    Ok(parsed.into())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
