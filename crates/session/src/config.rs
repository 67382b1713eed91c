// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for an authenticated backend session.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Backend base URL.
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "PARLEY_BASE_URL")]
    pub base_url: String,

    /// Session file. Defaults to `session.json` in the state directory.
    #[arg(long, env = "PARLEY_STATE_PATH")]
    pub state_path: Option<PathBuf>,

    /// Refresh this many seconds before the access token expires.
    #[arg(long, default_value_t = 300, env = "PARLEY_REFRESH_BUFFER_SECS")]
    pub refresh_buffer_secs: u64,

    /// Timeout for API requests in milliseconds.
    #[arg(long, default_value_t = 15000, env = "PARLEY_API_TIMEOUT_MS")]
    pub api_timeout_ms: u64,

    /// Timeout for media downloads in milliseconds.
    #[arg(long, default_value_t = 60000, env = "PARLEY_MEDIA_TIMEOUT_MS")]
    pub media_timeout_ms: u64,

    /// Timeout for the token refresh call in milliseconds.
    #[arg(long, default_value_t = 15000, env = "PARLEY_REFRESH_TIMEOUT_MS")]
    pub refresh_timeout_ms: u64,

    /// Socket endpoint path, relative to the base URL.
    #[arg(long, default_value = "/ws", env = "PARLEY_SOCKET_PATH")]
    pub socket_path: String,
}

impl SessionConfig {
    /// Defaults for `base_url`, as if no flags or env vars were given.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            state_path: None,
            refresh_buffer_secs: 300,
            api_timeout_ms: 15000,
            media_timeout_ms: 60000,
            refresh_timeout_ms: 15000,
            socket_path: "/ws".to_owned(),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_path.clone().unwrap_or_else(|| state_dir().join("session.json"))
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn media_timeout(&self) -> Duration {
        Duration::from_millis(self.media_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }
}

/// Resolve the state directory for persisted sessions.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PARLEY_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("parley");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/parley");
    }
    PathBuf::from(".parley")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
