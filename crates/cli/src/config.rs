// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley_session::config::SessionConfig;

/// Command-line client for an authenticated chat backend.
#[derive(Debug, Parser)]
#[command(name = "parley", version, about)]
pub struct Config {
    /// Log format (json or text).
    #[arg(long, env = "PARLEY_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PARLEY_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(flatten)]
    pub session: SessionConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Sign in and store the session
    Login {
        username: String,
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in
    Register {
        username: String,
        email: String,
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show whether a session is stored and when it expires
    Status,
    /// GET an API path and print the JSON response
    Get { path: String },
    /// POST a JSON body to an API path and print the JSON response
    Post { path: String, body: String },
    /// Download a media URL
    Fetch {
        url: String,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print socket frames until interrupted or signed out
    Listen,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {} (expected json or text)", self.log_format);
        }
        if self.session.base_url.trim().is_empty() {
            anyhow::bail!("--base-url must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
