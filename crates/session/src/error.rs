// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes for the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Persistence,
    Unauthorized,
    AuthenticationExpired,
    Transport,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persistence => "PERSISTENCE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::AuthenticationExpired => "AUTHENTICATION_EXPIRED",
            Self::Transport => "TRANSPORT",
        }
    }

    /// HTTP status a collaborator should surface for this code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Persistence => 500,
            Self::Unauthorized => 401,
            Self::AuthenticationExpired => 401,
            Self::Transport => 502,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the session layer.
#[derive(Debug)]
pub enum SessionError {
    /// Durable storage failed. The in-memory session is still authoritative.
    Persistence(String),
    /// A call was rejected as unauthorized and the one allowed retry was
    /// rejected too.
    Unauthorized(String),
    /// Refresh failed or no session exists. The user has to sign in again.
    AuthenticationExpired(String),
    /// Any non-authorization failure, passed through from the adapter.
    Transport(anyhow::Error),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Persistence(_) => ErrorCode::Persistence,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::AuthenticationExpired(_) => ErrorCode::AuthenticationExpired,
            Self::Transport(_) => ErrorCode::Transport,
        }
    }

    /// True when the failure should send the user back to sign-in.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Self::AuthenticationExpired(_))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistence(msg) => write!(f, "persistence failed: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::AuthenticationExpired(msg) => write!(f, "authentication expired: {msg}"),
            Self::Transport(err) => write!(f, "{err:#}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(&**err),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
