// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end wiring of `AuthSession` against an in-process backend.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use parley_session::clock::{Clock, ManualClock, SystemClock};
use parley_session::config::SessionConfig;
use parley_session::error::ErrorCode;
use parley_session::events::SessionEvent;
use parley_session::refresh::HttpRefresher;
use parley_session::store::file::FileStore;
use parley_session::AuthSession;
use serde_json::{json, Value};
use tokio::net::TcpListener;

const TOKEN_TTL_MS: u64 = 3_600_000;

#[derive(Default)]
struct Backend {
    access: Mutex<HashSet<String>>,
    refresh: Mutex<HashSet<String>>,
    issued: AtomicU32,
    refresh_calls: AtomicU32,
    me_calls: AtomicU32,
    logout_calls: AtomicU32,
}

impl Backend {
    fn issue(&self) -> Value {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{n}");
        let refresh = format!("refresh-{n}");
        self.access.lock().insert(access.clone());
        self.refresh.lock().insert(refresh.clone());
        json!({ "accessToken": access, "refreshToken": refresh, "expiresInMillis": TOKEN_TTL_MS })
    }

    /// Invalidate every access token, as if they expired server-side.
    fn revoke_access(&self) {
        self.access.lock().clear();
    }

    fn revoke_all(&self) {
        self.access.lock().clear();
        self.refresh.lock().clear();
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

fn unauthorized(msg: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg }))).into_response()
}

async fn spawn_backend() -> anyhow::Result<(SocketAddr, Arc<Backend>)> {
    let backend = Arc::new(Backend::default());

    let login = {
        let backend = Arc::clone(&backend);
        post(move |Json(body): Json<Value>| {
            let backend = Arc::clone(&backend);
            async move {
                if body["password"] == "hunter2" {
                    Json(backend.issue()).into_response()
                } else {
                    unauthorized("invalid username or password")
                }
            }
        })
    };
    let refresh = {
        let backend = Arc::clone(&backend);
        post(move |Json(body): Json<Value>| {
            let backend = Arc::clone(&backend);
            async move {
                backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
                // Small delay so concurrent callers pile up behind one refresh.
                tokio::time::sleep(Duration::from_millis(50)).await;
                let token = body["refreshToken"].as_str().unwrap_or_default().to_owned();
                if backend.refresh.lock().remove(&token) {
                    Json(backend.issue()).into_response()
                } else {
                    unauthorized("invalid refresh token")
                }
            }
        })
    };
    let me = {
        let backend = Arc::clone(&backend);
        get(move |headers: HeaderMap| {
            let backend = Arc::clone(&backend);
            async move {
                backend.me_calls.fetch_add(1, Ordering::SeqCst);
                match bearer(&headers) {
                    Some(token) if backend.access.lock().contains(&token) => {
                        Json(json!({ "name": "ada" })).into_response()
                    }
                    _ => unauthorized("token expired"),
                }
            }
        })
    };
    let logout = {
        let backend = Arc::clone(&backend);
        post(move || {
            let backend = Arc::clone(&backend);
            async move {
                backend.logout_calls.fetch_add(1, Ordering::SeqCst);
                StatusCode::NO_CONTENT
            }
        })
    };

    let app = Router::new()
        .route("/auth/login", login)
        .route("/auth/refresh", refresh)
        .route("/auth/logout", logout)
        .route("/me", me);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok((addr, backend))
}

fn session_at(addr: SocketAddr, state: &std::path::Path, clock: Arc<dyn Clock>) -> AuthSession {
    let config = SessionConfig::new(format!("http://{addr}"));
    let refresher = HttpRefresher::new(&config.base_url, config.refresh_timeout());
    AuthSession::with_parts(&config, Arc::new(FileStore::new(state)), clock, Arc::new(refresher))
}

#[tokio::test]
async fn login_then_call_api() -> anyhow::Result<()> {
    let (addr, backend) = spawn_backend().await?;
    let dir = tempfile::tempdir()?;
    let session = session_at(addr, &dir.path().join("session.json"), Arc::new(SystemClock));
    let mut events = session.events();

    session.login("ada", "hunter2").await?;
    let me: Value = session.api().get_json("/me").await?;

    assert_eq!(me["name"], "ada");
    assert_eq!(events.recv().await?, SessionEvent::Established);
    let status = session.status();
    assert!(status.authenticated);
    assert!(!status.needs_refresh);
    assert!(!status.refresh_in_flight);
    assert!(status.expires_in_ms.is_some_and(|ms| ms <= TOKEN_TTL_MS));
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn session_survives_restart() -> anyhow::Result<()> {
    let (addr, _backend) = spawn_backend().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested/session.json");

    {
        let session = session_at(addr, &path, Arc::new(SystemClock));
        session.login("ada", "hunter2").await?;
    }

    let restored = session_at(addr, &path, Arc::new(SystemClock));
    assert!(restored.is_authenticated());
    assert_eq!(restored.current_access_token().as_deref(), Some("access-1"));
    let me: Value = restored.api().get_json("/me").await?;
    assert_eq!(me["name"], "ada");
    Ok(())
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() -> anyhow::Result<()> {
    let (addr, backend) = spawn_backend().await?;
    let dir = tempfile::tempdir()?;
    let session =
        Arc::new(session_at(addr, &dir.path().join("session.json"), Arc::new(SystemClock)));
    session.login("ada", "hunter2").await?;
    backend.revoke_access();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let session = Arc::clone(&session);
        handles.push(tokio::spawn(async move { session.api().get_json::<Value>("/me").await }));
    }
    for handle in handles {
        assert_eq!(handle.await??["name"], "ada");
    }

    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.current_access_token().as_deref(), Some("access-2"));
    Ok(())
}

#[tokio::test]
async fn expired_token_is_refreshed_before_the_call() -> anyhow::Result<()> {
    let (addr, backend) = spawn_backend().await?;
    let dir = tempfile::tempdir()?;
    let clock = Arc::new(ManualClock::new(SystemClock.now_ms()));
    let session = session_at(addr, &dir.path().join("session.json"), clock.clone());
    session.login("ada", "hunter2").await?;

    // Inside the five minute buffer.
    clock.advance(Duration::from_millis(TOKEN_TTL_MS) - Duration::from_secs(60));
    assert!(session.status().needs_refresh);

    let me: Value = session.api().get_json("/me").await?;

    assert_eq!(me["name"], "ada");
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.me_calls.load(Ordering::SeqCst), 1);
    assert!(!session.status().needs_refresh);
    Ok(())
}

#[tokio::test]
async fn revoked_refresh_token_forces_sign_in() -> anyhow::Result<()> {
    let (addr, backend) = spawn_backend().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    let session = session_at(addr, &path, Arc::new(SystemClock));
    session.login("ada", "hunter2").await?;
    let mut events = session.events();
    backend.revoke_all();

    let err = session.api().get_json::<Value>("/me").await.err();

    assert_eq!(err.map(|e| e.code()), Some(ErrorCode::AuthenticationExpired));
    assert!(matches!(events.recv().await?, SessionEvent::Lost { .. }));
    assert!(!session.status().authenticated);

    let restarted = session_at(addr, &path, Arc::new(SystemClock));
    assert!(!restarted.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn logout_ends_session_everywhere() -> anyhow::Result<()> {
    let (addr, backend) = spawn_backend().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    let session = session_at(addr, &path, Arc::new(SystemClock));
    session.login("ada", "hunter2").await?;

    assert!(session.logout().await?);

    assert_eq!(backend.logout_calls.load(Ordering::SeqCst), 1);
    assert!(!session.is_authenticated());
    assert!(session_at(addr, &path, Arc::new(SystemClock)).current_access_token().is_none());
    let err = session.api().get_json::<Value>("/me").await.err();
    assert!(err.is_some_and(|e| e.is_session_lost()));
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_unauthorized() -> anyhow::Result<()> {
    let (addr, _backend) = spawn_backend().await?;
    let session = AuthSession::in_memory(&SessionConfig::new(format!("http://{addr}")));

    let err = session.login("ada", "nope").await.err();

    assert_eq!(err.map(|e| e.code()), Some(ErrorCode::Unauthorized));
    assert!(!session.is_authenticated());
    Ok(())
}
