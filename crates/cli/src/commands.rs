// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subcommand handlers.

use std::io::Write;

use anyhow::Context;
use parley_session::error::SessionError;
use parley_session::AuthSession;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Command;

/// Exit code for failures that require signing in again.
pub const EXIT_SESSION_LOST: i32 = 3;

pub async fn run(session: &AuthSession, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Login { username, password } => {
            session.login(&username, &password).await?;
            println!("signed in as {username}");
        }
        Command::Register { username, email, password } => {
            session.register(&username, &email, &password).await?;
            println!("registered and signed in as {username}");
        }
        Command::Logout => {
            if session.logout().await? {
                println!("signed out");
            } else {
                println!("not signed in");
            }
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&session.status())?);
        }
        Command::Get { path } => {
            let body: Value = session.api().get_json(&path).await?;
            print_json(&body)?;
        }
        Command::Post { path, body } => {
            let payload: Value =
                serde_json::from_str(&body).context("request body is not valid JSON")?;
            let body: Value = session.api().post_json(&path, &payload).await?;
            print_json(&body)?;
        }
        Command::Fetch { url, output } => {
            let bytes = session.media().fetch(&url).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("write {}", path.display()))?;
                    info!(path = %path.display(), len = bytes.len(), "media saved");
                }
                None => std::io::stdout().write_all(&bytes)?,
            }
        }
        Command::Listen => listen(session).await?,
    }
    Ok(())
}

async fn listen(session: &AuthSession) -> anyhow::Result<()> {
    // Surface a missing session before starting the supervisor.
    if !session.is_authenticated() {
        return Err(SessionError::AuthenticationExpired("not signed in".into()).into());
    }

    let cancel = CancellationToken::new();
    let mut supervisor = session.socket().supervise(session.events(), cancel.clone());
    loop {
        tokio::select! {
            frame = supervisor.next_frame() => match frame {
                Some(text) => println!("{text}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                cancel.cancel();
                break;
            }
        }
    }
    supervisor.join().await;

    if !cancel.is_cancelled() && !session.is_authenticated() {
        return Err(SessionError::AuthenticationExpired("session lost".into()).into());
    }
    Ok(())
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    if !value.is_null() {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

/// Process exit code for a failed command.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<SessionError>() {
        Some(e) if e.is_session_lost() => EXIT_SESSION_LOST,
        _ => 1,
    }
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
