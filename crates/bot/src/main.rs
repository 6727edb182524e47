mod chat;
mod config;
mod dispatch;
mod logging;
mod plugins;

use core::time::Duration;
use std::{fs, io::IsTerminal as _, path::PathBuf, sync::Arc};

use admin_api::{AccessToken, AdminApi, AuthService};
use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use matrix_sdk::{
    Client, SessionChange, SessionMeta,
    authentication::{SessionTokens, matrix::MatrixSession},
    config::SyncSettings,
    room::Room,
    ruma::events::room::{
        member::{MembershipState, StrippedRoomMemberEvent},
        message::{MessageType, OriginalSyncRoomMessageEvent},
    },
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::chat::MatrixChat;
use crate::config::{Args, SavedSession, load_session, load_settings, save_session};
use crate::dispatch::Dispatcher;
use crate::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // Load .env if present so clap can pick up env vars.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let settings = Arc::new(load_settings(&args)?);

    fs::create_dir_all(&args.store)
        .with_context(|| format!("creating store directory at {}", args.store.display()))?;

    // SQLite store keeps the E2EE state across restarts.
    let client = Client::builder()
        .homeserver_url(&args.homeserver)
        .handle_refresh_tokens()
        .sqlite_store(&args.store, None)
        .build()
        .await
        .context("building matrix client")?;

    let access_token = login(&client, &args).await?;
    let own_user_id = client
        .user_id()
        .ok_or_else(|| anyhow!("client has no user id after login"))?
        .to_owned();

    // Without a dedicated admin token the session token is used, and it has
    // to follow every refresh the client performs.
    let admin_token = match args.admin_token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => {
            track_session_changes(&client, args.session_file.clone(), None);
            AccessToken::new(token)
        }
        None => {
            let token = AccessToken::new(access_token);
            track_session_changes(&client, args.session_file.clone(), Some(token.clone()));
            token
        }
    };
    let admin = Arc::new(AdminApi::new(&args.homeserver, admin_token.clone()).context("admin API")?);
    let auth_service = args
        .auth_service_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(|url| AuthService::new(url, admin_token.clone()).map(Arc::new))
        .transpose()
        .context("authentication service")?;
    if auth_service.is_none() {
        info!("Authentication service is not configured; account commands are unavailable");
    }

    let registry = plugins::build_registry(&settings).await;
    let commands: Vec<_> = registry
        .entries()
        .await
        .into_iter()
        .filter(|e| e.spec.enabled)
        .map(|e| e.spec.id)
        .collect();
    info!(prefix = %settings.command_prefix, commands = ?commands, "Registered commands");

    let chat = Arc::new(MatrixChat::new(client.clone(), Arc::clone(&admin), own_user_id));
    let dispatcher = Dispatcher::new(chat, admin, auth_service, Arc::clone(&settings), registry);

    if !args.no_autojoin {
        client.add_event_handler(
            async move |ev: StrippedRoomMemberEvent, room: Room, client: Client| {
                if ev.content.membership != MembershipState::Invite {
                    return;
                }
                let Some(own_id) = client.user_id() else {
                    return;
                };
                if ev.state_key != own_id.as_str() {
                    return;
                }
                info!(room_id = %room.room_id(), inviter = %ev.sender, "Auto-joining invited room");
                if let Err(e) = room.join().await {
                    warn!(room_id = %room.room_id(), error = %e, "Failed to accept invite");
                }
            },
        );
    }

    client.add_event_handler(move |ev: OriginalSyncRoomMessageEvent, room: Room| {
        let dispatcher = dispatcher.clone();
        async move {
            let body = match &ev.content.msgtype {
                MessageType::Text(t) => t.body.as_str(),
                MessageType::Notice(n) => n.body.as_str(),
                MessageType::Audio(_)
                | MessageType::Emote(_)
                | MessageType::File(_)
                | MessageType::Image(_)
                | MessageType::Location(_)
                | MessageType::ServerNotice(_)
                | MessageType::Video(_)
                | MessageType::VerificationRequest(_)
                | _ => return,
            };
            dispatcher
                .handle_message(room.room_id().to_owned(), ev.sender.clone(), body)
                .await;
        }
    });

    info!(
        timeout_ms = args.sync_timeout_ms,
        "Starting sync… Press Ctrl+C to stop."
    );
    let sync_settings = SyncSettings::new().timeout(Duration::from_millis(args.sync_timeout_ms));
    tokio::select! {
        result = client.sync(sync_settings) => {
            result.map_err(|e| anyhow!("sync terminated: {e}"))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

/// Re-saves the session file whenever the client refreshes its tokens and
/// hands the new access token to `follow`.
fn track_session_changes(client: &Client, session_file: PathBuf, follow: Option<AccessToken>) {
    let mut changes = client.subscribe_to_session_changes();
    let client = client.clone();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(SessionChange::TokensRefreshed) | Err(RecvError::Lagged(_)) => {
                    let Some(session) = client.matrix_auth().session() else {
                        continue;
                    };
                    if let Some(token) = &follow {
                        token.replace(session.tokens.access_token.clone());
                    }
                    match save_session(&session_file, &SavedSession::from(&session)) {
                        Ok(()) => debug!("Saved refreshed session tokens"),
                        Err(e) => warn!(error = %e, "Failed to save refreshed session"),
                    }
                }
                Ok(SessionChange::UnknownToken { soft_logout }) => {
                    warn!(soft_logout, "Homeserver no longer accepts the session token");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Restores the saved session or logs in with a password, returning the
/// access token in use.
async fn login(client: &Client, args: &Args) -> Result<String> {
    if let Some(session) = load_session(&args.session_file)? {
        info!("Restoring session for {}", session.user_id);
        let access_token = session.access_token.clone();
        let matrix_session = MatrixSession {
            meta: SessionMeta {
                user_id: session.user_id.parse().context("invalid stored user_id")?,
                device_id: session.device_id.into(),
            },
            tokens: SessionTokens {
                access_token: session.access_token,
                refresh_token: session.refresh_token,
            },
        };
        client
            .restore_session(matrix_session)
            .await
            .context("restoring session")?;
        return Ok(access_token);
    }

    // Treat empty env/arg as missing; avoid prompting in non-interactive mode.
    let password = if let Some(p) = args
        .password
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        p.to_owned()
    } else {
        if !std::io::stdin().is_terminal() {
            return Err(anyhow!(
                "No MATRIX_PASSWORD provided and no stored session. In non-interactive mode, set MATRIX_PASSWORD or mount an existing session at {}",
                args.session_file.display()
            ));
        }
        warn!("No password provided via --password or MATRIX_PASSWORD. Prompting...");
        prompt_password()?
    };

    info!("Logging in as {}", args.username);
    let response = client
        .matrix_auth()
        .login_username(&args.username, &password)
        .initial_device_display_name(&args.device_name)
        .request_refresh_token()
        .send()
        .await
        .context("login failed")?;

    let session = SavedSession {
        access_token: response.access_token.clone(),
        refresh_token: response.refresh_token.clone(),
        user_id: response.user_id.to_string(),
        device_id: response.device_id.to_string(),
    };
    save_session(&args.session_file, &session)?;
    info!(
        "Logged in: user={} device={}",
        session.user_id, session.device_id
    );
    Ok(response.access_token)
}

#[cfg(feature = "rpassword")]
fn prompt_password() -> Result<String> {
    rpassword::prompt_password("Matrix password:").map_err(|e| anyhow!("Failed to read password: {e}"))
}

#[cfg(not(feature = "rpassword"))]
fn prompt_password() -> Result<String> {
    Err(anyhow!(
        "rpassword feature is not enabled. Cannot prompt for password."
    ))
}
