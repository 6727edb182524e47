use admin_api::{ApiError, SessionState};
use async_trait::async_trait;
use matrix_sdk::ruma::{OwnedUserId, UserId};
use rand::Rng as _;
use tracing::{info, warn};

use plugin_core::access::{ensure_can_execute, ensure_local_sender, local_room_arg};
use plugin_core::chat::DmRoom;
use plugin_core::{
    CommandError, CommandResult, Plugin, PluginContext, PluginSpec, UpstreamContext, html_escape,
    send_html, send_text,
};

use crate::iso_timestamp;

pub const ACCOUNT_COMMAND: &str = "account";

const DEVICE_ID_BYTES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subcommand {
    Create,
    SignIn,
    SignOut,
    List,
    ListSessions,
    AcceptInvitation,
}

impl Subcommand {
    const ALL: [(&'static str, Self); 6] = [
        ("create", Self::Create),
        ("sign-in", Self::SignIn),
        ("sign-out", Self::SignOut),
        ("list", Self::List),
        ("list-sessions", Self::ListSessions),
        ("accept-invitation", Self::AcceptInvitation),
    ];

    fn parse(raw: Option<&str>) -> CommandResult<Self> {
        Self::ALL
            .iter()
            .find(|(name, _)| Some(*name) == raw)
            .map(|(_, sub)| *sub)
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|(name, _)| *name).collect();
                CommandError::user(format!(
                    "Invalid subcommand. Should be one of: {}",
                    names.join(", ")
                ))
            })
    }
}

/// `@name:server`, `name:server` and `name` all name the local user `name`.
fn username_to_localpart(username: &str) -> &str {
    let bare = username.trim_start_matches('@');
    bare.split_once(':').map_or(bare, |(local, _)| local)
}

fn generate_device_id() -> String {
    let bytes: [u8; DEVICE_ID_BYTES] = rand::thread_rng().r#gen();
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("device_{hex}")
}

fn session_scope(device_id: &str) -> String {
    [
        format!("urn:matrix:org.matrix.msc2967.client:device:{device_id}"),
        "urn:matrix:org.matrix.msc2967.client:api:*".to_owned(),
        "email".to_owned(),
    ]
    .join(" ")
}

fn service_failure(prefix: &str, err: ApiError) -> CommandError {
    warn!(error = %err, "{prefix}");
    CommandError::upstream(format!("{prefix}: {}", err.message()), err)
}

/// Bot accounts managed through the authentication service.
#[derive(Debug)]
pub struct Account;

/// Per-invocation view of the target account.
struct Target<'a> {
    ctx: &'a PluginContext,
    localpart: String,
    user_id: OwnedUserId,
}

impl Target<'_> {
    async fn exists(&self) -> CommandResult<bool> {
        Ok(self
            .ctx
            .admin
            .user_account(self.user_id.as_str())
            .await
            .or_upstream("Unable to retrieve user account details.")?
            .is_some())
    }

    async fn ensure_exists(&self) -> CommandResult {
        if self.exists().await? {
            Ok(())
        } else {
            Err(CommandError::user(format!("User {} doesn't exist.", self.user_id)))
        }
    }

    /// Authentication service id of the account, creating it when missing.
    async fn service_id(&self) -> CommandResult<String> {
        let service = auth_service(self.ctx)?;
        service
            .add_user(&self.localpart)
            .await
            .map(|user| user.id)
            .map_err(|e| service_failure("Unable to create a user", e))
    }

    async fn active_sessions(&self) -> CommandResult<Vec<admin_api::OAuth2Session>> {
        let id = self.service_id().await?;
        let sessions = auth_service(self.ctx)?
            .oauth2_sessions(&id)
            .await
            .or_upstream("Unable to load user's OAuth2 sessions.")?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.state == SessionState::Active)
            .collect())
    }
}

fn auth_service(ctx: &PluginContext) -> CommandResult<&admin_api::AuthService> {
    ctx.auth_service.as_deref().ok_or_else(|| {
        CommandError::user("MATRIX_AUTHENTICATION_SERVICE_GRAPHQL_URL is not configured")
    })
}

impl Account {
    async fn list(ctx: &PluginContext) -> CommandResult {
        let users = ctx
            .admin
            .user_accounts()
            .await
            .or_upstream("Unable to retrieve user accounts.")?;
        let entries = users
            .iter()
            .filter(|u| u.is_bot())
            .map(|u| {
                format!(
                    "{}, {}, {}",
                    u.name,
                    u.displayname.as_deref().unwrap_or_default(),
                    iso_timestamp(u.creation_ts)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        send_html(
            ctx,
            &format!(
                "Bot accounts (ID, Name, CreatedAt):<br/><br/><pre>{}</pre>",
                html_escape(&entries)
            ),
        )
        .await
    }

    async fn issue_tokens(target: &Target<'_>, create: bool, permanent: bool) -> CommandResult {
        let ctx = target.ctx;
        let exists = target.exists().await?;
        if create && exists {
            return Err(CommandError::user(format!(
                "User {} already exists.",
                target.user_id
            )));
        }
        if !create && !exists {
            return Err(CommandError::user(format!(
                "User {} doesn't exist.",
                target.user_id
            )));
        }

        let dm = match ctx.chat.ensure_dm_room(&ctx.sender).await? {
            DmRoom::Ready(room) => room,
            DmRoom::AwaitingJoin(_) => {
                return send_html(
                    ctx,
                    "Please ensure you accept the bot's invitation to the DM room first, then try submitting the command again.",
                )
                .await;
            }
        };

        let service_id = target.service_id().await?;
        if create {
            ctx.admin
                .mark_user_as_bot(target.user_id.as_str())
                .await
                .or_upstream("Unable to mark the account as a bot.")?;
            info!(user_id = %target.user_id, sender = %ctx.sender, "bot account created");
            send_html(
                ctx,
                &format!("Created a new account for user {}.", target.user_id),
            )
            .await?;
        }

        let device_id = generate_device_id();
        let session = auth_service(ctx)?
            .create_oauth2_session(&service_id, &session_scope(&device_id), permanent)
            .await
            .map_err(|e| service_failure("Unable to create an OAuth2 session", e))?;
        info!(user_id = %target.user_id, device_id, permanent, sender = %ctx.sender, "session created");

        let mut lines = vec![
            format!(
                "For the account with ID {}, here are your token details:",
                target.user_id
            ),
            format!("Device ID: <code>{device_id}</code>"),
            format!(
                "Access token: <code>{}</code>",
                html_escape(&session.access_token)
            ),
        ];
        if let Some(refresh) = &session.refresh_token {
            lines.push(format!("Refresh token: <code>{}</code>", html_escape(refresh)));
        }
        ctx.chat.send_html(&dm, &lines.join("<br/>")).await?;
        send_html(
            ctx,
            &format!("Tokens were sent to {} in the DM room.", ctx.sender),
        )
        .await
    }

    async fn list_sessions(target: &Target<'_>) -> CommandResult {
        target.ensure_exists().await?;
        let sessions = target.active_sessions().await?;
        if sessions.is_empty() {
            return send_html(
                target.ctx,
                &format!("No active sessions for the account {}.", target.user_id),
            )
            .await;
        }
        let entries = sessions
            .iter()
            .map(|s| {
                format!(
                    "{}, {}, {}, {}",
                    s.id,
                    s.created_at.as_deref().unwrap_or("N/A"),
                    s.last_active_at.as_deref().unwrap_or("N/A"),
                    s.scope.as_deref().filter(|x| !x.is_empty()).unwrap_or("N/A"),
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        send_html(
            target.ctx,
            &format!(
                "Active sessions (ID, CreatedAt, LastActiveAt, Scope):<br/><br/><pre>{}</pre>",
                html_escape(&entries)
            ),
        )
        .await
    }

    async fn sign_out(target: &Target<'_>, session_arg: Option<&str>) -> CommandResult {
        let ctx = target.ctx;
        target.ensure_exists().await?;
        let sessions = target.active_sessions().await?;
        if sessions.is_empty() {
            return send_html(ctx, "No active sessions.").await;
        }
        let session_id =
            session_arg.ok_or_else(|| CommandError::user("Missing session ID argument."))?;
        let service = auth_service(ctx)?;

        if session_id == "all" {
            for session in &sessions {
                service
                    .end_oauth2_session(&session.id)
                    .await
                    .map_err(|e| service_failure("Unable to end the OAuth2 session", e))?;
            }
            info!(user_id = %target.user_id, count = sessions.len(), sender = %ctx.sender, "sessions revoked");
            return send_html(
                ctx,
                &format!(
                    "Revoked {} tokens for the account \"{}\".",
                    sessions.len(),
                    target.user_id
                ),
            )
            .await;
        }

        let session = sessions.iter().find(|s| s.id == session_id).ok_or_else(|| {
            CommandError::user(format!(
                "Session with ID \"{session_id}\" doesn't exist or is already revoked."
            ))
        })?;
        service
            .end_oauth2_session(&session.id)
            .await
            .map_err(|e| service_failure("Unable to end the OAuth2 session", e))?;
        info!(user_id = %target.user_id, session_id, sender = %ctx.sender, "session revoked");
        send_html(
            ctx,
            &format!(
                "Revoked the token with ID <code>{}</code> for the account \"{}\".",
                html_escape(session_id),
                target.user_id
            ),
        )
        .await
    }

    /// Joins a room as the account using a short-lived token, then throws the
    /// token away.
    async fn accept_invitation(
        target: &Target<'_>,
        room_arg: Option<&str>,
        standard_auth: bool,
    ) -> CommandResult {
        let ctx = target.ctx;
        let handle = local_room_arg(ctx, room_arg)?;
        let room = handle.as_str();

        let (token, session_id) = if standard_auth {
            let login = ctx
                .admin
                .login_user(target.user_id.as_str(), None)
                .await
                .or_upstream("Unable to retrieve the bot's access token.")?;
            (login.access_token, None)
        } else {
            let service_id = target.service_id().await?;
            let session = auth_service(ctx)?
                .create_oauth2_session(&service_id, &session_scope("*"), true)
                .await
                .map_err(|e| service_failure("Unable to create an OAuth2 session", e))?;
            (session.access_token, Some(session.session_id))
        };

        let reply = match ctx.admin.join_room_as(&token, room).await {
            Ok(_) => {
                info!(user_id = %target.user_id, room, sender = %ctx.sender, "invitation accepted");
                format!("Joined the room {room}.")
            }
            Err(e) if e.has_errcode("M_FORBIDDEN") => {
                format!("Cannot join the room {room}. Please invite the bot first.")
            }
            Err(e) => {
                warn!(user_id = %target.user_id, room, error = %e, "join failed");
                format!("Cannot join the room {room}. Error: {}", e.message())
            }
        };

        let cleanup = match &session_id {
            None => ctx.admin.logout(&token).await,
            Some(id) => auth_service(ctx)?.end_oauth2_session(id).await,
        };
        if let Err(e) = cleanup {
            warn!(user_id = %target.user_id, error = %e, "temporary token was not revoked");
        }
        send_text(ctx, reply).await
    }
}

#[async_trait]
impl Plugin for Account {
    fn id(&self) -> &'static str {
        ACCOUNT_COMMAND
    }

    fn help(&self) -> &'static str {
        "account create <username> [permanent]  Create a bot account and send its tokens in a DM\n\
         account sign-in <username> [permanent]  Issue new tokens for a bot account\n\
         account sign-out <username> <session-id|all>  Revoke sessions of an account\n\
         account list  List bot accounts\n\
         account list-sessions <username>  List active sessions of an account\n\
         account accept-invitation <username> <room> [standard-auth]  Join a room as the account"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        let arg = |i: usize| args.get(i).map(String::as_str);
        let sub = Subcommand::parse(arg(0))?;
        auth_service(ctx)?;
        ensure_local_sender(ctx)?;
        ensure_can_execute(ctx, None).await?;

        if sub == Subcommand::List {
            return Self::list(ctx).await;
        }

        let username = arg(1).ok_or_else(|| CommandError::user("Missing username argument."))?;
        let localpart = username_to_localpart(username).to_owned();
        let raw_id = format!("@{localpart}:{}", ctx.settings.server_domain);
        let user_id = UserId::parse(raw_id.as_str())
            .map_err(|_| CommandError::user(format!("\"{username}\" is not a valid user handle.")))?;
        let target = Target {
            ctx,
            localpart,
            user_id,
        };

        match sub {
            Subcommand::Create => Self::issue_tokens(&target, true, arg(2) == Some("permanent")).await,
            Subcommand::SignIn => Self::issue_tokens(&target, false, arg(2) == Some("permanent")).await,
            Subcommand::ListSessions => Self::list_sessions(&target).await,
            Subcommand::SignOut => Self::sign_out(&target, arg(2)).await,
            Subcommand::AcceptInvitation => {
                Self::accept_invitation(&target, arg(2), arg(3) == Some("standard-auth")).await
            }
            Subcommand::List => Self::list(ctx).await,
        }
    }
}
