use admin_api::UserAccount;
use async_trait::async_trait;
use core::time::Duration;
use matrix_sdk::ruma::{OwnedRoomId, UserId};
use tracing::{info, warn};

use plugin_core::access::{ensure_can_execute, ensure_local_sender, local_room_arg, resolve_room};
use plugin_core::confirm::Confirmation;
use plugin_core::report::{ItemOutcome, run_bulk, send_report};
use plugin_core::{
    CommandError, CommandResult, Plugin, PluginContext, PluginSpec, UpstreamContext, html_escape,
    send_text,
};

use crate::{ensure_auth_provider, invitation_summary};

pub const BULK_INVITE_COMMAND: &str = "bulk-invite";

/// The bot must be a room admin to invite everybody.
const REQUIRED_BOT_LEVEL: i64 = 100;

#[derive(Debug, Clone)]
struct PendingBulkInvite {
    room_id: OwnedRoomId,
    room_name: String,
    room_alias: Option<String>,
}

/// Invites every account of the server into one room.
#[derive(Debug)]
pub struct BulkInvite {
    confirmation: Confirmation<PendingBulkInvite>,
}

impl BulkInvite {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            confirmation: Confirmation::new(BULK_INVITE_COMMAND, "bulk invitation", ttl),
        }
    }

    async fn stage(&self, ctx: &PluginContext, args: &[String]) -> CommandResult {
        ensure_local_sender(ctx)?;
        let handle = local_room_arg(ctx, args.first().map(String::as_str))?;
        let room_id = resolve_room(ctx, &handle).await?;
        ensure_can_execute(ctx, None).await?;

        let room = ctx
            .admin
            .room_info(room_id.as_str())
            .await
            .or_upstream("Unable to retrieve room details.")?
            .ok_or_else(|| CommandError::user(format!("The room \"{room_id}\" cannot be found.")))?;
        let room_name = room.display_name().to_owned();

        let bot_level = ctx
            .admin
            .power_levels(room_id.as_str())
            .await
            .or_upstream("Unable to retrieve room details.")?
            .map_or(0, |pl| pl.user_level(ctx.chat.own_user_id().as_str()));
        if bot_level != REQUIRED_BOT_LEVEL {
            return Err(CommandError::user(format!(
                "Command rejected. Please make sure the bot has been invited to the \"{room_name}\" room and has admin privileges."
            )));
        }

        let question = format!(
            "Are you sure you want to invite all members of the current server to the \"{}\" room?",
            html_escape(&room_name)
        );
        let room_alias = (handle.as_str() != room_id.as_str()).then(|| handle.as_str().to_owned());
        let pending = PendingBulkInvite {
            room_id,
            room_name,
            room_alias,
        };
        self.confirmation
            .stage(ctx, pending, &question, "the bulk invitation")
            .await
    }

    async fn execute(&self, ctx: &PluginContext) -> CommandResult {
        let request = self.confirmation.consume(&ctx.sender).await?;
        send_text(ctx, "Preparing to execute the command...").await?;
        let users = ctx
            .admin
            .user_accounts()
            .await
            .or_upstream("Failed to retrieve user accounts")?;
        send_text(
            ctx,
            format!(
                "Starting to invite {} users to the \"{}\" room.",
                users.len(),
                request.room_name
            ),
        )
        .await?;

        let report = run_bulk(users, ctx.settings.pacing, |user| {
            invite_account(ctx, &request, user)
        })
        .await;
        info!(
            room_id = %request.room_id,
            sender = %ctx.sender,
            succeeded = report.succeeded().len(),
            skipped = report.skipped(),
            failed = report.failed().len(),
            "bulk invitation finished"
        );

        let lead = format!(
            "Done! Successfully invited {} users to the room \"{}\".",
            report.succeeded().len(),
            request.room_name
        );
        send_text(ctx, invitation_summary(lead, &report)).await?;
        send_report(ctx, &report).await
    }
}

async fn invite_account(
    ctx: &PluginContext,
    request: &PendingBulkInvite,
    user: UserAccount,
) -> ItemOutcome {
    let result: CommandResult = async {
        let user_id = UserId::parse(user.name.as_str())
            .map_err(|_| CommandError::user(format!("\"{}\" is not a valid user handle.", user.name)))?;
        ensure_auth_provider(ctx, &user_id).await?;
        ctx.chat.invite_user(&request.room_id, &user_id).await?;
        Ok(())
    }
    .await;
    if let Err(err) = &result {
        warn!(user_id = %user.name, room_id = %request.room_id, error = %err.detail(), "invitation failed");
    } else {
        info!(
            user_id = %user.name,
            room_id = %request.room_id,
            alias = request.room_alias.as_deref().unwrap_or_default(),
            "invited"
        );
    }
    ItemOutcome::classify(
        result,
        || format!("✓ Successfully invited {}", user.name),
        |message| format!("✕ Failed to invite {} | {message}", user.name),
    )
}

#[async_trait]
impl Plugin for BulkInvite {
    fn id(&self) -> &'static str {
        BULK_INVITE_COMMAND
    }

    fn help(&self) -> &'static str {
        "bulk-invite <room>  Invite every account of the server to a room (asks for confirmation)"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        if Confirmation::<PendingBulkInvite>::is_confirmation(args) {
            self.execute(ctx).await
        } else {
            self.stage(ctx, args).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use matrix_sdk::ruma::{room_id, user_id};
    use plugin_core::chat::Membership;
    use plugin_core::testing::{FakeChat, TestContext, args};
    use serde_json::json;

    const TARGET: &str = "/_synapse/admin/v1/rooms/!town:example.org";

    fn plugin() -> BulkInvite {
        BulkInvite::new(Duration::from_secs(120))
    }

    fn mock_room(server: &MockServer, bot_level: i64) {
        server.mock(|when, then| {
            when.method(GET).path(TARGET);
            then.status(200)
                .json_body(json!({ "room_id": "!town:example.org", "name": "Town hall" }));
        });
        server.mock(|when, then| {
            when.method(GET).path(format!("{TARGET}/state"));
            then.status(200).json_body(json!({ "state": [{
                "type": "m.room.power_levels",
                "state_key": "",
                "content": { "users": { "@bot:example.org": bot_level } }
            }] }));
        });
    }

    fn mock_users(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path("/_synapse/admin/v2/users");
            then.status(200).json_body(json!({
                "users": [
                    { "name": "@alice:example.org" },
                    { "name": "@bob:example.org" },
                    { "name": "@carol:example.org" }
                ],
                "total": 3
            }));
        });
    }

    fn mock_account(server: &MockServer, user: &str, provider: &str) {
        let path = format!("/_synapse/admin/v2/users/{user}");
        let name = user.to_owned();
        let provider = provider.to_owned();
        server.mock(move |when, then| {
            when.method(GET).path(path);
            then.status(200).json_body(json!({
                "name": name,
                "external_ids": [{ "auth_provider": provider, "external_id": "x" }]
            }));
        });
    }

    #[tokio::test]
    async fn invites_everybody_after_confirmation() {
        let server = MockServer::start();
        mock_room(&server, 100);
        mock_users(&server);
        let room = room_id!("!town:example.org");
        let chat = FakeChat::new()
            .with_member(room, user_id!("@bob:example.org"), Membership::Join)
            .fail_invite(user_id!("@carol:example.org"), "Rate limited");
        let t = TestContext::builder(&server.base_url()).chat(chat).build();
        let plugin = plugin();
        let spec = plugin.spec();

        plugin
            .run(&t.ctx, &args("!town:example.org"), &spec)
            .await
            .expect("staged");
        assert!(t.chat.last_body().expect("prompt").contains(
            "invite all members of the current server to the \"Town hall\" room?"
        ));
        assert!(t.chat.invites().is_empty());

        plugin
            .run(&t.ctx, &args("confirm"), &spec)
            .await
            .expect("invited");
        let bodies = t.chat.bodies();
        let n = bodies.len();
        assert_eq!(
            bodies[n - 2],
            "Done! Successfully invited 1 users to the room \"Town hall\". 1 user is already in the room. Failed to invite 1 users"
        );
        assert_eq!(
            bodies[n - 1],
            "Command execution report 1/1<br /><pre>✕ Failed to invite @carol:example.org | Rate limited\n✓ Successfully invited @alice:example.org</pre>"
        );
        assert_eq!(t.chat.invites().len(), 1);
    }

    #[tokio::test]
    async fn accounts_from_another_provider_are_failures() {
        let server = MockServer::start();
        mock_room(&server, 100);
        mock_users(&server);
        mock_account(&server, "@alice:example.org", "oidc");
        mock_account(&server, "@bob:example.org", "saml");
        mock_account(&server, "@carol:example.org", "oidc");
        let t = TestContext::builder(&server.base_url())
            .settings(|s| s.user_auth_provider = Some("oidc".to_owned()))
            .build();
        let plugin = plugin();
        let spec = plugin.spec();

        plugin
            .run(&t.ctx, &args("!town:example.org"), &spec)
            .await
            .expect("staged");
        plugin
            .run(&t.ctx, &args("confirm"), &spec)
            .await
            .expect("invited");
        let report = t.chat.last_body().expect("report");
        assert!(report.contains(
            "✕ Failed to invite @bob:example.org | Wrong authentication provider. Should be &quot;oidc&quot;"
        ));
        assert_eq!(t.chat.invites().len(), 2);
    }

    #[tokio::test]
    async fn bot_must_be_room_admin() {
        let server = MockServer::start();
        mock_room(&server, 50);
        let t = TestContext::builder(&server.base_url()).build();
        let plugin = plugin();
        let err = plugin
            .run(&t.ctx, &args("!town:example.org"), &plugin.spec())
            .await
            .expect_err("bot too weak");
        assert!(err.user_message().starts_with("Command rejected."));
        let err = plugin
            .run(&t.ctx, &args("confirm"), &plugin.spec())
            .await
            .expect_err("nothing staged");
        assert!(err.user_message().contains("bulk invitation request has expired"));
    }
}
