use async_trait::async_trait;
use tracing::info;

use plugin_core::access::{ensure_can_execute, local_user_arg};
use plugin_core::chat::DmRoom;
use plugin_core::{CommandError, CommandResult, Plugin, PluginContext, PluginSpec, send_html, send_text};

pub const WELCOME_MESSAGE_COMMAND: &str = "welcome-message";

/// Shows the configured welcome message or sends it to a user.
#[derive(Debug)]
pub struct WelcomeMessage;

#[async_trait]
impl Plugin for WelcomeMessage {
    fn id(&self) -> &'static str {
        WELCOME_MESSAGE_COMMAND
    }

    fn help(&self) -> &'static str {
        "welcome-message show  Show the welcome message\n\
         welcome-message send <user>  Send the welcome message to a user in a DM"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        let arg = |i: usize| args.get(i).map(String::as_str);
        let send = match arg(0) {
            Some("show") => false,
            Some("send") => true,
            _ => {
                return Err(CommandError::user(
                    "Invalid subcommand. Should be one of: show, send",
                ));
            }
        };
        ensure_can_execute(ctx, None).await?;
        let message = ctx
            .settings
            .welcome_message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| CommandError::user("Welcome message is not configured"))?;

        if !send {
            return send_html(ctx, message).await;
        }

        if arg(1).is_none() {
            return Err(CommandError::user("Missing user ID argument"));
        }
        let user_id = local_user_arg(ctx, arg(1))?;
        let (DmRoom::Ready(dm) | DmRoom::AwaitingJoin(dm)) = ctx.chat.ensure_dm_room(&user_id).await?;
        ctx.chat.send_html(&dm, message).await?;
        info!(user_id = %user_id, room_id = %dm, sender = %ctx.sender, "welcome message sent");
        send_text(ctx, format!("Welcome message was sent to {user_id} in DM")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use matrix_sdk::ruma::{owned_room_id, user_id};
    use plugin_core::testing::{FakeChat, TestContext, args};

    const WELCOME: &str = "<h1>Welcome!</h1>";

    #[tokio::test]
    async fn message_is_delivered_in_a_dm() {
        let server = MockServer::start();
        let chat = FakeChat::new().with_dm_room(
            user_id!("@newbie:example.org"),
            DmRoom::Ready(owned_room_id!("!dm-newbie:example.org")),
        );
        let t = TestContext::builder(&server.base_url())
            .chat(chat)
            .settings(|s| s.welcome_message = Some(WELCOME.to_owned()))
            .build();
        WelcomeMessage
            .run(&t.ctx, &args("send @newbie:example.org"), &WelcomeMessage.spec())
            .await
            .expect("sent");
        let sent = t.chat.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].room_id.as_str(), "!dm-newbie:example.org");
        assert_eq!(sent[0].body, WELCOME);
        assert_eq!(sent[1].body, "Welcome message was sent to @newbie:example.org in DM");
    }

    #[tokio::test]
    async fn show_posts_the_message_here() {
        let server = MockServer::start();
        let t = TestContext::builder(&server.base_url())
            .settings(|s| s.welcome_message = Some(WELCOME.to_owned()))
            .build();
        WelcomeMessage
            .run(&t.ctx, &args("show"), &WelcomeMessage.spec())
            .await
            .expect("shown");
        assert_eq!(t.chat.last_body().as_deref(), Some(WELCOME));
    }

    #[tokio::test]
    async fn unconfigured_message_and_bad_subcommand_are_errors() {
        let server = MockServer::start();
        let t = TestContext::builder(&server.base_url()).build();
        let err = WelcomeMessage
            .run(&t.ctx, &args("show"), &WelcomeMessage.spec())
            .await
            .expect_err("unconfigured");
        assert_eq!(err.user_message(), "Welcome message is not configured");
        let err = WelcomeMessage
            .run(&t.ctx, &args("print"), &WelcomeMessage.spec())
            .await
            .expect_err("bad subcommand");
        assert_eq!(err.user_message(), "Invalid subcommand. Should be one of: show, send");
    }
}
