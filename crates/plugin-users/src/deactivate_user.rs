use async_trait::async_trait;
use core::time::Duration;
use matrix_sdk::ruma::OwnedUserId;
use rand::Rng as _;
use rand::distributions::Alphanumeric;
use tracing::info;

use plugin_core::access::{ensure_can_execute, ensure_local_sender, local_user_arg};
use plugin_core::confirm::Confirmation;
use plugin_core::{
    CommandError, CommandResult, Plugin, PluginContext, PluginSpec, UpstreamContext, html_escape,
    send_html, send_text,
};

pub const DEACTIVATE_USER_COMMAND: &str = "deactivate-user";

const RECOVER_FLAG: &str = "recover";
const PASSWORD_LENGTH: usize = 16;

#[derive(Debug, Clone)]
struct PendingDeactivation {
    user_id: OwnedUserId,
    display_name: Option<String>,
    recover: bool,
}

impl PendingDeactivation {
    fn who(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.user_id.as_str())
    }

    const fn prefix(&self) -> &'static str {
        if self.recover { "" } else { "de" }
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Deactivates an account, or reactivates it with a fresh password.
#[derive(Debug)]
pub struct DeactivateUser {
    confirmation: Confirmation<PendingDeactivation>,
}

impl DeactivateUser {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            confirmation: Confirmation::new(DEACTIVATE_USER_COMMAND, "user deactivation", ttl),
        }
    }

    async fn stage(&self, ctx: &PluginContext, args: &[String]) -> CommandResult {
        ensure_local_sender(ctx)?;
        let user_id = local_user_arg(ctx, args.first().map(String::as_str))?;
        let recover = args.get(1).is_some_and(|a| a == RECOVER_FLAG);
        ensure_can_execute(ctx, None).await?;

        let account = ctx
            .admin
            .user_account(user_id.as_str())
            .await
            .or_upstream("Unable to retrieve user account details.")?
            .ok_or_else(|| CommandError::user(format!("The user \"{user_id}\" cannot be found.")))?;
        if !recover && account.deactivated {
            return Err(CommandError::user("User is already deactivated. Command rejected."));
        }
        if recover && !account.deactivated {
            return Err(CommandError::user("User is already activated. Command rejected."));
        }

        let pending = PendingDeactivation {
            user_id,
            display_name: account.displayname,
            recover,
        };
        let question = format!(
            "Are you sure you want to {}activate the user \"{}\"?",
            pending.prefix(),
            html_escape(pending.who())
        );
        let proceed_with = format!("the {}activation", pending.prefix());
        self.confirmation
            .stage(ctx, pending, &question, &proceed_with)
            .await
    }

    async fn execute(&self, ctx: &PluginContext) -> CommandResult {
        let request = self.confirmation.consume(&ctx.sender).await?;
        let prefix = request.prefix();
        send_text(
            ctx,
            format!(
                "Beginning the process of {prefix}activating the user \"{}\"...",
                request.who()
            ),
        )
        .await?;

        let failure = format!("Unable to {prefix}activate the user. An error has occurred.");
        let password = if request.recover {
            let password = generate_password();
            ctx.admin
                .activate_user(request.user_id.as_str(), &password)
                .await
                .or_upstream(&failure)?;
            Some(password)
        } else {
            ctx.admin
                .deactivate_user(request.user_id.as_str())
                .await
                .or_upstream(&failure)?;
            None
        };
        info!(user_id = %request.user_id, sender = %ctx.sender, recover = request.recover, "user {prefix}activated");

        send_text(
            ctx,
            format!(
                "Done! The user \"{}\" has been successfully {prefix}activated.",
                request.who()
            ),
        )
        .await?;
        if let Some(password) = password {
            send_html(ctx, &format!("New user's password: <code>{password}</code>")).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for DeactivateUser {
    fn id(&self) -> &'static str {
        DEACTIVATE_USER_COMMAND
    }

    fn help(&self) -> &'static str {
        "deactivate-user <user> [recover]  Deactivate a user, or reactivate with \"recover\" (asks for confirmation)"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        if Confirmation::<PendingDeactivation>::is_confirmation(args) {
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
    use plugin_core::testing::{TestContext, args};
    use serde_json::json;

    const ACCOUNT: &str = "/_synapse/admin/v2/users/@leaver:example.org";

    fn plugin() -> DeactivateUser {
        DeactivateUser::new(Duration::from_secs(120))
    }

    fn mock_account(server: &MockServer, deactivated: bool) {
        server.mock(|when, then| {
            when.method(GET).path(ACCOUNT);
            then.status(200).json_body(json!({
                "name": "@leaver:example.org",
                "displayname": "Leaver",
                "deactivated": deactivated
            }));
        });
    }

    #[test]
    fn passwords_are_alphanumeric() {
        let password = generate_password();
        assert_eq!(password.len(), PASSWORD_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn deactivation_after_confirmation() {
        let server = MockServer::start();
        mock_account(&server, false);
        let update = server.mock(|when, then| {
            when.method(PUT)
                .path(ACCOUNT)
                .json_body(json!({ "deactivated": true }));
            then.status(200).json_body(json!({}));
        });
        let t = TestContext::builder(&server.base_url()).build();
        let plugin = plugin();
        let spec = plugin.spec();

        plugin
            .run(&t.ctx, &args("@leaver:example.org"), &spec)
            .await
            .expect("staged");
        let prompt = t.chat.last_body().expect("prompt");
        assert!(prompt.starts_with("Are you sure you want to deactivate the user \"Leaver\"?"));
        assert!(prompt.contains("To proceed with the deactivation"));
        update.assert_calls(0);

        plugin
            .run(&t.ctx, &args("confirm"), &spec)
            .await
            .expect("deactivated");
        update.assert_calls(1);
        assert_eq!(
            t.chat.last_body().as_deref(),
            Some("Done! The user \"Leaver\" has been successfully deactivated.")
        );
    }

    #[tokio::test]
    async fn recovery_shows_the_new_password() {
        let server = MockServer::start();
        mock_account(&server, true);
        let update = server.mock(|when, then| {
            when.method(PUT)
                .path(ACCOUNT)
                .body_includes("\"deactivated\":false");
            then.status(200).json_body(json!({}));
        });
        let t = TestContext::builder(&server.base_url()).build();
        let plugin = plugin();
        let spec = plugin.spec();

        plugin
            .run(&t.ctx, &args("@leaver:example.org recover"), &spec)
            .await
            .expect("staged");
        plugin
            .run(&t.ctx, &args("confirm"), &spec)
            .await
            .expect("activated");
        update.assert_calls(1);
        let last = t.chat.last_body().expect("password");
        assert!(last.starts_with("New user's password: <code>"));
    }

    #[tokio::test]
    async fn already_deactivated_is_rejected() {
        let server = MockServer::start();
        mock_account(&server, true);
        let t = TestContext::builder(&server.base_url()).build();
        let plugin = plugin();
        let err = plugin
            .run(&t.ctx, &args("@leaver:example.org"), &plugin.spec())
            .await
            .expect_err("already deactivated");
        assert_eq!(err.user_message(), "User is already deactivated. Command rejected.");
    }
}
