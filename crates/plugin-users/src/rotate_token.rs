use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use plugin_core::access::{ensure_can_execute, ensure_local_sender, local_user_arg};
use plugin_core::{
    CommandError, CommandResult, Plugin, PluginContext, PluginSpec, UpstreamContext, html_escape,
    send_html,
};

pub const ROTATE_TOKEN_COMMAND: &str = "rotate-token";

/// Issues a fresh access token for a user through the admin API.
#[derive(Debug)]
pub struct RotateToken;

#[async_trait]
impl Plugin for RotateToken {
    fn id(&self) -> &'static str {
        ROTATE_TOKEN_COMMAND
    }

    fn help(&self) -> &'static str {
        "rotate-token <user>  Issue a new access token for a user"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        ensure_can_execute(ctx, None).await?;
        ensure_local_sender(ctx)?;
        let user_id = local_user_arg(ctx, args.first().map(String::as_str))?;

        ctx.admin
            .user_account(user_id.as_str())
            .await
            .or_upstream("Unable to retrieve user account details.")?
            .ok_or_else(|| CommandError::user(format!("The user \"{user_id}\" cannot be found.")))?;

        let token = ctx
            .admin
            .login_user(user_id.as_str(), None)
            .await
            .or_upstream("Unable to retrieve user access token.")?;
        info!(user_id = %user_id, sender = %ctx.sender, "access token issued");

        let body = json!({ "access_token": token.access_token }).to_string();
        send_html(
            ctx,
            &format!(
                "New access token for user \"{user_id}\": <code>{}</code>",
                html_escape(&body)
            ),
        )
        .await
    }
}
