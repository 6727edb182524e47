//! Invitation commands: to room groups, to a whole server, from room to room.

mod bulk_invite;
mod invite;
mod invite_room;

use std::sync::Arc;

use matrix_sdk::ruma::UserId;
use plugin_core::factory::PluginFactory;
use plugin_core::report::CommandReport;
use plugin_core::{CommandError, CommandResult, Plugin, PluginContext, Settings, UpstreamContext};

pub use bulk_invite::{BULK_INVITE_COMMAND, BulkInvite};
pub use invite::{GROUP_SEPARATOR, INVITE_COMMAND, Invite};
pub use invite_room::{INVITE_ROOM_COMMAND, InviteRoom};

#[derive(Debug)]
pub struct InvitesPlugin;

impl PluginFactory for InvitesPlugin {
    fn build(&self, settings: &Settings) -> Vec<Arc<dyn Plugin>> {
        let ttl = settings.confirmation_ttl();
        vec![
            Arc::new(Invite),
            Arc::new(BulkInvite::new(ttl)),
            Arc::new(InviteRoom::new(ttl)),
        ]
    }
}

/// When an authentication provider is configured, only accounts linked to it
/// may be invited.
async fn ensure_auth_provider(ctx: &PluginContext, user_id: &UserId) -> CommandResult {
    let Some(provider) = ctx.settings.user_auth_provider.as_deref() else {
        return Ok(());
    };
    let account = ctx
        .admin
        .user_account(user_id.as_str())
        .await
        .or_upstream("Unable to retrieve the user account.")?;
    if account.is_some_and(|a| a.has_auth_provider(provider)) {
        Ok(())
    } else {
        Err(CommandError::user(format!(
            "Wrong authentication provider. Should be \"{provider}\""
        )))
    }
}

/// `lead` followed by the skipped and failed counts, when there are any.
fn invitation_summary(lead: String, report: &CommandReport) -> String {
    let mut parts = vec![lead];
    match report.skipped() {
        0 => {}
        1 => parts.push("1 user is already in the room.".to_owned()),
        n => parts.push(format!("{n} users are already in the room.")),
    }
    if !report.failed().is_empty() {
        parts.push(format!("Failed to invite {} users", report.failed().len()));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_core::report::ItemOutcome;

    #[test]
    fn summary_mentions_only_non_zero_counts() {
        let mut report = CommandReport::default();
        report.record(ItemOutcome::Succeeded("ok".to_owned()));
        assert_eq!(invitation_summary("Done!".to_owned(), &report), "Done!");

        report.record(ItemOutcome::Skipped);
        report.record(ItemOutcome::Failed("bad".to_owned()));
        assert_eq!(
            invitation_summary("Done!".to_owned(), &report),
            "Done! 1 user is already in the room. Failed to invite 1 users"
        );

        report.record(ItemOutcome::Skipped);
        assert!(invitation_summary("Done!".to_owned(), &report).contains("2 users are already"));
    }

    #[test]
    fn factory_builds_invite_commands() {
        let ids: Vec<_> = InvitesPlugin
            .build(&Settings::default())
            .iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(ids, [INVITE_COMMAND, BULK_INVITE_COMMAND, INVITE_ROOM_COMMAND]);
    }
}
