use async_trait::async_trait;
use matrix_sdk::ruma::{RoomId, UserId};
use tracing::{error, info};

use plugin_core::access::{ensure_can_execute, user_arg};
use plugin_core::report::{ItemOutcome, run_bulk};
use plugin_core::{
    CommandError, CommandResult, Plugin, PluginContext, PluginSpec, html_escape, send_notice,
};

pub const INVITE_COMMAND: &str = "invite";

/// Separates group names in the optional second argument.
pub const GROUP_SEPARATOR: char = '|';

/// Invites one user to every room of the given room groups.
#[derive(Debug)]
pub struct Invite;

impl Invite {
    fn rooms(ctx: &PluginContext, groups: Option<&str>) -> CommandResult<Vec<String>> {
        let settings = &ctx.settings;
        let names: Vec<&str> = match groups {
            Some(raw) => raw
                .split(GROUP_SEPARATOR)
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .collect(),
            None => settings.default_groups.iter().map(String::as_str).collect(),
        };
        let (rooms, unknown) = settings.rooms_in_groups(&names);
        if !unknown.is_empty() {
            let known: Vec<_> = settings.room_groups.iter().map(|g| g.name.as_str()).collect();
            return Err(CommandError::user(format!(
                "Unknown room group(s): {}. Available groups: {}",
                unknown.join(", "),
                known.join(", ")
            )));
        }
        Ok(rooms)
    }
}

async fn invite_to(ctx: &PluginContext, user_id: &UserId, room: String) -> ItemOutcome {
    let missing = || ItemOutcome::Failed(format!("Can't find room \"{room}\", skipping it."));
    let Ok(room_id) = RoomId::parse(room.as_str()) else {
        return missing();
    };
    let Some(name) = ctx.chat.room_name(&room_id).await.ok().flatten() else {
        return missing();
    };
    let label = format!("room: \"{name}\" ({room})");
    match ctx.chat.invite_user(&room_id, user_id).await {
        Ok(()) => {
            info!(user_id = %user_id, room_id = %room_id, "invited to {label}");
            ItemOutcome::Succeeded(label)
        }
        Err(e) => {
            let reason = e
                .error
                .unwrap_or_else(|| format!("Failed to add {user_id}"));
            ItemOutcome::Failed(format!("- {reason} | {label}"))
        }
    }
}

#[async_trait]
impl Plugin for Invite {
    fn id(&self) -> &'static str {
        INVITE_COMMAND
    }

    fn help(&self) -> &'static str {
        "invite <user> [<group>|<group>...]  Invite a user to the rooms of the given groups (default groups when omitted)"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        let user_id = user_arg(args.first().map(String::as_str))?;
        ensure_can_execute(ctx, None).await?;
        let rooms = Self::rooms(ctx, args.get(1).map(String::as_str))?;

        let name = ctx
            .chat
            .display_name(&user_id)
            .await
            .ok()
            .flatten()
            .ok_or_else(|| CommandError::user(format!("Can not find the user \"{user_id}\"")))?;

        let total = rooms.len();
        let report = run_bulk(rooms, ctx.settings.pacing, |room| {
            invite_to(ctx, &user_id, room)
        })
        .await;

        let mut message = format!(
            "Added {name} to {}/{total} rooms",
            report.succeeded().len()
        );
        if report.failed().is_empty() {
            message.push_str(" 🎉");
        } else {
            message.push_str("\n👎 Failed invites:\n");
            message.push_str(&report.failed().join("\n"));
            error!(user_id = %user_id, sender = %ctx.sender, "{message}");
        }
        let html = html_escape(&message).replace('\n', "<br />");
        send_notice(ctx, &message, &html).await
    }
}
