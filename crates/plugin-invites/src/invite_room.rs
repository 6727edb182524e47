use admin_api::RoomInfo;
use async_trait::async_trait;
use core::time::Duration;
use matrix_sdk::ruma::{OwnedRoomId, RoomId};
use tracing::{info, warn};

use plugin_core::access::{ensure_can_execute, resolve_room, room_arg};
use plugin_core::chat::Member;
use plugin_core::confirm::Confirmation;
use plugin_core::report::{ItemOutcome, run_bulk, send_report};
use plugin_core::{
    CommandError, CommandResult, Plugin, PluginContext, PluginSpec, UpstreamContext, html_escape,
    send_text,
};

use crate::{ensure_auth_provider, invitation_summary};

pub const INVITE_ROOM_COMMAND: &str = "invite-room";

#[derive(Debug, Clone)]
struct PendingRoomInvite {
    source_id: OwnedRoomId,
    target_id: OwnedRoomId,
}

/// Invites the members of one room into another.
#[derive(Debug)]
pub struct InviteRoom {
    confirmation: Confirmation<PendingRoomInvite>,
}

async fn room_details(ctx: &PluginContext, room_id: &RoomId) -> CommandResult<RoomInfo> {
    ctx.admin
        .room_info(room_id.as_str())
        .await
        .or_upstream("Unable to retrieve room details.")?
        .ok_or_else(|| CommandError::user(format!("The room \"{room_id}\" cannot be found.")))
}

async fn members_of(ctx: &PluginContext, room_id: &RoomId) -> CommandResult<Vec<Member>> {
    ctx.chat.joined_members(room_id).await.map_err(|e| {
        CommandError::upstream(
            format!("Could not retrieve a list of members from the room {room_id}"),
            e,
        )
    })
}

impl InviteRoom {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            confirmation: Confirmation::new(INVITE_ROOM_COMMAND, "room invitation", ttl),
        }
    }

    async fn stage(&self, ctx: &PluginContext, args: &[String]) -> CommandResult {
        let source = room_arg(args.first().map(String::as_str))?;
        if args.get(1).is_none() {
            return Err(CommandError::user("Target room id is missing."));
        }
        let target = room_arg(args.get(1).map(String::as_str))?;
        ensure_can_execute(ctx, None).await?;

        let source_id = resolve_room(ctx, &source).await?;
        let target_id = resolve_room(ctx, &target).await?;
        let target_room = room_details(ctx, &target_id).await?;
        let source_room = room_details(ctx, &source_id).await?;

        send_text(
            ctx,
            format!("Fetching member list of the {}.", source_room.display_name()),
        )
        .await?;
        let members = members_of(ctx, &source_id).await?;
        send_text(
            ctx,
            format!(
                "Room {} has {} members",
                source_room.display_name(),
                members.len()
            ),
        )
        .await?;

        let question = format!(
            "Are you sure you want to <b>invite all {} members</b> of the \"{}\" to the \"{}\"?",
            members.len(),
            html_escape(source_room.display_name()),
            html_escape(target_room.display_name())
        );
        self.confirmation
            .stage(
                ctx,
                PendingRoomInvite {
                    source_id,
                    target_id,
                },
                &question,
                "the invitation for all room members",
            )
            .await
    }

    async fn execute(&self, ctx: &PluginContext) -> CommandResult {
        let request = self.confirmation.consume(&ctx.sender).await?;
        send_text(ctx, "Preparing to execute the command...").await?;
        let target_room = room_details(ctx, &request.target_id).await?;
        let members = members_of(ctx, &request.source_id).await?;
        send_text(
            ctx,
            format!(
                "Starting to invite {} users to the \"{}\" room.",
                members.len(),
                target_room.display_name()
            ),
        )
        .await?;

        let report = run_bulk(members, ctx.settings.pacing, |member| {
            invite_member(ctx, &request.target_id, member)
        })
        .await;
        info!(
            source = %request.source_id,
            target = %request.target_id,
            sender = %ctx.sender,
            succeeded = report.succeeded().len(),
            skipped = report.skipped(),
            failed = report.failed().len(),
            "room invitation finished"
        );

        let lead = format!(
            "Successfully invited {} users to join {} {}",
            report.succeeded().len(),
            target_room.display_name(),
            target_room.room_id
        );
        send_text(ctx, invitation_summary(lead, &report)).await?;
        send_report(ctx, &report).await
    }
}

async fn invite_member(ctx: &PluginContext, target: &RoomId, member: Member) -> ItemOutcome {
    if member.user_id.as_str() == ctx.chat.own_user_id().as_str() {
        return ItemOutcome::Skipped;
    }
    let result: CommandResult = async {
        ensure_auth_provider(ctx, &member.user_id).await?;
        ctx.chat.invite_user(target, &member.user_id).await?;
        Ok(())
    }
    .await;
    if let Err(err) = &result {
        warn!(user_id = %member.user_id, room_id = %target, error = %err.detail(), "invitation failed");
    }
    let who = member
        .display_name
        .clone()
        .unwrap_or_else(|| member.user_id.to_string());
    ItemOutcome::classify(
        result,
        || format!("✓ Successfully invited {}", member.user_id),
        |message| format!("✕ Failed to invite {who} | {message}"),
    )
}

#[async_trait]
impl Plugin for InviteRoom {
    fn id(&self) -> &'static str {
        INVITE_ROOM_COMMAND
    }

    fn help(&self) -> &'static str {
        "invite-room <source-room> <target-room>  Invite every member of one room into another (asks for confirmation)"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        if Confirmation::<PendingRoomInvite>::is_confirmation(args) {
            self.execute(ctx).await
        } else {
            self.stage(ctx, args).await
        }
    }
}
