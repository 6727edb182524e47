use matrix_sdk::ruma::{OwnedRoomAliasId, OwnedRoomId, OwnedUserId, RoomAliasId, RoomId, UserId};
use tracing::{debug, warn};

use crate::{CommandError, CommandResult, PluginContext, UpstreamContext};

const ACCESS_DENIED: &str = "Access denied";

/// A room given on the command line, either by id or by alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomHandle {
    Id(OwnedRoomId),
    Alias(OwnedRoomAliasId),
}

impl RoomHandle {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.starts_with('#') {
            RoomAliasId::parse(raw).ok().map(Self::Alias)
        } else {
            RoomId::parse(raw).ok().map(Self::Id)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Id(id) => id.as_str(),
            Self::Alias(alias) => alias.as_str(),
        }
    }
}

/// Destructive commands may only be issued by users of our own homeserver.
pub fn ensure_local_sender(ctx: &PluginContext) -> CommandResult {
    if ctx.settings.is_local_user(&ctx.sender) {
        Ok(())
    } else {
        warn!(sender = %ctx.sender, "command from a foreign homeserver refused");
        Err(CommandError::auth("Access denied."))
    }
}

fn ensure_local_handle(ctx: &PluginContext, what: &str, raw: &str) -> CommandResult {
    let domain = &ctx.settings.server_domain;
    match raw.split_once(':') {
        Some((_, server)) if server == domain => Ok(()),
        other => {
            let server = other.map_or("no homeserver", |(_, server)| server);
            Err(CommandError::user(format!(
                "The provided {what} handle is not registered under {domain}, but {server}. \nMake sure that the {what} handle ends with \":{domain}\""
            )))
        }
    }
}

pub fn user_arg(raw: Option<&str>) -> CommandResult<OwnedUserId> {
    let raw = raw.ok_or_else(|| CommandError::user("Missing user handle argument."))?;
    UserId::parse(raw)
        .map_err(|_| CommandError::user(format!("\"{raw}\" is not a valid user handle.")))
}

/// A user handle that must live on our homeserver.
pub fn local_user_arg(ctx: &PluginContext, raw: Option<&str>) -> CommandResult<OwnedUserId> {
    let raw = raw.ok_or_else(|| CommandError::user("Missing user handle argument."))?;
    ensure_local_handle(ctx, "user", raw)?;
    user_arg(Some(raw))
}

pub fn room_arg(raw: Option<&str>) -> CommandResult<RoomHandle> {
    let raw = raw.ok_or_else(|| CommandError::user("Missing room handle argument."))?;
    RoomHandle::parse(raw)
        .ok_or_else(|| CommandError::user(format!("\"{raw}\" is not a valid room handle.")))
}

/// A room handle that must live on our homeserver.
pub fn local_room_arg(ctx: &PluginContext, raw: Option<&str>) -> CommandResult<RoomHandle> {
    let raw = raw.ok_or_else(|| CommandError::user("Missing room handle argument."))?;
    ensure_local_handle(ctx, "room", raw)?;
    room_arg(Some(raw))
}

pub async fn resolve_room(ctx: &PluginContext, handle: &RoomHandle) -> CommandResult<OwnedRoomId> {
    match handle {
        RoomHandle::Id(id) => Ok(id.clone()),
        RoomHandle::Alias(alias) => {
            let room_id = ctx
                .chat
                .resolve_alias(alias)
                .await
                .or_upstream("The provided room handle does not represent a room")?;
            debug!(alias = %alias, room_id = %room_id, "alias resolved");
            Ok(room_id)
        }
    }
}

/// Checks that the sender may run privileged commands from this room and,
/// when `target` is given, against that room.
pub async fn ensure_can_execute(ctx: &PluginContext, target: Option<&RoomId>) -> CommandResult {
    let settings = &ctx.settings;
    if !settings.admin_rooms.is_empty()
        && !settings.admin_rooms.iter().any(|r| r == ctx.room_id.as_str())
    {
        warn!(room_id = %ctx.room_id, sender = %ctx.sender, "command outside admin rooms");
        return Err(CommandError::auth(ACCESS_DENIED));
    }

    let levels = ctx
        .chat
        .power_levels(&ctx.room_id)
        .await
        .or_upstream("Unable to verify your permissions.")?;
    if levels.user_level(&ctx.sender) < settings.required_power_level {
        warn!(room_id = %ctx.room_id, sender = %ctx.sender, "insufficient power level");
        return Err(CommandError::auth(ACCESS_DENIED));
    }

    let Some(target) = target else {
        return Ok(());
    };
    let target_level = ctx
        .admin
        .power_levels(target.as_str())
        .await
        .or_upstream("Unable to verify your permissions.")?
        .map_or(0, |pl| pl.user_level(ctx.sender.as_str()));
    if target_level >= settings.required_power_level {
        return Ok(());
    }
    let is_server_admin = ctx
        .admin
        .user_account(ctx.sender.as_str())
        .await
        .or_upstream("Unable to verify your permissions.")?
        .is_some_and(|account| account.admin);
    if is_server_admin {
        Ok(())
    } else {
        warn!(target = %target, sender = %ctx.sender, "no permission in target room");
        Err(CommandError::auth(ACCESS_DENIED))
    }
}
