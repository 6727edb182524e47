use std::collections::HashMap;

use admin_api::RoomInfo;
use async_trait::async_trait;
use matrix_sdk::ruma::RoomId;
use tracing::info;

use plugin_core::access::{ensure_can_execute, resolve_room, room_arg};
use plugin_core::{
    CommandError, CommandResult, Plugin, PluginContext, PluginSpec, UpstreamContext, html_escape,
    send_html, send_text,
};

pub const SPACE_COMMAND: &str = "space";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpaceOp {
    List,
    Add,
    Remove,
}

impl SpaceOp {
    fn parse(raw: Option<&str>) -> CommandResult<Self> {
        match raw {
            Some("list") => Ok(Self::List),
            Some("add") => Ok(Self::Add),
            Some("remove") => Ok(Self::Remove),
            _ => Err(CommandError::user(
                "Invalid operator. Should be \"add\", \"remove\", or \"list\"",
            )),
        }
    }
}

/// Lists, adds and removes the child rooms of a space.
#[derive(Debug)]
pub struct Space;

#[async_trait]
impl Plugin for Space {
    fn id(&self) -> &'static str {
        SPACE_COMMAND
    }

    fn help(&self) -> &'static str {
        "space <space> list  List the rooms of a space\n\
         space <space> add <room>  Add a room to a space\n\
         space <space> remove <room>  Remove a room from a space"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        let arg = |i: usize| args.get(i).map(String::as_str);
        let space = room_arg(arg(0))
            .map_err(|_| CommandError::user("Missing space room id argument"))?;
        let op = SpaceOp::parse(arg(1))?;
        let target = match op {
            SpaceOp::List => None,
            SpaceOp::Add | SpaceOp::Remove => Some(
                room_arg(arg(2)).map_err(|_| CommandError::user("Missing target room id argument"))?,
            ),
        };
        ensure_can_execute(ctx, None).await?;

        let space_id = resolve_room(ctx, &space)
            .await
            .map_err(|_| CommandError::user("The provided space handle does not represent a space"))?;
        let target_id = match &target {
            Some(handle) => Some(resolve_room(ctx, handle).await.map_err(|_| {
                CommandError::user("The provided target room handle does not represent a room")
            })?),
            None => None,
        };

        match (op, target_id) {
            (SpaceOp::Add, Some(target_id)) => add(ctx, &space_id, &target_id).await,
            (SpaceOp::Remove, Some(target_id)) => remove(ctx, &space_id, &target_id).await,
            _ => list(ctx, &space_id).await,
        }
    }
}

async fn list(ctx: &PluginContext, space_id: &RoomId) -> CommandResult {
    let rooms = ctx
        .admin
        .rooms()
        .await
        .or_upstream("Unable to retrieve the list of rooms.")?;
    let by_id: HashMap<&str, &RoomInfo> = rooms.iter().map(|r| (r.room_id.as_str(), r)).collect();
    let Some(space) = by_id.get(space_id.as_str()) else {
        return send_text(ctx, "Space not found").await;
    };

    let state = ctx.admin.room_state(&space.room_id).await.map_err(|e| {
        let message = e
            .error
            .clone()
            .unwrap_or_else(|| format!("Can't get \"{}\" space state", space.display_name()));
        CommandError::upstream(message, e)
    })?;
    let lines = state
        .space_children()
        .into_iter()
        .filter_map(|child| by_id.get(child))
        .map(|room| {
            let marker = if room.is_space() { " [SPACE]" } else { "" };
            format!("{} ({}){marker}", room.display_name(), room.room_id)
        })
        .collect::<Vec<_>>()
        .join("\n");

    send_html(
        ctx,
        &format!(
            "\"{}\" space rooms:<br /><pre>{}</pre>",
            html_escape(space.display_name()),
            html_escape(&lines)
        ),
    )
    .await
}

/// Looks the space up through the admin API and insists it is a space.
async fn space_name(ctx: &PluginContext, space_id: &RoomId) -> CommandResult<String> {
    ctx.admin
        .room_info(space_id.as_str())
        .await?
        .filter(RoomInfo::is_space)
        .map(|info| info.display_name().to_owned())
        .ok_or_else(|| CommandError::user(format!("Space with id \"{space_id}\" not found")))
}

async fn room_name(ctx: &PluginContext, room_id: &RoomId) -> CommandResult<String> {
    ctx.admin
        .room_info(room_id.as_str())
        .await?
        .map(|info| info.display_name().to_owned())
        .ok_or_else(|| CommandError::user(format!("The room \"{room_id}\" cannot be found.")))
}

async fn add(ctx: &PluginContext, space_id: &RoomId, target_id: &RoomId) -> CommandResult {
    let space = space_name(ctx, space_id).await?;
    let target = room_name(ctx, target_id).await?;
    ctx.chat
        .add_space_child(space_id, target_id, &ctx.settings.server_domain)
        .await?;
    let message = format!("Room \"{target}\" has been added to the space \"{space}\"");
    info!(space_id = %space_id, room_id = %target_id, sender = %ctx.sender, "{message}");
    send_text(ctx, message).await
}

async fn remove(ctx: &PluginContext, space_id: &RoomId, target_id: &RoomId) -> CommandResult {
    let space = space_name(ctx, space_id).await?;
    let target = room_name(ctx, target_id).await?;
    ctx.chat.remove_space_child(space_id, target_id).await?;
    let message = format!("Room \"{target}\" has been removed from the space \"{space}\"");
    info!(space_id = %space_id, room_id = %target_id, sender = %ctx.sender, "{message}");
    send_text(ctx, message).await
}
