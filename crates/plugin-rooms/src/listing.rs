use admin_api::RoomInfo;
use async_trait::async_trait;
use matrix_sdk::ruma::RoomId;
use tracing::debug;

use plugin_core::access::ensure_can_execute;
use plugin_core::report::chunk_lines;
use plugin_core::settings::RoomGroup;
use plugin_core::{
    CommandError, CommandResult, Plugin, PluginContext, PluginSpec, UpstreamContext, html_escape,
    send_html, send_text,
};

pub const LIST_ROOMS_COMMAND: &str = "list-rooms";
pub const LIST_ALL_ROOMS_COMMAND: &str = "list-all-rooms";
pub const LIST_SPACES_COMMAND: &str = "list-spaces";

const MISSING: &str = "–";

/// Quotes a CSV field when it would otherwise break the row.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

fn room_row(room: &RoomInfo) -> String {
    [
        room.room_id.clone(),
        csv_field(room.name.as_deref().unwrap_or(MISSING)),
        csv_field(room.canonical_alias.as_deref().unwrap_or(MISSING)),
        (if room.is_space() { "space" } else { "room" }).to_owned(),
        room.joined_members.to_string(),
        room.encryption.is_some().to_string(),
        room.public.to_string(),
    ]
    .join(",")
}

fn space_row(room: &RoomInfo) -> String {
    [
        room.room_id.clone(),
        csv_field(room.name.as_deref().unwrap_or(MISSING)),
        csv_field(room.canonical_alias.as_deref().unwrap_or(MISSING)),
    ]
    .join(",")
}

/// Sends a CSV table, split across messages when it is long.
async fn send_csv(ctx: &PluginContext, title: &str, head: &str, rows: &[String]) -> CommandResult {
    let chunks = chunk_lines(&rows.join("\n"), ctx.settings.report_chunk_lines);
    let total = chunks.len();
    for (i, chunk) in chunks.iter().enumerate() {
        let label = if total > 1 {
            format!("{title} {}/{total}", i + 1)
        } else {
            title.to_owned()
        };
        send_html(
            ctx,
            &format!("{label}:<br /><pre>{}</pre>", html_escape(&format!("{head}\n{chunk}"))),
        )
        .await?;
    }
    Ok(())
}

async fn all_rooms(ctx: &PluginContext) -> CommandResult<Vec<RoomInfo>> {
    ensure_can_execute(ctx, None).await?;
    send_text(ctx, "Downloading all rooms...").await?;
    let rooms = ctx
        .admin
        .rooms()
        .await
        .or_upstream("Unable to retrieve the list of rooms.")?;
    debug!(count = rooms.len(), "rooms fetched");
    Ok(rooms)
}

/// CSV of every room on the server.
#[derive(Debug)]
pub struct ListAllRooms;

#[async_trait]
impl Plugin for ListAllRooms {
    fn id(&self) -> &'static str {
        LIST_ALL_ROOMS_COMMAND
    }

    fn help(&self) -> &'static str {
        "list-all-rooms  Export every room on the server as CSV"
    }

    async fn run(&self, ctx: &PluginContext, _args: &[String], _spec: &PluginSpec) -> CommandResult {
        let rooms = all_rooms(ctx).await?;
        if rooms.is_empty() {
            return send_text(ctx, "No rooms found").await;
        }
        let rows: Vec<_> = rooms.iter().map(room_row).collect();
        send_csv(
            ctx,
            "Rooms CSV",
            "id,name,alias,type,members,encryption,public",
            &rows,
        )
        .await
    }
}

/// CSV of every space on the server.
#[derive(Debug)]
pub struct ListSpaces;

#[async_trait]
impl Plugin for ListSpaces {
    fn id(&self) -> &'static str {
        LIST_SPACES_COMMAND
    }

    fn help(&self) -> &'static str {
        "list-spaces  Export every space on the server as CSV"
    }

    async fn run(&self, ctx: &PluginContext, _args: &[String], _spec: &PluginSpec) -> CommandResult {
        let rooms = all_rooms(ctx).await?;
        if rooms.is_empty() {
            return send_text(ctx, "No rooms found").await;
        }
        let rows: Vec<_> = rooms.iter().filter(|r| r.is_space()).map(space_row).collect();
        if rows.is_empty() {
            return send_text(ctx, "No spaces found").await;
        }
        send_csv(ctx, "Spaces CSV", "id,name,alias", &rows).await
    }
}

/// Configured room groups with the names of their rooms.
#[derive(Debug)]
pub struct ListRooms;

impl ListRooms {
    async fn describe(ctx: &PluginContext, group: &RoomGroup) -> String {
        let mut lines = vec![format!("{}:", group.name)];
        for raw in &group.rooms {
            let name = match RoomId::parse(raw.as_str()) {
                Ok(room_id) => ctx.chat.room_name(&room_id).await.ok().flatten(),
                Err(_) => None,
            };
            lines.push(format!("- {}", name.as_deref().unwrap_or(raw)));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Plugin for ListRooms {
    fn id(&self) -> &'static str {
        LIST_ROOMS_COMMAND
    }

    fn help(&self) -> &'static str {
        "list-rooms [<group>]  List the configured room groups"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        ensure_can_execute(ctx, None).await?;
        let settings = &ctx.settings;
        let groups: Vec<&RoomGroup> = match args.first() {
            Some(name) => vec![settings.room_group(name).ok_or_else(|| {
                let known: Vec<_> = settings.room_groups.iter().map(|g| g.name.as_str()).collect();
                CommandError::user(format!(
                    "Unknown room group \"{name}\". Available groups: {}",
                    known.join(", ")
                ))
            })?],
            None => settings.room_groups.iter().collect(),
        };
        if groups.is_empty() {
            return send_text(ctx, "No room groups are configured.").await;
        }

        let mut sections = Vec::with_capacity(groups.len());
        for group in groups {
            sections.push(Self::describe(ctx, group).await);
        }
        send_text(ctx, sections.join("\n\n")).await
    }
}
