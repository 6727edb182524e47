use async_trait::async_trait;
use core::time::Duration;
use matrix_sdk::ruma::OwnedRoomId;
use tracing::info;

use plugin_core::access::{ensure_can_execute, ensure_local_sender, local_room_arg, resolve_room};
use plugin_core::confirm::Confirmation;
use plugin_core::{
    CommandError, CommandResult, Plugin, PluginContext, PluginSpec, UpstreamContext, html_escape,
    send_html, send_text,
};

pub const DELETE_ROOM_COMMAND: &str = "delete-room";

#[derive(Debug, Clone)]
struct PendingDeletion {
    room_id: OwnedRoomId,
    room_name: String,
}

/// Deletes a room for good: members are kicked, the room is blocked and its
/// history purged.
#[derive(Debug)]
pub struct DeleteRoom {
    confirmation: Confirmation<PendingDeletion>,
}

impl DeleteRoom {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            confirmation: Confirmation::new(DELETE_ROOM_COMMAND, "room deletion", ttl),
        }
    }

    async fn stage(&self, ctx: &PluginContext, args: &[String]) -> CommandResult {
        ensure_local_sender(ctx)?;
        let handle = local_room_arg(ctx, args.first().map(String::as_str))?;
        let room_id = resolve_room(ctx, &handle).await?;
        ensure_can_execute(ctx, Some(&room_id)).await?;

        let room = ctx
            .admin
            .room_info(room_id.as_str())
            .await
            .or_upstream("Unable to retrieve room details.")?
            .ok_or_else(|| CommandError::user(format!("The room \"{room_id}\" cannot be found.")))?;
        let room_name = room.display_name().to_owned();
        let question = format!(
            "Are you sure you want to remove the room \"{}\" completely?",
            html_escape(&room_name)
        );
        self.confirmation
            .stage(ctx, PendingDeletion { room_id, room_name }, &question, "the deletion")
            .await
    }

    async fn execute(&self, ctx: &PluginContext) -> CommandResult {
        let request = self.confirmation.consume(&ctx.sender).await?;
        send_text(
            ctx,
            format!("Beginning the process of removing the room \"{}\"...", request.room_name),
        )
        .await?;

        let deletion = ctx
            .admin
            .delete_room(request.room_id.as_str())
            .await
            .or_upstream("Unable to delete the room. An error has occurred.")?;
        info!(
            room_id = %request.room_id,
            sender = %ctx.sender,
            kicked = deletion.kicked_users.len(),
            failed_to_kick = deletion.failed_to_kick_users.len(),
            "room deleted"
        );

        let mut html = format!(
            "Done! The room \"{}\" has been successfully deleted.",
            html_escape(&request.room_name)
        );
        if !deletion.failed_to_kick_users.is_empty() {
            html.push_str(&format!(
                "<br /><br />Failed to kick users:<br /><pre>{}</pre>",
                html_escape(&deletion.failed_to_kick_users.join("\n"))
            ));
        }
        if !deletion.kicked_users.is_empty() {
            html.push_str(&format!(
                "<br /><br />Kicked users:<br /><pre>{}</pre>",
                html_escape(&deletion.kicked_users.join("\n"))
            ));
        }
        send_html(ctx, &html).await
    }
}

#[async_trait]
impl Plugin for DeleteRoom {
    fn id(&self) -> &'static str {
        DELETE_ROOM_COMMAND
    }

    fn help(&self) -> &'static str {
        "delete-room <room>  Delete a room, kick its members and purge its history (asks for confirmation)"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        if Confirmation::<PendingDeletion>::is_confirmation(args) {
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

    const TARGET: &str = "/_synapse/admin/v1/rooms/!old:example.org";

    fn plugin() -> DeleteRoom {
        DeleteRoom::new(Duration::from_secs(120))
    }

    fn mock_lookups(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path(TARGET);
            then.status(200)
                .json_body(json!({ "room_id": "!old:example.org", "name": "Old room" }));
        });
        server.mock(|when, then| {
            when.method(GET).path(format!("{TARGET}/state"));
            then.status(200).json_body(json!({ "state": [{
                "type": "m.room.power_levels",
                "state_key": "",
                "content": { "users": { "@admin:example.org": 100 } }
            }] }));
        });
    }

    #[tokio::test]
    async fn deletion_requires_confirmation_and_runs_once() {
        let server = MockServer::start();
        mock_lookups(&server);
        let delete = server.mock(|when, then| {
            when.method(DELETE)
                .path(TARGET)
                .json_body(json!({ "block": true, "purge": true }));
            then.status(200).json_body(json!({
                "kicked_users": ["@alice:example.org", "@bob:example.org"],
                "failed_to_kick_users": ["@carol:example.org"],
                "local_aliases": [],
                "new_room_id": null
            }));
        });
        let t = TestContext::builder(&server.base_url()).build();
        let plugin = plugin();
        let spec = plugin.spec();

        plugin
            .run(&t.ctx, &args("!old:example.org"), &spec)
            .await
            .expect("staged");
        let prompt = t.chat.last_body().expect("prompt");
        assert!(prompt.contains("remove the room \"Old room\" completely?"));
        assert!(prompt.contains("<code>!admin delete-room confirm</code>"));
        delete.assert_calls(0);

        plugin
            .run(&t.ctx, &args("confirm"), &spec)
            .await
            .expect("deleted");
        delete.assert_calls(1);
        let done = t.chat.last_body().expect("report");
        assert!(done.starts_with("Done! The room \"Old room\" has been successfully deleted."));
        assert!(done.contains("Failed to kick users:<br /><pre>@carol:example.org</pre>"));
        assert!(done.contains("Kicked users:<br /><pre>@alice:example.org\n@bob:example.org</pre>"));

        let replay = plugin
            .run(&t.ctx, &args("confirm"), &spec)
            .await
            .expect_err("replayed confirmation");
        assert!(replay.user_message().starts_with("There is nothing to confirm."));
        delete.assert_calls(1);
    }

    #[tokio::test]
    async fn missing_room_is_reported_and_nothing_is_staged() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(format!("{TARGET}/state"));
            then.status(200).json_body(json!({ "state": [] }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/_synapse/admin/v2/users/@admin:example.org");
            then.status(200)
                .json_body(json!({ "name": "@admin:example.org", "admin": true }));
        });
        server.mock(|when, then| {
            when.method(GET).path(TARGET);
            then.status(404)
                .json_body(json!({ "errcode": "M_NOT_FOUND", "error": "Room not found" }));
        });
        let t = TestContext::builder(&server.base_url()).build();
        let plugin = plugin();
        let spec = plugin.spec();

        let err = plugin
            .run(&t.ctx, &args("!old:example.org"), &spec)
            .await
            .expect_err("not found");
        assert_eq!(err.user_message(), "The room \"!old:example.org\" cannot be found.");

        let err = plugin
            .run(&t.ctx, &args("confirm"), &spec)
            .await
            .expect_err("nothing staged");
        assert!(err.user_message().contains("room deletion request has expired"));
    }

    #[tokio::test]
    async fn foreign_room_is_rejected_before_any_lookup() {
        let server = MockServer::start();
        let any = server.mock(|when, then| {
            when.path_includes("/");
            then.status(500);
        });
        let t = TestContext::builder(&server.base_url()).build();
        let plugin = plugin();

        let err = plugin
            .run(&t.ctx, &args("!room:matrix.org"), &plugin.spec())
            .await
            .expect_err("foreign room");
        assert!(err.user_message().contains("not registered under example.org, but matrix.org"));
        any.assert_calls(0);
    }

    #[tokio::test]
    async fn failed_deletion_is_not_restaged() {
        let server = MockServer::start();
        mock_lookups(&server);
        server.mock(|when, then| {
            when.method(DELETE).path(TARGET);
            then.status(500)
                .json_body(json!({ "errcode": "M_UNKNOWN", "error": "database locked" }));
        });
        let t = TestContext::builder(&server.base_url()).build();
        let plugin = plugin();
        let spec = plugin.spec();

        plugin
            .run(&t.ctx, &args("!old:example.org"), &spec)
            .await
            .expect("staged");
        let err = plugin
            .run(&t.ctx, &args("confirm"), &spec)
            .await
            .expect_err("delete failed");
        assert_eq!(
            err.user_message(),
            "Unable to delete the room. An error has occurred."
        );
        assert!(plugin.run(&t.ctx, &args("confirm"), &spec).await.is_err());
    }
}
