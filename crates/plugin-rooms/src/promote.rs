use async_trait::async_trait;
use tracing::info;

use plugin_core::access::{ensure_can_execute, local_room_arg, local_user_arg, resolve_room};
use plugin_core::chat::Membership;
use plugin_core::{
    CommandError, CommandResult, Plugin, PluginContext, PluginSpec, UpstreamContext, send_text,
};

pub const PROMOTE_COMMAND: &str = "promote";

/// Named power levels accepted in place of a number.
pub const POWER_LEVEL_ALIASES: [(&str, i64); 3] = [("default", 0), ("moderator", 50), ("admin", 100)];

const POWER_LEVELS_EVENT: &str = "m.room.power_levels";

fn parse_level(raw: Option<&str>) -> CommandResult<i64> {
    let raw = raw.ok_or_else(|| {
        CommandError::user("Power level argument is missing. It should be a number (0-100).")
    })?;
    POWER_LEVEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == raw)
        .map(|(_, level)| *level)
        .or_else(|| raw.parse::<i64>().ok())
        .filter(|level| (0..=100).contains(level))
        .ok_or_else(|| {
            CommandError::user(format!(
                "Invalid power level argument. It should be a number (0-100). Provided value: \"{raw}\"."
            ))
        })
}

fn alias_suffix(level: i64) -> String {
    POWER_LEVEL_ALIASES
        .iter()
        .find(|(_, l)| *l == level)
        .map(|(alias, _)| format!(" ({alias})"))
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct Promote;

#[async_trait]
impl Plugin for Promote {
    fn id(&self) -> &'static str {
        PROMOTE_COMMAND
    }

    fn help(&self) -> &'static str {
        "promote <user> <room> <0-100|default|moderator|admin>  Set a user's power level in a room"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        let arg = |i: usize| args.get(i).map(String::as_str);
        let user_id = local_user_arg(ctx, arg(0))?;
        let handle = local_room_arg(ctx, arg(1))?;
        let level = parse_level(arg(2))?;
        ensure_can_execute(ctx, None).await?;
        let room_id = resolve_room(ctx, &handle).await?;

        let room_name = ctx
            .chat
            .room_name(&room_id)
            .await
            .map_err(|e| CommandError::upstream(format!("The room \"{room_id}\" cannot be found."), e))?
            .unwrap_or_else(|| room_id.to_string());

        let bot_id = ctx.chat.own_user_id();
        let bot = ctx
            .chat
            .member(&room_id, bot_id)
            .await
            .or_upstream("Unable to retrieve a list of the room members.")?;
        if !bot.is_some_and(|m| m.membership == Membership::Join) {
            return Err(CommandError::user(format!(
                "The bot is not a participant in the room \"{room_name}\". Make sure the bot has joined the room and has enough power level to promote others."
            )));
        }
        let member = ctx
            .chat
            .member(&room_id, &user_id)
            .await
            .or_upstream("Unable to retrieve a list of the room members.")?
            .filter(|m| m.membership == Membership::Join)
            .ok_or_else(|| {
                CommandError::user(format!(
                    "The user is not a participant in the room \"{room_name}\"."
                ))
            })?;

        let levels = ctx
            .chat
            .power_levels(&room_id)
            .await
            .or_upstream("Unable to retrieve the current power level of the user.")?;
        let user_level = levels.user_level(&user_id);
        let bot_level = levels.user_level(bot_id);
        let required = levels.for_state_event(POWER_LEVELS_EVENT);
        if bot_level < required {
            return Err(CommandError::user(format!(
                "The command cannot be executed because the bot's power level ({bot_level}) is lower than the required power level ({required}) for changing another user's power level."
            )));
        }
        if bot_level < user_level {
            return Err(CommandError::user(format!(
                "Cannot change the power level of the user because their current power level ({user_level}) is higher than the bot's ({bot_level})."
            )));
        }
        if bot_level < level {
            return Err(CommandError::user(format!(
                "Cannot assign the power level ({level}) to the user because the bot has a lower power level ({bot_level})."
            )));
        }

        ctx.chat.set_power_level(&room_id, &user_id, level).await?;
        info!(room_id = %room_id, user_id = %user_id, from = user_level, to = level, sender = %ctx.sender, "power level changed");

        let who = member.display_name.as_deref().unwrap_or("The user");
        send_text(
            ctx,
            format!(
                "Done! {who} now has a power level of {level}{} in the room {room_name}. Previously it was {user_level}{}.",
                alias_suffix(level),
                alias_suffix(user_level),
            ),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use matrix_sdk::ruma::{room_id, user_id};
    use plugin_core::testing::{FakeChat, TestContext, args};

    fn room_with_bot(bot_level: i64) -> FakeChat {
        let room = room_id!("!dev:example.org");
        FakeChat::new()
            .with_room(room, "Developers")
            .with_display_name(user_id!("@alice:example.org"), "Alice")
            .with_member(room, user_id!("@bot:example.org"), Membership::Join)
            .with_member(room, user_id!("@alice:example.org"), Membership::Join)
            .with_power_level(room, user_id!("@bot:example.org"), bot_level)
            .with_event_level(room, POWER_LEVELS_EVENT, 100)
    }

    #[test]
    fn levels_accept_aliases_and_numbers() {
        assert_eq!(parse_level(Some("moderator")).expect("alias"), 50);
        assert_eq!(parse_level(Some("42")).expect("number"), 42);
        for bad in ["101", "-1", "mod", ""] {
            assert!(parse_level(Some(bad)).is_err(), "{bad}");
        }
        assert!(parse_level(None).is_err());
        assert_eq!(alias_suffix(100), " (admin)");
        assert_eq!(alias_suffix(42), "");
    }

    #[tokio::test]
    async fn promotes_a_joined_member() {
        let server = MockServer::start();
        let t = TestContext::builder(&server.base_url())
            .chat(room_with_bot(100))
            .build();
        Promote
            .run(
                &t.ctx,
                &args("@alice:example.org !dev:example.org moderator"),
                &Promote.spec(),
            )
            .await
            .expect("promoted");
        assert_eq!(
            t.chat.last_body().expect("reply"),
            "Done! Alice now has a power level of 50 (moderator) in the room Developers. Previously it was 0 (default)."
        );
    }

    #[tokio::test]
    async fn bot_needs_enough_power() {
        let server = MockServer::start();
        let t = TestContext::builder(&server.base_url())
            .chat(room_with_bot(50))
            .build();
        let err = Promote
            .run(
                &t.ctx,
                &args("@alice:example.org !dev:example.org 10"),
                &Promote.spec(),
            )
            .await
            .expect_err("too weak");
        assert!(err.user_message().contains("bot's power level (50) is lower than the required power level (100)"));
    }

    #[tokio::test]
    async fn non_member_is_rejected() {
        let server = MockServer::start();
        let t = TestContext::builder(&server.base_url())
            .chat(room_with_bot(100))
            .build();
        let err = Promote
            .run(
                &t.ctx,
                &args("@bob:example.org !dev:example.org admin"),
                &Promote.spec(),
            )
            .await
            .expect_err("not a member");
        assert_eq!(
            err.user_message(),
            "The user is not a participant in the room \"Developers\"."
        );
    }
}
