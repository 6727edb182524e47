use std::sync::Arc;

use admin_api::{AdminApi, AuthService};
use matrix_sdk::ruma::{OwnedRoomId, OwnedUserId};
use plugin_core::{
    Chat, CommandError, CommandResult, ErrorKind, PluginContext, PluginRegistry, Settings,
    sanitize_line, send_text,
};
use tracing::{error, info, warn};

const HELP_COMMAND: &str = "help";

/// Splits a message into the subcommand and its arguments. `None` when the
/// body does not start with `prefix` followed by whitespace or the end.
pub fn parse_command(prefix: &str, body: &str) -> Option<Vec<String>> {
    let rest = body.trim().strip_prefix(prefix)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.split_whitespace().map(ToOwned::to_owned).collect())
}

/// Routes incoming command messages to registered plugins and turns their
/// failures into replies.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    chat: Arc<dyn Chat>,
    admin: Arc<AdminApi>,
    auth_service: Option<Arc<AuthService>>,
    settings: Arc<Settings>,
    registry: Arc<PluginRegistry>,
}

impl Dispatcher {
    pub const fn new(
        chat: Arc<dyn Chat>,
        admin: Arc<AdminApi>,
        auth_service: Option<Arc<AuthService>>,
        settings: Arc<Settings>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            chat,
            admin,
            auth_service,
            settings,
            registry,
        }
    }

    pub async fn handle_message(&self, room_id: OwnedRoomId, sender: OwnedUserId, body: &str) {
        if &*sender == self.chat.own_user_id() {
            return;
        }
        let Some(tokens) = parse_command(&self.settings.command_prefix, body) else {
            return;
        };
        info!(room_id = %room_id, sender = %sender, body = %sanitize_line(body, 200), "Command received");

        let ctx = PluginContext {
            chat: Arc::clone(&self.chat),
            admin: Arc::clone(&self.admin),
            auth_service: self.auth_service.clone(),
            settings: Arc::clone(&self.settings),
            registry: Arc::clone(&self.registry),
            room_id,
            sender,
        };
        let (command, args) = tokens
            .split_first()
            .map_or((HELP_COMMAND, &[][..]), |(first, rest)| (first.as_str(), rest));

        if let Err(err) = self.run(&ctx, command, args).await {
            report_failure(&ctx, command, &err).await;
        }
    }

    async fn run(&self, ctx: &PluginContext, command: &str, args: &[String]) -> CommandResult {
        let Some(entry) = self.registry.entry_by_command(command).await else {
            return Err(CommandError::user(format!(
                "Unknown command \"{command}\". Send \"{} {HELP_COMMAND}\" to list the available commands.",
                self.settings.command_prefix
            )));
        };
        if !self.registry.is_enabled(&entry.spec.id).await {
            return Err(CommandError::user(format!(
                "The \"{command}\" command is disabled."
            )));
        }
        entry.plugin.run(ctx, args, &entry.spec).await?;
        info!(command = %entry.spec.id, sender = %ctx.sender, "Command completed");
        Ok(())
    }
}

/// The single place failures are logged and answered.
async fn report_failure(ctx: &PluginContext, command: &str, err: &CommandError) {
    match err.kind() {
        ErrorKind::User => {
            info!(command = %command, sender = %ctx.sender, error = %err.detail(), "Command rejected");
        }
        ErrorKind::Auth => {
            warn!(command = %command, sender = %ctx.sender, room_id = %ctx.room_id, error = %err.detail(), "Command denied");
        }
        ErrorKind::Upstream | ErrorKind::Unknown => {
            error!(command = %command, sender = %ctx.sender, error = %err.detail(), "Command failed");
        }
    }
    if let Err(e) = send_text(ctx, err.user_message()).await {
        error!(command = %command, error = %e.detail(), "Failed to deliver error reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use httpmock::MockServer;
    use matrix_sdk::ruma::{owned_user_id, user_id};
    use plugin_core::testing::{TestContext, command_room};
    use plugin_core::{Plugin, PluginSpec};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn id(&self) -> &'static str {
            "record"
        }

        fn help(&self) -> &'static str {
            "record <args>"
        }

        async fn run(&self, _: &PluginContext, args: &[String], _: &PluginSpec) -> CommandResult {
            self.calls.lock().expect("lock").push(args.to_vec());
            if args.first().is_some_and(|a| a == "fail") {
                return Err(CommandError::from(anyhow::anyhow!("token syt_secret rejected")));
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    struct HelpStub;

    #[async_trait]
    impl Plugin for HelpStub {
        fn id(&self) -> &'static str {
            HELP_COMMAND
        }

        fn help(&self) -> &'static str {
            "help"
        }

        async fn run(&self, ctx: &PluginContext, _: &[String], _: &PluginSpec) -> CommandResult {
            send_text(ctx, "help menu").await
        }
    }

    async fn dispatcher(t: &TestContext, recorder: Arc<Recorder>, enabled: bool) -> Dispatcher {
        let mut spec = recorder.spec();
        spec.enabled = enabled;
        t.ctx.registry.register(spec, recorder).await;
        t.ctx
            .registry
            .register(HelpStub.spec(), Arc::new(HelpStub))
            .await;
        Dispatcher::new(
            Arc::clone(&t.ctx.chat),
            Arc::clone(&t.ctx.admin),
            None,
            Arc::clone(&t.ctx.settings),
            Arc::clone(&t.ctx.registry),
        )
    }

    fn admin() -> OwnedUserId {
        owned_user_id!("@admin:example.org")
    }

    #[test]
    fn prefix_must_stand_alone() {
        assert_eq!(
            parse_command("!admin", "  !admin invite  @a:x  common "),
            Some(vec!["invite".to_owned(), "@a:x".to_owned(), "common".to_owned()])
        );
        assert_eq!(parse_command("!admin", "!admin"), Some(vec![]));
        assert_eq!(parse_command("!admin", "!administrator help"), None);
        assert_eq!(parse_command("!admin", "hello !admin help"), None);
    }

    #[tokio::test]
    async fn arguments_reach_the_plugin() {
        let server = MockServer::start();
        let t = TestContext::builder(&server.base_url()).build();
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher(&t, Arc::clone(&recorder), true).await;

        d.handle_message(command_room(), admin(), "!admin RECORD a b").await;
        assert_eq!(*recorder.calls.lock().expect("lock"), [vec!["a".to_owned(), "b".to_owned()]]);
        assert!(t.chat.sent().is_empty());
    }

    #[tokio::test]
    async fn bare_prefix_shows_help_and_own_messages_are_ignored() {
        let server = MockServer::start();
        let t = TestContext::builder(&server.base_url()).build();
        let d = dispatcher(&t, Arc::new(Recorder::default()), true).await;

        d.handle_message(command_room(), admin(), "!admin").await;
        assert_eq!(t.chat.bodies(), ["help menu"]);

        d.handle_message(command_room(), user_id!("@bot:example.org").to_owned(), "!admin")
            .await;
        assert_eq!(t.chat.bodies().len(), 1);
    }

    #[tokio::test]
    async fn unknown_and_disabled_commands_are_answered() {
        let server = MockServer::start();
        let t = TestContext::builder(&server.base_url()).build();
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher(&t, Arc::clone(&recorder), false).await;

        d.handle_message(command_room(), admin(), "!admin frobnicate").await;
        d.handle_message(command_room(), admin(), "!admin record x").await;
        assert_eq!(
            t.chat.bodies(),
            [
                "Unknown command \"frobnicate\". Send \"!admin help\" to list the available commands.",
                "The \"record\" command is disabled.",
            ]
        );
        assert!(recorder.calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn unexpected_failures_reply_generically() {
        let server = MockServer::start();
        let t = TestContext::builder(&server.base_url()).build();
        let d = dispatcher(&t, Arc::new(Recorder::default()), true).await;

        d.handle_message(command_room(), admin(), "!admin record fail").await;
        assert_eq!(
            t.chat.last_body().as_deref(),
            Some("There was an error processing your command.")
        );
    }
}
