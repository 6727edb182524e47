//! The `help` command: a notice listing every enabled command.

use std::sync::Arc;

use async_trait::async_trait;
use plugin_core::factory::PluginFactory;
use plugin_core::{
    CommandResult, Plugin, PluginContext, PluginSpec, Settings, html_escape, send_notice,
};

pub const HELP_COMMAND: &str = "help";

const GROUP_SEPARATOR: &str = "|";

#[derive(Debug)]
pub struct HelpPlugin;

impl PluginFactory for HelpPlugin {
    fn build(&self, _settings: &Settings) -> Vec<Arc<dyn Plugin>> {
        vec![Arc::new(Help)]
    }
}

#[derive(Debug)]
pub struct Help;

impl Help {
    async fn menu(ctx: &PluginContext) -> String {
        let prefix = &ctx.settings.command_prefix;
        let mut lines = Vec::new();
        for entry in ctx.registry.entries().await {
            if !ctx.registry.is_enabled(&entry.spec.id).await {
                continue;
            }
            lines.extend(
                entry
                    .plugin
                    .help()
                    .lines()
                    .map(|usage| format!("{prefix} {}", usage.trim())),
            );
        }

        let settings = &ctx.settings;
        if !settings.room_groups.is_empty() {
            let groups: Vec<_> = settings.room_groups.iter().map(|g| g.name.as_str()).collect();
            lines.push(String::new());
            lines.push(format!("Available groups: {}", groups.join(GROUP_SEPARATOR)));
            if !settings.default_groups.is_empty() {
                lines.push(format!(
                    "Default groups: {}",
                    settings.default_groups.join(GROUP_SEPARATOR)
                ));
            }
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Plugin for Help {
    fn id(&self) -> &'static str {
        HELP_COMMAND
    }

    fn help(&self) -> &'static str {
        "help  This menu"
    }

    async fn run(&self, ctx: &PluginContext, _args: &[String], _spec: &PluginSpec) -> CommandResult {
        let menu = Self::menu(ctx).await;
        let plain = format!("Help menu:\n{menu}");
        let html = format!(
            "<b>Help menu:</b><br /><pre><code>{}</code></pre>",
            html_escape(&menu)
        );
        send_notice(ctx, &plain, &html).await
    }
}
