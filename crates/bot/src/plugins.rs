use std::sync::Arc;

use plugin_core::factory::PluginFactory;
use plugin_core::{PluginRegistry, PluginSpec, Settings};
use plugin_help::HelpPlugin;
use plugin_invites::InvitesPlugin;
use plugin_rooms::RoomsPlugin;
use plugin_users::UsersPlugin;
use tracing::{info, warn};

const FACTORIES: [&dyn PluginFactory; 4] = [&HelpPlugin, &InvitesPlugin, &RoomsPlugin, &UsersPlugin];

/// Registers every command, applying the per-plugin specs from the settings
/// file on top of each command's defaults.
pub async fn build_registry(settings: &Settings) -> Arc<PluginRegistry> {
    let registry = Arc::new(PluginRegistry::new());
    let mut known = Vec::new();

    for factory in FACTORIES {
        for plugin in factory.build(settings) {
            let configured = settings.plugins.iter().find(|s| s.id == plugin.id());
            let spec = merge_spec(plugin.spec(), configured);
            if !spec.enabled {
                info!(plugin = %spec.id, "Plugin disabled by configuration");
            }
            known.push(spec.id.clone());
            registry.register(spec, plugin).await;
        }
    }

    for spec in &settings.plugins {
        if !known.contains(&spec.id) {
            warn!("Unknown plugin ID: {}", spec.id);
        }
    }
    registry
}

/// The configured spec decides `enabled`; extra trigger words are added to the
/// defaults, never replacing them.
fn merge_spec(default: PluginSpec, configured: Option<&PluginSpec>) -> PluginSpec {
    let Some(configured) = configured else {
        return default;
    };
    let mut merged = default;
    merged.enabled = configured.enabled;
    for cmd in &configured.triggers.commands {
        if !merged
            .triggers
            .commands
            .iter()
            .any(|c| c.eq_ignore_ascii_case(cmd))
        {
            merged.triggers.commands.push(cmd.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_command_is_registered() {
        let registry = build_registry(&Settings::default()).await;
        let ids: Vec<_> = registry.entries().await.into_iter().map(|e| e.spec.id).collect();
        assert_eq!(
            ids,
            [
                "account",
                "bulk-invite",
                "deactivate-user",
                "delete-room",
                "help",
                "invite",
                "invite-room",
                "list-all-rooms",
                "list-new-joiners",
                "list-rooms",
                "list-spaces",
                "promote",
                "rotate-token",
                "space",
                "welcome-message",
            ]
        );
    }

    #[tokio::test]
    async fn configured_specs_disable_and_alias_commands() {
        let settings: Settings = serde_yaml::from_str(
            "plugins:\n\
             \x20 - id: delete-room\n\
             \x20   enabled: false\n\
             \x20 - id: list-rooms\n\
             \x20   triggers:\n\
             \x20     commands: [groups, LIST-ROOMS]\n",
        )
        .expect("yaml");
        let registry = build_registry(&settings).await;

        assert!(!registry.is_enabled("delete-room").await);
        assert!(registry.is_enabled("list-rooms").await);
        let entry = registry.entry_by_command("groups").await.expect("alias");
        assert_eq!(entry.spec.id, "list-rooms");
        assert_eq!(entry.spec.triggers.commands, ["list-rooms", "groups"]);
    }
}
