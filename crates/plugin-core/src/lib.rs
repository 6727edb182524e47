pub mod access;
pub mod chat;
pub mod confirm;
mod error;
pub mod factory;
pub mod report;
pub mod settings;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chat::Chat;
pub use error::{CommandError, CommandResult, ErrorKind, UpstreamContext};
pub use settings::Settings;

use core::fmt;
use std::{collections::HashMap, sync::Arc};

use admin_api::{AdminApi, AuthService};
use async_trait::async_trait;
use matrix_sdk::ruma::{OwnedRoomId, OwnedUserId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Everything a command needs to act on one incoming message.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub chat: Arc<dyn Chat>,
    pub admin: Arc<AdminApi>,
    /// Present when the authentication service endpoint is configured.
    pub auth_service: Option<Arc<AuthService>>,
    pub settings: Arc<Settings>,
    pub registry: Arc<PluginRegistry>,
    pub room_id: OwnedRoomId,
    pub sender: OwnedUserId,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &'static str;

    /// Usage lines, one per form of the command, without the prefix.
    fn help(&self) -> &'static str;

    fn spec(&self) -> PluginSpec {
        PluginSpec::for_command(self.id())
    }

    /// `args` are the whitespace separated tokens after the subcommand.
    async fn run(&self, ctx: &PluginContext, args: &[String], spec: &PluginSpec) -> CommandResult;
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PluginTriggers {
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginSpec {
    pub id: String,
    #[serde(default = "enabled_true")]
    pub enabled: bool,
    #[serde(default)]
    pub triggers: PluginTriggers,
}

impl PluginSpec {
    /// Enabled spec triggered by the subcommand of the same name.
    #[must_use]
    pub fn for_command(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            enabled: true,
            triggers: PluginTriggers {
                commands: vec![id.to_owned()],
            },
        }
    }
}

const fn enabled_true() -> bool {
    true
}

#[derive(Clone)]
pub struct PluginEntry {
    pub spec: PluginSpec,
    pub plugin: Arc<dyn Plugin>,
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEntry")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_id: HashMap<String, PluginEntry>,
    by_command: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, spec: PluginSpec, plugin: Arc<dyn Plugin>) -> Option<PluginEntry> {
        let mut inner = self.inner.write().await;
        let id = spec.id.clone();
        inner.remove_triggers_for(&id);
        for cmd in &spec.triggers.commands {
            inner.by_command.insert(normalize_cmd(cmd), id.clone());
        }
        inner.by_id.insert(id, PluginEntry { spec, plugin })
    }

    pub async fn entry_by_command(&self, token: &str) -> Option<PluginEntry> {
        let inner = self.inner.read().await;
        inner
            .by_command
            .get(&normalize_cmd(token))
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    /// Entries ordered by id.
    pub async fn entries(&self) -> Vec<PluginEntry> {
        let inner = self.inner.read().await;
        let mut entries: Vec<_> = inner.by_id.values().cloned().collect();
        entries.sort_by(|a, b| a.spec.id.cmp(&b.spec.id));
        entries
    }

    pub async fn is_enabled(&self, id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.by_id.get(id).is_some_and(|entry| entry.spec.enabled)
    }
}

impl RegistryInner {
    fn remove_triggers_for(&mut self, id: &str) {
        self.by_command.retain(|_, existing| existing != id);
    }
}

fn normalize_cmd(s: &str) -> String {
    s.trim().to_lowercase()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Collapses whitespace and caps the length, for log lines.
#[must_use]
pub fn sanitize_line(s: &str, max: usize) -> String {
    let compact = s.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate(&compact, max)
}

#[must_use]
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub async fn send_text(ctx: &PluginContext, text: impl AsRef<str>) -> CommandResult {
    ctx.chat.send_text(&ctx.room_id, text.as_ref()).await?;
    Ok(())
}

pub async fn send_html(ctx: &PluginContext, html: &str) -> CommandResult {
    ctx.chat.send_html(&ctx.room_id, html).await?;
    Ok(())
}

pub async fn send_notice(ctx: &PluginContext, plain: &str, html: &str) -> CommandResult {
    ctx.chat.send_notice_html(&ctx.room_id, plain, html).await?;
    Ok(())
}
