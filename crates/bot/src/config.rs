use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use matrix_sdk::authentication::matrix::MatrixSession;
use plugin_core::Settings;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(
    name = "matrix-admin-bot",
    version,
    about = "Matrix bot relaying admin chat commands to the homeserver admin API"
)]
pub struct Args {
    /// Homeserver base URL, e.g. `https://matrix.example.org`.
    #[arg(long, env = "MATRIX_HOMESERVER")]
    pub homeserver: String,

    /// Username (localpart or full user ID)
    #[arg(long, env = "MATRIX_USERNAME")]
    pub username: String,

    /// Password (if omitted, will prompt if needed)
    #[arg(long, env = "MATRIX_PASSWORD")]
    pub password: Option<String>,

    /// Directory for persistent state (encryption keys, sync cache)
    #[arg(long, env = "MATRIX_STORE", default_value = "./bot-store")]
    pub store: PathBuf,

    /// JSON session file for access token/device info
    #[arg(long, env = "MATRIX_SESSION_FILE", default_value = "./session.json")]
    pub session_file: PathBuf,

    /// Device display name
    #[arg(long, env = "MATRIX_DEVICE_NAME", default_value = "matrix-admin-bot")]
    pub device_name: String,

    /// YAML file with command settings and room groups
    #[arg(long, env = "MATRIX_CONFIG", default_value = "./config.yaml")]
    pub config: PathBuf,

    /// Disable auto-joining rooms when invited
    #[arg(long)]
    pub no_autojoin: bool,

    /// Sync timeout in milliseconds
    #[arg(long, env = "MATRIX_SYNC_TIMEOUT_MS", default_value_t = 30000)]
    pub sync_timeout_ms: u64,

    /// Token for the admin API; defaults to the bot's own access token
    #[arg(long, env = "MATRIX_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// Homeserver name local users and rooms must belong to
    #[arg(long, env = "MATRIX_SERVER_DOMAIN")]
    pub server_domain: Option<String>,

    /// Identity provider invited accounts must be linked to
    #[arg(long, env = "USER_AUTH_PROVIDER")]
    pub user_auth_provider: Option<String>,

    /// GraphQL endpoint of the authentication service
    #[arg(long, env = "MATRIX_AUTHENTICATION_SERVICE_GRAPHQL_URL")]
    pub auth_service_url: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

/// Reads the YAML settings file and applies command-line overrides.
pub fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = read_settings(&args.config)?;
    if let Some(domain) = non_empty(args.server_domain.as_deref()) {
        settings.server_domain = domain;
    }
    if let Some(provider) = non_empty(args.user_auth_provider.as_deref()) {
        settings.user_auth_provider = Some(provider);
    }
    validate(&settings)?;
    Ok(settings)
}

fn read_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(anyhow!(
            "config file not found at {}. Create one or set --config",
            path.display()
        ));
    }
    let yaml = fs::read_to_string(path)
        .with_context(|| format!("reading config file at {}", path.display()))?;
    serde_yaml::from_str(&yaml).context("parsing YAML config")
}

fn validate(settings: &Settings) -> Result<()> {
    if settings.server_domain.trim().is_empty() {
        return Err(anyhow!(
            "server domain is not configured; set server_domain or MATRIX_SERVER_DOMAIN"
        ));
    }
    if settings.command_prefix.trim().is_empty() {
        return Err(anyhow!("command_prefix must not be empty"));
    }
    if settings.report_chunk_lines == 0 {
        return Err(anyhow!("report_chunk_lines must be at least 1"));
    }
    for group in &settings.default_groups {
        if settings.room_group(group).is_none() {
            return Err(anyhow!("default group \"{group}\" is not defined in room_groups"));
        }
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user_id: String,
    pub device_id: String,
}

impl From<&MatrixSession> for SavedSession {
    fn from(session: &MatrixSession) -> Self {
        Self {
            access_token: session.tokens.access_token.clone(),
            refresh_token: session.tokens.refresh_token.clone(),
            user_id: session.meta.user_id.to_string(),
            device_id: session.meta.device_id.to_string(),
        }
    }
}

pub fn load_session(path: &Path) -> Result<Option<SavedSession>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading session file at {}", path.display()))?;
    let session: SavedSession = serde_json::from_str(&data).context("parsing session JSON")?;
    Ok(Some(session))
}

pub fn save_session(path: &Path, session: &SavedSession) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(session)?;
    fs::write(path, data).with_context(|| format!("writing session file at {}", path.display()))?;
    Ok(())
}
