use core::time::Duration;

use matrix_sdk::ruma::UserId;
use serde::{Deserialize, Serialize};

use crate::PluginSpec;

/// Runtime settings shared by every command.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub command_prefix: String,
    /// Homeserver name that local users and rooms must belong to.
    pub server_domain: String,
    /// Identity provider every invited account must be linked to, when set.
    pub user_auth_provider: Option<String>,
    /// Rooms commands may be issued from. Empty means any room.
    pub admin_rooms: Vec<String>,
    pub required_power_level: i64,
    pub confirmation_ttl_secs: u64,
    pub report_chunk_lines: usize,
    pub pacing: Pacing,
    pub room_groups: Vec<RoomGroup>,
    pub default_groups: Vec<String>,
    /// HTML sent to new users by `welcome-message send`.
    pub welcome_message: Option<String>,
    pub plugins: Vec<PluginSpec>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            command_prefix: "!admin".to_owned(),
            server_domain: String::new(),
            user_auth_provider: None,
            admin_rooms: Vec::new(),
            required_power_level: 50,
            confirmation_ttl_secs: 120,
            report_chunk_lines: 100,
            pacing: Pacing::default(),
            room_groups: Vec::new(),
            default_groups: Vec::new(),
            welcome_message: None,
            plugins: Vec::new(),
        }
    }
}

impl Settings {
    #[must_use]
    pub const fn confirmation_ttl(&self) -> Duration {
        Duration::from_secs(self.confirmation_ttl_secs)
    }

    #[must_use]
    pub fn is_local_user(&self, user_id: &UserId) -> bool {
        user_id.server_name().as_str() == self.server_domain
    }

    #[must_use]
    pub fn room_group(&self, name: &str) -> Option<&RoomGroup> {
        self.room_groups
            .iter()
            .find(|g| g.name.eq_ignore_ascii_case(name))
    }

    /// Room ids of the named groups in configuration order, without
    /// duplicates. Unknown group names are returned separately.
    #[must_use]
    pub fn rooms_in_groups<'a>(&self, names: &[&'a str]) -> (Vec<String>, Vec<&'a str>) {
        let mut rooms: Vec<String> = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            match self.room_group(name) {
                Some(group) => {
                    for room in &group.rooms {
                        if !rooms.contains(room) {
                            rooms.push(room.clone());
                        }
                    }
                }
                None => unknown.push(*name),
            }
        }
        (rooms, unknown)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoomGroup {
    pub name: String,
    #[serde(default)]
    pub rooms: Vec<String>,
}

/// Delay inserted between consecutive items of a bulk operation.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Pacing {
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

const fn default_delay_ms() -> u64 {
    300
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
        }
    }
}

impl Pacing {
    #[must_use]
    pub const fn none() -> Self {
        Self { delay_ms: 0 }
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(self.delay()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_sdk::ruma::user_id;

    #[test]
    fn yaml_defaults_fill_missing_fields() {
        let settings: Settings = serde_yaml::from_str(
            "server_domain: example.org\nroom_groups:\n  - name: common\n    rooms: ['!a:example.org']\n",
        )
        .expect("yaml");
        assert_eq!(settings.command_prefix, "!admin");
        assert_eq!(settings.required_power_level, 50);
        assert_eq!(settings.confirmation_ttl(), Duration::from_secs(120));
        assert_eq!(settings.report_chunk_lines, 100);
        assert_eq!(settings.pacing.delay_ms, 300);
        assert_eq!(settings.room_groups.len(), 1);
    }

    #[test]
    fn local_user_check_compares_server_name() {
        let settings = Settings {
            server_domain: "example.org".to_owned(),
            ..Settings::default()
        };
        assert!(settings.is_local_user(user_id!("@alice:example.org")));
        assert!(!settings.is_local_user(user_id!("@alice:example.org.evil")));
    }

    #[test]
    fn group_rooms_are_deduplicated_and_unknown_groups_reported() {
        let settings = Settings {
            room_groups: vec![
                RoomGroup {
                    name: "common".to_owned(),
                    rooms: vec!["!a:x".to_owned(), "!b:x".to_owned()],
                },
                RoomGroup {
                    name: "infra".to_owned(),
                    rooms: vec!["!b:x".to_owned(), "!c:x".to_owned()],
                },
            ],
            ..Settings::default()
        };
        let (rooms, unknown) = settings.rooms_in_groups(&["Common", "infra", "nope"]);
        assert_eq!(rooms, ["!a:x", "!b:x", "!c:x"]);
        assert_eq!(unknown, ["nope"]);
    }
}
