use core::fmt;
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Room details as returned by `GET /_synapse/admin/v1/rooms[/<room_id>]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub canonical_alias: Option<String>,
    #[serde(default)]
    pub joined_members: u64,
    #[serde(default)]
    pub joined_local_members: u64,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub encryption: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub room_type: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

impl RoomInfo {
    /// Name, then canonical alias, then the bare room id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.canonical_alias.as_deref())
            .unwrap_or(&self.room_id)
    }

    #[must_use]
    pub fn is_space(&self) -> bool {
        self.room_type.as_deref() == Some("m.space")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomDeletion {
    #[serde(default)]
    pub kicked_users: Vec<String>,
    #[serde(default)]
    pub failed_to_kick_users: Vec<String>,
    #[serde(default)]
    pub local_aliases: Vec<String>,
    #[serde(default)]
    pub new_room_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomState {
    #[serde(default)]
    pub state: Vec<StateEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub state_key: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl RoomState {
    #[must_use]
    pub fn find(&self, kind: &str, state_key: &str) -> Option<&StateEvent> {
        self.state
            .iter()
            .find(|ev| ev.kind == kind && ev.state_key == state_key)
    }

    /// Room ids of `m.space.child` events that still carry a `via` list.
    #[must_use]
    pub fn space_children(&self) -> Vec<&str> {
        self.state
            .iter()
            .filter(|ev| ev.kind == "m.space.child")
            .filter(|ev| {
                ev.content
                    .get("via")
                    .and_then(serde_json::Value::as_array)
                    .is_some_and(|via| !via.is_empty())
            })
            .map(|ev| ev.state_key.as_str())
            .collect()
    }
}

/// Content of an `m.room.power_levels` state event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowerLevelsContent {
    #[serde(default)]
    pub users: BTreeMap<String, i64>,
    #[serde(default)]
    pub users_default: i64,
    #[serde(default)]
    pub events: BTreeMap<String, i64>,
}

impl PowerLevelsContent {
    #[must_use]
    pub fn user_level(&self, user_id: &str) -> i64 {
        self.users
            .get(user_id)
            .copied()
            .unwrap_or(self.users_default)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalId {
    pub auth_provider: String,
    pub external_id: String,
}

/// User account as returned by `GET /_synapse/admin/v2/users[/<user_id>]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserAccount {
    pub name: String,
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub admin: bool,
    #[serde(default, deserialize_with = "flag")]
    pub deactivated: bool,
    #[serde(default, deserialize_with = "flag")]
    pub is_guest: bool,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub creation_ts: i64,
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
}

impl UserAccount {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.displayname
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.name)
    }

    #[must_use]
    pub fn has_auth_provider(&self, provider: &str) -> bool {
        self.external_ids.iter().any(|x| x.auth_provider == provider)
    }

    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.user_type.as_deref() == Some("bot")
    }
}

/// Synapse has reported these flags both as booleans and as 0/1 integers.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Null(()),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
        Flag::Null(()) => false,
    })
}

/// Pagination cursor; the users list sends a string, the rooms list a number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Cursor {
    Text(String),
    Number(u64),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserList {
    #[serde(default)]
    pub users: Vec<UserAccount>,
    #[serde(default)]
    pub next_token: Option<Cursor>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomList {
    #[serde(default)]
    pub rooms: Vec<RoomInfo>,
    #[serde(default)]
    pub next_batch: Option<Cursor>,
    #[serde(default)]
    pub total_rooms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginToken {
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinedRoom {
    pub room_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisplayName {
    #[serde(default)]
    pub displayname: Option<String>,
}
