use core::fmt;
use std::collections::BTreeMap;

use admin_api::ApiError;
use async_trait::async_trait;
use matrix_sdk::ruma::{OwnedRoomId, OwnedUserId, RoomAliasId, RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
    Knock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: OwnedUserId,
    pub display_name: Option<String>,
    pub membership: Membership,
}

/// Power levels of a room, as far as commands care about them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerLevels {
    pub users: BTreeMap<OwnedUserId, i64>,
    pub users_default: i64,
    pub events: BTreeMap<String, i64>,
    pub state_default: i64,
}

impl Default for PowerLevels {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            users_default: 0,
            events: BTreeMap::new(),
            state_default: 50,
        }
    }
}

impl PowerLevels {
    #[must_use]
    pub fn user_level(&self, user_id: &UserId) -> i64 {
        self.users.get(user_id).copied().unwrap_or(self.users_default)
    }

    /// Level needed to send the given state event type.
    #[must_use]
    pub fn for_state_event(&self, kind: &str) -> i64 {
        self.events.get(kind).copied().unwrap_or(self.state_default)
    }
}

/// Outcome of looking for a direct-message room with a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmRoom {
    /// Both parties are joined and encryption is on.
    Ready(OwnedRoomId),
    /// The room was just created; the user has not joined yet.
    AwaitingJoin(OwnedRoomId),
}

/// The chat transport as seen by commands.
#[async_trait]
pub trait Chat: Send + Sync + fmt::Debug {
    fn own_user_id(&self) -> &UserId;

    async fn send_text(&self, room_id: &RoomId, body: &str) -> Result<(), ApiError>;

    async fn send_html(&self, room_id: &RoomId, html: &str) -> Result<(), ApiError>;

    async fn send_notice_html(&self, room_id: &RoomId, plain: &str, html: &str)
    -> Result<(), ApiError>;

    async fn resolve_alias(&self, alias: &RoomAliasId) -> Result<OwnedRoomId, ApiError>;

    async fn room_name(&self, room_id: &RoomId) -> Result<Option<String>, ApiError>;

    async fn joined_members(&self, room_id: &RoomId) -> Result<Vec<Member>, ApiError>;

    async fn member(&self, room_id: &RoomId, user_id: &UserId) -> Result<Option<Member>, ApiError>;

    async fn power_levels(&self, room_id: &RoomId) -> Result<PowerLevels, ApiError>;

    async fn set_power_level(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        level: i64,
    ) -> Result<(), ApiError>;

    async fn invite_user(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), ApiError>;

    async fn display_name(&self, user_id: &UserId) -> Result<Option<String>, ApiError>;

    async fn add_space_child(
        &self,
        space_id: &RoomId,
        child_id: &RoomId,
        via: &str,
    ) -> Result<(), ApiError>;

    async fn remove_space_child(&self, space_id: &RoomId, child_id: &RoomId)
    -> Result<(), ApiError>;

    /// Finds an encrypted DM with `user_id`, creating and inviting when none
    /// exists.
    async fn ensure_dm_room(&self, user_id: &UserId) -> Result<DmRoom, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_sdk::ruma::{owned_user_id, user_id};

    #[test]
    fn user_level_falls_back_to_default() {
        let mut levels = PowerLevels {
            users_default: 10,
            ..PowerLevels::default()
        };
        levels.users.insert(owned_user_id!("@mod:example.org"), 50);
        assert_eq!(levels.user_level(user_id!("@mod:example.org")), 50);
        assert_eq!(levels.user_level(user_id!("@guest:example.org")), 10);
    }

    #[test]
    fn state_event_level_falls_back_to_state_default() {
        let mut levels = PowerLevels::default();
        levels.events.insert("m.room.power_levels".to_owned(), 100);
        assert_eq!(levels.for_state_event("m.room.power_levels"), 100);
        assert_eq!(levels.for_state_event("m.space.child"), 50);
    }
}
