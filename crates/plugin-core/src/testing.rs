//! In-memory chat transport and context builder for command tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use admin_api::{AdminApi, ApiError, AuthService};
use async_trait::async_trait;
use matrix_sdk::ruma::{
    OwnedRoomId, OwnedUserId, RoomAliasId, RoomId, UserId, owned_room_id, owned_user_id,
};

use crate::chat::{Chat, DmRoom, Member, Membership, PowerLevels};
use crate::settings::{Pacing, Settings};
use crate::{PluginContext, PluginRegistry};

/// A message posted through [`FakeChat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub room_id: OwnedRoomId,
    pub body: String,
    pub html: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    sent: Vec<Sent>,
    aliases: HashMap<String, OwnedRoomId>,
    room_names: HashMap<OwnedRoomId, String>,
    members: HashMap<OwnedRoomId, Vec<Member>>,
    power_levels: HashMap<OwnedRoomId, PowerLevels>,
    display_names: HashMap<OwnedUserId, String>,
    invite_failures: HashMap<OwnedUserId, String>,
    invites: Vec<(OwnedRoomId, OwnedUserId)>,
    space_children: Vec<(OwnedRoomId, OwnedRoomId)>,
    dm_rooms: HashMap<OwnedUserId, DmRoom>,
}

/// Records everything commands send and answers lookups from canned data.
#[derive(Debug)]
pub struct FakeChat {
    own_user_id: OwnedUserId,
    state: Mutex<FakeState>,
}

impl Default for FakeChat {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChat {
    #[must_use]
    pub fn new() -> Self {
        Self {
            own_user_id: owned_user_id!("@bot:example.org"),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn with_alias(self, alias: &str, room_id: &RoomId) -> Self {
        self.state().aliases.insert(alias.to_owned(), room_id.to_owned());
        self
    }

    #[must_use]
    pub fn with_room(self, room_id: &RoomId, name: &str) -> Self {
        self.state().room_names.insert(room_id.to_owned(), name.to_owned());
        self
    }

    #[must_use]
    pub fn with_member(self, room_id: &RoomId, user_id: &UserId, membership: Membership) -> Self {
        let display_name = self.state().display_names.get(user_id).cloned();
        self.state()
            .members
            .entry(room_id.to_owned())
            .or_default()
            .push(Member {
                user_id: user_id.to_owned(),
                display_name,
                membership,
            });
        self
    }

    #[must_use]
    pub fn with_display_name(self, user_id: &UserId, name: &str) -> Self {
        self.state().display_names.insert(user_id.to_owned(), name.to_owned());
        self
    }

    #[must_use]
    pub fn with_power_level(self, room_id: &RoomId, user_id: &UserId, level: i64) -> Self {
        self.set_level(room_id, user_id, level);
        self
    }

    #[must_use]
    pub fn with_event_level(self, room_id: &RoomId, kind: &str, level: i64) -> Self {
        self.state()
            .power_levels
            .entry(room_id.to_owned())
            .or_default()
            .events
            .insert(kind.to_owned(), level);
        self
    }

    /// Makes invitations of `user_id` fail with `message`.
    #[must_use]
    pub fn fail_invite(self, user_id: &UserId, message: &str) -> Self {
        self.state()
            .invite_failures
            .insert(user_id.to_owned(), message.to_owned());
        self
    }

    #[must_use]
    pub fn with_dm_room(self, user_id: &UserId, room: DmRoom) -> Self {
        self.state().dm_rooms.insert(user_id.to_owned(), room);
        self
    }

    fn set_level(&self, room_id: &RoomId, user_id: &UserId, level: i64) {
        self.state()
            .power_levels
            .entry(room_id.to_owned())
            .or_default()
            .users
            .insert(user_id.to_owned(), level);
    }

    #[must_use]
    pub fn sent(&self) -> Vec<Sent> {
        self.state().sent.clone()
    }

    /// Bodies of every message sent, in order.
    #[must_use]
    pub fn bodies(&self) -> Vec<String> {
        self.state().sent.iter().map(|s| s.body.clone()).collect()
    }

    #[must_use]
    pub fn last_body(&self) -> Option<String> {
        self.state().sent.last().map(|s| s.body.clone())
    }

    #[must_use]
    pub fn invites(&self) -> Vec<(OwnedRoomId, OwnedUserId)> {
        self.state().invites.clone()
    }

    #[must_use]
    pub fn space_children(&self) -> Vec<(OwnedRoomId, OwnedRoomId)> {
        self.state().space_children.clone()
    }

    fn record(&self, room_id: &RoomId, body: &str, html: bool) {
        self.state().sent.push(Sent {
            room_id: room_id.to_owned(),
            body: body.to_owned(),
            html,
        });
    }
}

#[async_trait]
impl Chat for FakeChat {
    fn own_user_id(&self) -> &UserId {
        &self.own_user_id
    }

    async fn send_text(&self, room_id: &RoomId, body: &str) -> Result<(), ApiError> {
        self.record(room_id, body, false);
        Ok(())
    }

    async fn send_html(&self, room_id: &RoomId, html: &str) -> Result<(), ApiError> {
        self.record(room_id, html, true);
        Ok(())
    }

    async fn send_notice_html(
        &self,
        room_id: &RoomId,
        _plain: &str,
        html: &str,
    ) -> Result<(), ApiError> {
        self.record(room_id, html, true);
        Ok(())
    }

    async fn resolve_alias(&self, alias: &RoomAliasId) -> Result<OwnedRoomId, ApiError> {
        self.state()
            .aliases
            .get(alias.as_str())
            .cloned()
            .ok_or_else(|| ApiError::from_response(404, r#"{"errcode":"M_NOT_FOUND","error":"Room alias not found."}"#))
    }

    async fn room_name(&self, room_id: &RoomId) -> Result<Option<String>, ApiError> {
        Ok(self.state().room_names.get(room_id).cloned())
    }

    async fn joined_members(&self, room_id: &RoomId) -> Result<Vec<Member>, ApiError> {
        Ok(self
            .state()
            .members
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| m.membership == Membership::Join)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn member(&self, room_id: &RoomId, user_id: &UserId) -> Result<Option<Member>, ApiError> {
        Ok(self
            .state()
            .members
            .get(room_id)
            .and_then(|members| members.iter().find(|m| m.user_id.as_str() == user_id.as_str()).cloned()))
    }

    async fn power_levels(&self, room_id: &RoomId) -> Result<PowerLevels, ApiError> {
        Ok(self
            .state()
            .power_levels
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_power_level(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        level: i64,
    ) -> Result<(), ApiError> {
        self.set_level(room_id, user_id, level);
        Ok(())
    }

    async fn invite_user(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), ApiError> {
        let mut state = self.state();
        if let Some(message) = state.invite_failures.get(user_id) {
            return Err(ApiError::with_message(message.clone()));
        }
        let already_joined = state.members.get(room_id).is_some_and(|members| {
            members
                .iter()
                .any(|m| m.user_id.as_str() == user_id.as_str() && m.membership == Membership::Join)
        });
        if already_joined {
            return Err(ApiError::with_message(format!(
                "{user_id} is already in the room."
            )));
        }
        state.invites.push((room_id.to_owned(), user_id.to_owned()));
        Ok(())
    }

    async fn display_name(&self, user_id: &UserId) -> Result<Option<String>, ApiError> {
        Ok(self.state().display_names.get(user_id).cloned())
    }

    async fn add_space_child(
        &self,
        space_id: &RoomId,
        child_id: &RoomId,
        _via: &str,
    ) -> Result<(), ApiError> {
        self.state()
            .space_children
            .push((space_id.to_owned(), child_id.to_owned()));
        Ok(())
    }

    async fn remove_space_child(
        &self,
        space_id: &RoomId,
        child_id: &RoomId,
    ) -> Result<(), ApiError> {
        self.state()
            .space_children
            .retain(|(s, c)| !(s.as_str() == space_id.as_str() && c.as_str() == child_id.as_str()));
        Ok(())
    }

    async fn ensure_dm_room(&self, user_id: &UserId) -> Result<DmRoom, ApiError> {
        Ok(self
            .state()
            .dm_rooms
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| DmRoom::AwaitingJoin(owned_room_id!("!dm:example.org"))))
    }
}

/// Command room used by [`TestContext`].
#[must_use]
pub fn command_room() -> OwnedRoomId {
    owned_room_id!("!commands:example.org")
}

/// A plugin context wired to a [`FakeChat`] and an admin API at `admin_url`.
#[derive(Debug)]
pub struct TestContext {
    pub ctx: PluginContext,
    pub chat: Arc<FakeChat>,
}

impl TestContext {
    #[must_use]
    pub fn builder(admin_url: &str) -> TestContextBuilder {
        TestContextBuilder {
            admin_url: admin_url.to_owned(),
            auth_service_url: None,
            chat: FakeChat::new(),
            settings: Settings {
                server_domain: "example.org".to_owned(),
                pacing: Pacing::none(),
                ..Settings::default()
            },
            sender: owned_user_id!("@admin:example.org"),
            sender_level: 100,
        }
    }
}

#[derive(Debug)]
pub struct TestContextBuilder {
    admin_url: String,
    auth_service_url: Option<String>,
    chat: FakeChat,
    settings: Settings,
    sender: OwnedUserId,
    sender_level: i64,
}

impl TestContextBuilder {
    #[must_use]
    pub fn chat(mut self, chat: FakeChat) -> Self {
        self.chat = chat;
        self
    }

    #[must_use]
    pub fn settings(mut self, edit: impl FnOnce(&mut Settings)) -> Self {
        edit(&mut self.settings);
        self
    }

    #[must_use]
    pub fn sender(mut self, sender: &UserId) -> Self {
        self.sender = sender.to_owned();
        self
    }

    /// Sender's power level in the command room.
    #[must_use]
    pub const fn sender_level(mut self, level: i64) -> Self {
        self.sender_level = level;
        self
    }

    #[must_use]
    pub fn auth_service(mut self, url: &str) -> Self {
        self.auth_service_url = Some(url.to_owned());
        self
    }

    /// # Panics
    ///
    /// Panics when a service URL does not parse.
    #[must_use]
    pub fn build(self) -> TestContext {
        let room_id = command_room();
        let chat = Arc::new(
            self.chat
                .with_power_level(&room_id, &self.sender, self.sender_level),
        );
        let admin = AdminApi::new(&self.admin_url, "admin-token").expect("admin API URL");
        let auth_service = self.auth_service_url.map(|url| {
            Arc::new(AuthService::new(&url, "admin-token").expect("auth service URL"))
        });
        let chat_dyn: Arc<dyn Chat> = Arc::<FakeChat>::clone(&chat);
        let ctx = PluginContext {
            chat: chat_dyn,
            admin: Arc::new(admin),
            auth_service,
            settings: Arc::new(self.settings),
            registry: Arc::new(PluginRegistry::new()),
            room_id,
            sender: self.sender,
        };
        TestContext { ctx, chat }
    }
}

/// Splits a command line the way the dispatcher does.
#[must_use]
pub fn args(line: &str) -> Vec<String> {
    line.split_whitespace().map(ToOwned::to_owned).collect()
}
