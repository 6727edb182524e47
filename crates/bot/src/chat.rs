use std::sync::Arc;

use admin_api::{AdminApi, ApiError};
use async_trait::async_trait;
use matrix_sdk::{
    Client, HttpError, Room, RoomMemberships,
    room::RoomMember,
    ruma::{
        Int, OwnedRoomId, OwnedServerName, OwnedUserId, RoomAliasId, RoomId, ServerName, UserId,
        api::client::error::{Error as ClientApiError, ErrorBody},
        events::{
            room::{member::MembershipState, message::RoomMessageEventContent},
            space::child::SpaceChildEventContent,
        },
    },
};
use plugin_core::Chat;
use plugin_core::chat::{DmRoom, Member, Membership, PowerLevels};
use tracing::{debug, info};

/// [`Chat`] backed by the bot's own Matrix session. Lookups the session
/// cannot answer (rooms the bot is not in, other users' profiles) go to the
/// admin API.
#[derive(Debug, Clone)]
pub struct MatrixChat {
    client: Client,
    admin: Arc<AdminApi>,
    own_user_id: OwnedUserId,
}

impl MatrixChat {
    pub fn new(client: Client, admin: Arc<AdminApi>, own_user_id: OwnedUserId) -> Self {
        Self {
            client,
            admin,
            own_user_id,
        }
    }

    fn joined_room(&self, room_id: &RoomId) -> Result<Room, ApiError> {
        self.client.get_room(room_id).ok_or_else(|| {
            ApiError::with_message(format!("The bot is not a member of the room {room_id}."))
        })
    }

    async fn send(&self, room_id: &RoomId, content: RoomMessageEventContent) -> Result<(), ApiError> {
        self.joined_room(room_id)?
            .send(content)
            .await
            .map_err(|e| sdk_error(&e))?;
        Ok(())
    }

    async fn set_space_child(
        &self,
        space_id: &RoomId,
        child_id: &RoomId,
        via: Vec<OwnedServerName>,
    ) -> Result<(), ApiError> {
        let child: OwnedRoomId = child_id.to_owned();
        self.joined_room(space_id)?
            .send_state_event_for_key(&child, SpaceChildEventContent::new(via))
            .await
            .map_err(|e| sdk_error(&e))?;
        Ok(())
    }
}

fn client_api_error(detail: String, source: Option<&ClientApiError>) -> ApiError {
    let mut error = ApiError::new(detail);
    if let Some(source) = source {
        error.status = Some(source.status_code.as_u16());
        if let ErrorBody::Standard { message, .. } = &source.body {
            error.error = Some(message.clone());
        }
    }
    error
}

fn sdk_error(err: &matrix_sdk::Error) -> ApiError {
    client_api_error(err.to_string(), err.as_client_api_error())
}

fn http_error(err: &HttpError) -> ApiError {
    client_api_error(err.to_string(), err.as_client_api_error())
}

const fn membership(state: &MembershipState) -> Membership {
    match state {
        MembershipState::Join => Membership::Join,
        MembershipState::Invite => Membership::Invite,
        MembershipState::Ban => Membership::Ban,
        MembershipState::Knock => Membership::Knock,
        MembershipState::Leave | _ => Membership::Leave,
    }
}

fn member(m: &RoomMember) -> Member {
    Member {
        user_id: m.user_id().to_owned(),
        display_name: m.display_name().map(ToOwned::to_owned),
        membership: membership(m.membership()),
    }
}

#[async_trait]
impl Chat for MatrixChat {
    fn own_user_id(&self) -> &UserId {
        &self.own_user_id
    }

    async fn send_text(&self, room_id: &RoomId, body: &str) -> Result<(), ApiError> {
        self.send(room_id, RoomMessageEventContent::text_plain(body))
            .await
    }

    async fn send_html(&self, room_id: &RoomId, html: &str) -> Result<(), ApiError> {
        self.send(room_id, RoomMessageEventContent::text_html(html, html))
            .await
    }

    async fn send_notice_html(
        &self,
        room_id: &RoomId,
        plain: &str,
        html: &str,
    ) -> Result<(), ApiError> {
        self.send(room_id, RoomMessageEventContent::notice_html(plain, html))
            .await
    }

    async fn resolve_alias(&self, alias: &RoomAliasId) -> Result<OwnedRoomId, ApiError> {
        let response = self
            .client
            .resolve_room_alias(alias)
            .await
            .map_err(|e| http_error(&e))?;
        Ok(response.room_id)
    }

    async fn room_name(&self, room_id: &RoomId) -> Result<Option<String>, ApiError> {
        if let Some(name) = self.client.get_room(room_id).and_then(|room| room.name()) {
            return Ok(Some(name));
        }
        let info = self.admin.room_info(room_id.as_str()).await?;
        Ok(info.map(|i| i.display_name().to_owned()))
    }

    async fn joined_members(&self, room_id: &RoomId) -> Result<Vec<Member>, ApiError> {
        let members = self
            .joined_room(room_id)?
            .members(RoomMemberships::JOIN)
            .await
            .map_err(|e| sdk_error(&e))?;
        Ok(members.iter().map(member).collect())
    }

    async fn member(&self, room_id: &RoomId, user_id: &UserId) -> Result<Option<Member>, ApiError> {
        let found = self
            .joined_room(room_id)?
            .get_member(user_id)
            .await
            .map_err(|e| sdk_error(&e))?;
        Ok(found.as_ref().map(member))
    }

    async fn power_levels(&self, room_id: &RoomId) -> Result<PowerLevels, ApiError> {
        let levels = self
            .joined_room(room_id)?
            .power_levels()
            .await
            .map_err(|e| sdk_error(&matrix_sdk::Error::from(e)))?;
        Ok(PowerLevels {
            users: levels
                .users
                .iter()
                .map(|(user, level)| (user.clone(), i64::from(*level)))
                .collect(),
            users_default: i64::from(levels.users_default),
            events: levels
                .events
                .iter()
                .map(|(kind, level)| (kind.to_string(), i64::from(*level)))
                .collect(),
            state_default: i64::from(levels.state_default),
        })
    }

    async fn set_power_level(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        level: i64,
    ) -> Result<(), ApiError> {
        let level = Int::new(level)
            .ok_or_else(|| ApiError::with_message(format!("Invalid power level {level}.")))?;
        self.joined_room(room_id)?
            .update_power_levels(vec![(user_id, level)])
            .await
            .map_err(|e| sdk_error(&e))?;
        Ok(())
    }

    async fn invite_user(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), ApiError> {
        self.joined_room(room_id)?
            .invite_user_by_id(user_id)
            .await
            .map_err(|e| sdk_error(&e))
    }

    async fn display_name(&self, user_id: &UserId) -> Result<Option<String>, ApiError> {
        self.admin.profile_display_name(user_id.as_str()).await
    }

    async fn add_space_child(
        &self,
        space_id: &RoomId,
        child_id: &RoomId,
        via: &str,
    ) -> Result<(), ApiError> {
        let server = ServerName::parse(via)
            .map_err(|e| ApiError::new(format!("invalid server name {via}: {e}")))?;
        self.set_space_child(space_id, child_id, vec![server]).await
    }

    async fn remove_space_child(
        &self,
        space_id: &RoomId,
        child_id: &RoomId,
    ) -> Result<(), ApiError> {
        self.set_space_child(space_id, child_id, Vec::new()).await
    }

    async fn ensure_dm_room(&self, user_id: &UserId) -> Result<DmRoom, ApiError> {
        if let Some(room) = self.client.get_dm_room(user_id) {
            let joined = room
                .get_member(user_id)
                .await
                .map_err(|e| sdk_error(&e))?
                .is_some_and(|m| *m.membership() == MembershipState::Join);
            debug!(room_id = %room.room_id(), user_id = %user_id, joined, "Found DM room");
            let room_id = room.room_id().to_owned();
            return Ok(if joined {
                DmRoom::Ready(room_id)
            } else {
                DmRoom::AwaitingJoin(room_id)
            });
        }
        let room = self
            .client
            .create_dm(user_id)
            .await
            .map_err(|e| sdk_error(&e))?;
        info!(room_id = %room.room_id(), user_id = %user_id, "Created encrypted DM room");
        Ok(DmRoom::AwaitingJoin(room.room_id().to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_states_map_one_to_one() {
        assert_eq!(membership(&MembershipState::Join), Membership::Join);
        assert_eq!(membership(&MembershipState::Invite), Membership::Invite);
        assert_eq!(membership(&MembershipState::Ban), Membership::Ban);
        assert_eq!(membership(&MembershipState::Leave), Membership::Leave);
    }

    #[test]
    fn transport_errors_carry_no_user_text() {
        let err = client_api_error("connection refused".to_owned(), None);
        assert_eq!(err.error, None);
        assert_eq!(err.status, None);
        assert_eq!(err.detail, "connection refused");
    }
}
