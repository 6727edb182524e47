//! Typed client for the Synapse admin API, plus the handful of client-server
//! calls the bot makes on behalf of other accounts.

mod auth_service;
mod error;
mod token;
mod types;

pub use auth_service::{AuthService, AuthUser, CreatedSession, OAuth2Session, SessionState};
pub use error::ApiError;
pub use token::AccessToken;
pub use types::{
    Cursor, DisplayName, ExternalId, JoinedRoom, LoginToken, PowerLevelsContent, RoomDeletion,
    RoomInfo, RoomList, RoomState, StateEvent, UserAccount, UserList,
};

use core::future::Future;

use reqwest::{Method, RequestBuilder, Url};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::json;
use tracing::debug;

const PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone)]
pub struct AdminApi {
    http: reqwest::Client,
    homeserver: Url,
    access_token: AccessToken,
}

/// One page of a paginated listing.
#[derive(Debug)]
struct Page<T> {
    items: Vec<T>,
    next: Option<Cursor>,
    total: u64,
}

impl AdminApi {
    pub fn new(homeserver: &str, access_token: impl Into<AccessToken>) -> Result<Self, ApiError> {
        let homeserver = Url::parse(homeserver)
            .map_err(|e| ApiError::new(format!("invalid homeserver URL {homeserver}: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            homeserver,
            access_token: access_token.into(),
        })
    }

    pub async fn room_info(&self, room_id: &str) -> Result<Option<RoomInfo>, ApiError> {
        let request = self.admin(Method::GET, &["v1", "rooms", room_id])?;
        found(send_json(request).await)
    }

    /// Deletes a room, blocking it from being rejoined and purging its history.
    pub async fn delete_room(&self, room_id: &str) -> Result<RoomDeletion, ApiError> {
        let request = self
            .admin(Method::DELETE, &["v1", "rooms", room_id])?
            .json(&json!({ "block": true, "purge": true }));
        send_json(request).await
    }

    pub async fn room_state(&self, room_id: &str) -> Result<RoomState, ApiError> {
        let request = self.admin(Method::GET, &["v1", "rooms", room_id, "state"])?;
        send_json(request).await
    }

    pub async fn power_levels(&self, room_id: &str) -> Result<Option<PowerLevelsContent>, ApiError> {
        let Some(state) = found(self.room_state(room_id).await)? else {
            return Ok(None);
        };
        let Some(event) = state.find("m.room.power_levels", "") else {
            return Ok(None);
        };
        serde_json::from_value(event.content.clone())
            .map(Some)
            .map_err(|e| ApiError::new(format!("malformed power levels in {room_id}: {e}")))
    }

    pub async fn user_account(&self, user_id: &str) -> Result<Option<UserAccount>, ApiError> {
        let request = self.admin(Method::GET, &["v2", "users", user_id])?;
        found(send_json(request).await)
    }

    pub async fn activate_user(&self, user_id: &str, password: &str) -> Result<(), ApiError> {
        self.modify_user(user_id, &json!({ "deactivated": false, "password": password }))
            .await
    }

    pub async fn deactivate_user(&self, user_id: &str) -> Result<(), ApiError> {
        self.modify_user(user_id, &json!({ "deactivated": true }))
            .await
    }

    pub async fn mark_user_as_bot(&self, user_id: &str) -> Result<(), ApiError> {
        self.modify_user(user_id, &json!({ "user_type": "bot" }))
            .await
    }

    async fn modify_user(&self, user_id: &str, body: &serde_json::Value) -> Result<(), ApiError> {
        let request = self
            .admin(Method::PUT, &["v2", "users", user_id])?
            .json(body);
        let _: IgnoredAny = send_json(request).await?;
        Ok(())
    }

    /// Every non-guest account on the server.
    pub async fn user_accounts(&self) -> Result<Vec<UserAccount>, ApiError> {
        collect_pages(|from| self.users_page(from)).await
    }

    async fn users_page(&self, from: Option<Cursor>) -> Result<Page<UserAccount>, ApiError> {
        let from = from.map_or_else(|| "0".to_owned(), |c| c.to_string());
        let request = self.admin(Method::GET, &["v2", "users"])?.query(&[
            ("limit", PAGE_SIZE.to_string()),
            ("from", from),
            ("guests", "false".to_owned()),
        ]);
        let list: UserList = send_json(request).await?;
        Ok(Page {
            items: list.users,
            next: list.next_token,
            total: list.total,
        })
    }

    /// The `limit` most recently created non-guest accounts, newest first.
    pub async fn newest_user_accounts(&self, limit: u32) -> Result<Vec<UserAccount>, ApiError> {
        let request = self.admin(Method::GET, &["v2", "users"])?.query(&[
            ("limit", limit.to_string()),
            ("guests", "false".to_owned()),
            ("order_by", "creation_ts".to_owned()),
            ("dir", "b".to_owned()),
        ]);
        let list: UserList = send_json(request).await?;
        Ok(list.users)
    }

    /// Every room known to the server.
    pub async fn rooms(&self) -> Result<Vec<RoomInfo>, ApiError> {
        collect_pages(|from| self.rooms_page(from)).await
    }

    async fn rooms_page(&self, from: Option<Cursor>) -> Result<Page<RoomInfo>, ApiError> {
        let from = from.map_or_else(|| "0".to_owned(), |c| c.to_string());
        let request = self
            .admin(Method::GET, &["v1", "rooms"])?
            .query(&[("limit", PAGE_SIZE.to_string()), ("from", from)]);
        let list: RoomList = send_json(request).await?;
        Ok(Page {
            items: list.rooms,
            next: list.next_batch,
            total: list.total_rooms,
        })
    }

    /// Issues an access token for `user_id` without knowing their password.
    pub async fn login_user(
        &self,
        user_id: &str,
        valid_until_ms: Option<u64>,
    ) -> Result<LoginToken, ApiError> {
        let body = valid_until_ms.map_or_else(|| json!({}), |ms| json!({ "valid_until_ms": ms }));
        let request = self
            .admin(Method::POST, &["v1", "users", user_id, "login"])?
            .json(&body);
        send_json(request).await
    }

    /// Joins a room using someone else's access token.
    pub async fn join_room_as(
        &self,
        access_token: &str,
        room_id_or_alias: &str,
    ) -> Result<JoinedRoom, ApiError> {
        let url = self.url(&["_matrix", "client", "v3", "join", room_id_or_alias])?;
        let request = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(&json!({}));
        send_json(request).await
    }

    /// Invalidates `access_token`.
    pub async fn logout(&self, access_token: &str) -> Result<(), ApiError> {
        let url = self.url(&["_matrix", "client", "v3", "logout"])?;
        let request = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(&json!({}));
        let _: IgnoredAny = send_json(request).await?;
        Ok(())
    }

    /// Profile display name of any user, local or remote.
    pub async fn profile_display_name(&self, user_id: &str) -> Result<Option<String>, ApiError> {
        let url = self.url(&["_matrix", "client", "v3", "profile", user_id, "displayname"])?;
        let request = self.http.get(url).bearer_auth(self.access_token.current());
        let profile: Option<DisplayName> = found(send_json(request).await)?;
        Ok(profile.and_then(|p| p.displayname).filter(|n| !n.is_empty()))
    }

    fn admin(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
        let mut path = vec!["_synapse", "admin"];
        path.extend_from_slice(segments);
        let url = self.url(&path)?;
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(self.access_token.current()))
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.homeserver.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::new(format!("{} cannot be a base URL", self.homeserver)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

pub(crate) async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
    let response = request.send().await.map_err(|e| ApiError::transport(&e))?;
    let status = response.status();
    let url = response.url().path().to_owned();
    let body = response.text().await.map_err(|e| ApiError::transport(&e))?;
    if !status.is_success() {
        debug!(status = status.as_u16(), path = %url, "Homeserver request failed");
        return Err(ApiError::from_response(status.as_u16(), &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| ApiError::new(format!("unexpected response from {url}: {e}")))
}

/// Maps a 404 to `Ok(None)`.
fn found<T>(result: Result<T, ApiError>) -> Result<Option<T>, ApiError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Follows continuation tokens until the reported total is reached or the
/// server stops handing out tokens.
async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>, ApiError>
where
    F: FnMut(Option<Cursor>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ApiError>>,
{
    let mut items = Vec::new();
    let mut cursor = None;
    loop {
        let page = fetch(cursor.take()).await?;
        let received = page.items.len();
        items.extend(page.items);
        match page.next {
            Some(next) if received > 0 && (items.len() as u64) < page.total => {
                cursor = Some(next);
            }
            _ => break,
        }
    }
    Ok(items)
}
