use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::{AccessToken, ApiError, send_json};

const ADD_USER: &str = r"
mutation AddUser($input: AddUserInput!) {
  addUser(input: $input) {
    user { id username }
  }
}";

const CREATE_SESSION: &str = r"
mutation CreateOauth2Session($input: CreateOAuth2SessionInput!) {
  createOauth2Session(input: $input) {
    accessToken
    refreshToken
    oauth2Session { id scope state }
  }
}";

const LIST_SESSIONS: &str = r"
query GetUserOAuth2Sessions($userId: ID!, $endCursor: String) {
  user(id: $userId) {
    id
    oauth2Sessions(first: 100, after: $endCursor) {
      nodes { id state scope lastActiveAt createdAt finishedAt }
      pageInfo { endCursor hasNextPage }
    }
  }
}";

const END_SESSION: &str = r"
mutation EndOAuth2Session($input: EndOAuth2SessionInput!) {
  endOauth2Session(input: $input) {
    oauth2Session { id state }
    status
  }
}";

/// Client for the authentication service's GraphQL admin endpoint.
#[derive(Debug, Clone)]
pub struct AuthService {
    http: reqwest::Client,
    endpoint: Url,
    access_token: AccessToken,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Active,
    Finished,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Session {
    pub id: String,
    pub state: SessionState,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub last_active_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddUserData {
    add_user: AddUserPayload,
}

#[derive(Debug, Deserialize)]
struct AddUserPayload {
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionData {
    create_oauth2_session: CreateSessionPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionPayload {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    oauth2_session: SessionRef,
}

#[derive(Debug, Deserialize)]
struct SessionRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListSessionsData {
    user: Option<SessionsOwner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionsOwner {
    oauth2_sessions: SessionConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionConnection {
    nodes: Vec<OAuth2Session>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    end_cursor: Option<String>,
    has_next_page: bool,
}

impl AuthService {
    pub fn new(endpoint: &str, access_token: impl Into<AccessToken>) -> Result<Self, ApiError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ApiError::new(format!("invalid GraphQL endpoint {endpoint}: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            access_token: access_token.into(),
        })
    }

    /// Creates the account if it does not exist yet; returns it either way.
    pub async fn add_user(&self, username: &str) -> Result<AuthUser, ApiError> {
        let data: AddUserData = self
            .execute(ADD_USER, json!({ "input": { "username": username } }))
            .await?;
        Ok(data.add_user.user)
    }

    pub async fn create_oauth2_session(
        &self,
        user_id: &str,
        scope: &str,
        permanent: bool,
    ) -> Result<CreatedSession, ApiError> {
        let variables = json!({
            "input": { "scope": scope, "userId": user_id, "permanent": permanent }
        });
        let data: CreateSessionData = self.execute(CREATE_SESSION, variables).await?;
        let payload = data.create_oauth2_session;
        Ok(CreatedSession {
            session_id: payload.oauth2_session.id,
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
        })
    }

    /// All sessions of a user, following the connection's cursor.
    pub async fn oauth2_sessions(&self, user_id: &str) -> Result<Vec<OAuth2Session>, ApiError> {
        let mut sessions = Vec::new();
        let mut end_cursor: Option<String> = None;
        loop {
            let variables = json!({ "userId": user_id, "endCursor": end_cursor });
            let data: ListSessionsData = self.execute(LIST_SESSIONS, variables).await?;
            let Some(owner) = data.user else {
                return Err(ApiError::with_message(format!("User {user_id} not found")));
            };
            let connection = owner.oauth2_sessions;
            sessions.extend(connection.nodes);
            match connection.page_info.end_cursor {
                Some(cursor) if connection.page_info.has_next_page => end_cursor = Some(cursor),
                _ => break,
            }
        }
        Ok(sessions)
    }

    pub async fn end_oauth2_session(&self, session_id: &str) -> Result<(), ApiError> {
        let _: Value = self
            .execute(END_SESSION, json!({ "input": { "oauth2SessionId": session_id } }))
            .await?;
        Ok(())
    }

    async fn execute<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, ApiError> {
        let request = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(self.access_token.current())
            .json(&json!({ "query": query, "variables": variables }));
        let response: GraphqlResponse<T> = send_json(request).await?;
        if let Some(first) = response.errors.first() {
            let all = response
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ApiError {
                status: None,
                errcode: None,
                error: Some(first.message.clone()),
                detail: format!("GraphQL error: {all}"),
            });
        }
        response
            .data
            .ok_or_else(|| ApiError::with_message("Empty response"))
    }
}
