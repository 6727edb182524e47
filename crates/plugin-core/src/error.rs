use admin_api::ApiError;

pub type CommandResult<T = ()> = Result<T, CommandError>;

const GENERIC_FAILURE: &str = "There was an error processing your command.";
const UNKNOWN_PROBLEM: &str = "unknown problem";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Auth,
    Upstream,
    Unknown,
}

/// Failure of a chat command.
///
/// Every variant except `Unknown` carries a message that is safe to post back
/// into the room. `Unknown` is logged and replaced with a generic reply.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{0}")]
    User(String),

    #[error("{0}")]
    Auth(String),

    #[error("{message}")]
    Upstream {
        message: String,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl CommandError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::User(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Wraps an upstream failure behind a message of our own choosing.
    pub fn upstream(message: impl Into<String>, source: ApiError) -> Self {
        Self::Upstream {
            message: message.into(),
            source,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::User(_) => ErrorKind::User,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Text that may be posted into the room.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::User(message) | Self::Auth(message) | Self::Upstream { message, .. } => {
                message.clone()
            }
            Self::Unknown(_) => GENERIC_FAILURE.to_owned(),
        }
    }

    /// Text for one line of a bulk report. A failure without any safe text
    /// reads "unknown problem" rather than the generic command reply.
    #[must_use]
    pub fn item_message(&self) -> String {
        match self {
            Self::Upstream { message, source } if message == GENERIC_FAILURE => {
                source.message().to_owned()
            }
            Self::Unknown(_) => UNKNOWN_PROBLEM.to_owned(),
            Self::User(_) | Self::Auth(_) | Self::Upstream { .. } => self.user_message(),
        }
    }

    /// Operator-facing detail for logs.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Upstream { message, source } => format!("{message}: {source}"),
            Self::Unknown(err) => format!("{err:#}"),
            Self::User(message) | Self::Auth(message) => message.clone(),
        }
    }
}

/// An API failure surfaces the server's own error text when it has one.
impl From<ApiError> for CommandError {
    fn from(source: ApiError) -> Self {
        let message = source
            .error
            .clone()
            .unwrap_or_else(|| GENERIC_FAILURE.to_owned());
        Self::Upstream { message, source }
    }
}

pub trait UpstreamContext<T> {
    /// Replaces the upstream error text with `message` while keeping the
    /// original error as the source.
    fn or_upstream(self, message: &str) -> CommandResult<T>;
}

impl<T> UpstreamContext<T> for Result<T, ApiError> {
    fn or_upstream(self, message: &str) -> CommandResult<T> {
        self.map_err(|e| CommandError::upstream(message, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_shows_server_text_when_present() {
        let api = ApiError::from_response(
            403,
            r#"{"errcode":"M_FORBIDDEN","error":"You are not invited to this room."}"#,
        );
        let err = CommandError::from(api);
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.user_message(), "You are not invited to this room.");
    }

    #[test]
    fn upstream_error_without_server_text_is_generic() {
        let err = CommandError::from(ApiError::new("connection reset"));
        assert_eq!(err.user_message(), GENERIC_FAILURE);
        assert!(err.detail().contains("connection reset"));
    }

    #[test]
    fn report_lines_name_an_unknown_problem() {
        let transport = CommandError::from(ApiError::new("connection reset"));
        assert_eq!(transport.item_message(), "unknown problem");
        let unknown = CommandError::from(anyhow::anyhow!("secret token abc123 rejected"));
        assert_eq!(unknown.item_message(), "unknown problem");
        let server = CommandError::from(ApiError::with_message("User is banned"));
        assert_eq!(server.item_message(), "User is banned");
        let context = Err::<(), _>(ApiError::new("timeout")).or_upstream("Unable to invite");
        assert_eq!(context.expect_err("error").item_message(), "Unable to invite");
    }

    #[test]
    fn unknown_errors_never_leak() {
        let err = CommandError::from(anyhow::anyhow!("secret token abc123 rejected"));
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(!err.user_message().contains("abc123"));
        assert!(err.detail().contains("abc123"));
    }

    #[test]
    fn explicit_context_replaces_server_text() {
        let result: Result<(), ApiError> = Err(ApiError::with_message("boom"));
        let err = result
            .or_upstream("Unable to delete the room. An error has occurred.")
            .expect_err("error");
        assert_eq!(
            err.user_message(),
            "Unable to delete the room. An error has occurred."
        );
        assert!(err.detail().ends_with("boom"));
    }
}
