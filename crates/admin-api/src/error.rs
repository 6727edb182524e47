use serde::Deserialize;

const UNKNOWN_PROBLEM: &str = "unknown problem";

/// Failure reported by the homeserver or one of its companion services.
///
/// `error` holds the human readable text the server put in its error body
/// (the Matrix `error` field), which is safe to show back in chat. `detail`
/// is the full operator-facing description and only goes to the logs.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{detail}")]
pub struct ApiError {
    pub status: Option<u16>,
    pub errcode: Option<String>,
    pub error: Option<String>,
    pub detail: String,
}

#[derive(Debug, Deserialize)]
struct MatrixErrorBody {
    #[serde(default)]
    errcode: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ApiError {
    #[must_use]
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            status: None,
            errcode: None,
            error: None,
            detail: detail.into(),
        }
    }

    /// An error whose message is meant to be shown to the user verbatim.
    #[must_use]
    pub fn with_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: None,
            errcode: None,
            error: Some(message.clone()),
            detail: message,
        }
    }

    #[must_use]
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<MatrixErrorBody>(body).ok();
        let (errcode, error) = parsed.map_or((None, None), |b| (b.errcode, b.error));
        let detail = match (&errcode, &error) {
            (Some(code), Some(text)) => format!("HTTP {status} ({code}): {text}"),
            (None, Some(text)) => format!("HTTP {status}: {text}"),
            (Some(code), None) => format!("HTTP {status} ({code})"),
            (None, None) => format!("HTTP {status}: {}", body.trim()),
        };
        Self {
            status: Some(status),
            errcode,
            error,
            detail,
        }
    }

    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        Self::new(format!("request failed: {err}"))
    }

    /// Server-provided message, or a generic one when the server gave none.
    #[must_use]
    pub fn message(&self) -> &str {
        self.error.as_deref().unwrap_or(UNKNOWN_PROBLEM)
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status, Some(404))
    }

    #[must_use]
    pub fn has_errcode(&self, code: &str) -> bool {
        self.errcode.as_deref() == Some(code)
    }
}
