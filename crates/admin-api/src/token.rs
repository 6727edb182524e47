use std::sync::Arc;

use tokio::sync::watch;

/// Bearer token shared by the API clients. Cloning yields a handle to the
/// same slot, so a token renewed elsewhere is used by the next request.
#[derive(Debug, Clone)]
pub struct AccessToken(Arc<watch::Sender<String>>);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::new(watch::Sender::new(token.into())))
    }

    #[must_use]
    pub fn current(&self) -> String {
        self.0.borrow().clone()
    }

    pub fn replace(&self, token: impl Into<String>) {
        self.0.send_replace(token.into());
    }
}

impl From<String> for AccessToken {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl From<&str> for AccessToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_see_a_replaced_token() {
        let token = AccessToken::new("syt_old");
        let shared = token.clone();
        token.replace("syt_new");
        assert_eq!(shared.current(), "syt_new");
    }
}
