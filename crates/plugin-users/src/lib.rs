//! User account commands.

mod account;
mod deactivate_user;
mod new_joiners;
mod rotate_token;
mod welcome;

use std::sync::Arc;

use plugin_core::factory::PluginFactory;
use plugin_core::{Plugin, Settings};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub use account::{ACCOUNT_COMMAND, Account};
pub use deactivate_user::{DEACTIVATE_USER_COMMAND, DeactivateUser};
pub use new_joiners::{LIST_NEW_JOINERS_COMMAND, ListNewJoiners};
pub use rotate_token::{ROTATE_TOKEN_COMMAND, RotateToken};
pub use welcome::{WELCOME_MESSAGE_COMMAND, WelcomeMessage};

#[derive(Debug)]
pub struct UsersPlugin;

impl PluginFactory for UsersPlugin {
    fn build(&self, settings: &Settings) -> Vec<Arc<dyn Plugin>> {
        vec![
            Arc::new(DeactivateUser::new(settings.confirmation_ttl())),
            Arc::new(RotateToken),
            Arc::new(ListNewJoiners),
            Arc::new(Account),
            Arc::new(WelcomeMessage),
        ]
    }
}

/// RFC 3339 rendering of a millisecond Unix timestamp.
fn iso_timestamp(millis: i64) -> String {
    let nanos = i128::from(millis) * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| millis.to_string())
}
