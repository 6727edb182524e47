use std::sync::Arc;

use crate::{Plugin, Settings};

/// Implemented by each command crate to hand its commands to the bot.
pub trait PluginFactory {
    /// Builds the command instances. Commands holding confirmation state take
    /// their TTL from `settings`.
    #[must_use]
    fn build(&self, settings: &Settings) -> Vec<Arc<dyn Plugin>>;
}
