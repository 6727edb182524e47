//! Room administration commands: deletion, promotion, spaces and listings.

mod delete_room;
mod listing;
mod promote;
mod space;

use std::sync::Arc;

use plugin_core::factory::PluginFactory;
use plugin_core::{Plugin, Settings};

pub use delete_room::{DELETE_ROOM_COMMAND, DeleteRoom};
pub use listing::{
    LIST_ALL_ROOMS_COMMAND, LIST_ROOMS_COMMAND, LIST_SPACES_COMMAND, ListAllRooms, ListRooms,
    ListSpaces,
};
pub use promote::{POWER_LEVEL_ALIASES, PROMOTE_COMMAND, Promote};
pub use space::{SPACE_COMMAND, Space};

#[derive(Debug)]
pub struct RoomsPlugin;

impl PluginFactory for RoomsPlugin {
    fn build(&self, settings: &Settings) -> Vec<Arc<dyn Plugin>> {
        vec![
            Arc::new(DeleteRoom::new(settings.confirmation_ttl())),
            Arc::new(Promote),
            Arc::new(Space),
            Arc::new(ListRooms),
            Arc::new(ListAllRooms),
            Arc::new(ListSpaces),
        ]
    }
}
