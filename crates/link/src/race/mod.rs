mod items;
mod state;

pub use items::{ItemEventBroadcaster, ItemStats, MAX_PENDING_ITEM_EVENTS};
pub use state::{RaceStateBroadcaster, RaceStateStats};
