//! Application state.

use trellis_core::hub::FanoutHub;
use trellis_core::notification::NotificationDispatcher;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: NotificationDispatcher,
    pub hub: FanoutHub,
}

impl AppState {
    pub fn new(dispatcher: NotificationDispatcher, hub: FanoutHub) -> Self {
        Self { dispatcher, hub }
    }
}
