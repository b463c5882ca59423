use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::messages::Message;
use crate::registry::FactCheckRegistry;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: String,
    pub topic: String,
}

/// Per-room state owned by the lifecycle manager. Messages stay in creation
/// order; mutation happens only under the manager's room-map write lock.
pub(crate) struct Room {
    pub info: RoomInfo,
    pub participant_count: usize,
    pub messages: Vec<Message>,
    pub registry: Arc<FactCheckRegistry>,
}

impl Room {
    pub fn new(info: RoomInfo) -> Self {
        Room {
            info,
            participant_count: 0,
            messages: Vec::new(),
            registry: Arc::new(FactCheckRegistry::new()),
        }
    }

    pub fn find_message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    pub fn contains_message(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }
}
