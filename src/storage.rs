use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::messages::{FactCheck, Message};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Persistence capability for rooms. The in-memory implementation below
/// backs tests and single-process deployments; a durable backend plugs in
/// at process start through `Arc<dyn Storage>`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_message(&self, room_id: &str, message: &Message) -> Result<(), StorageError>;
    async fn load_messages(&self, room_id: &str) -> Result<Vec<Message>, StorageError>;
    async fn save_fact_check(
        &self,
        room_id: &str,
        fact_check: &FactCheck,
    ) -> Result<(), StorageError>;
    async fn load_fact_checks(&self, room_id: &str) -> Result<Vec<FactCheck>, StorageError>;
}

#[derive(Default)]
pub struct MemoryStorage {
    messages: RwLock<HashMap<String, Vec<Message>>>,
    fact_checks: RwLock<HashMap<String, Vec<FactCheck>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        MemoryStorage::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_message(&self, room_id: &str, message: &Message) -> Result<(), StorageError> {
        let mut rooms = self.messages.write().await;
        let messages = rooms.entry(room_id.to_string()).or_default();
        // Saving an already-known id rewrites it in place, keeping creation order.
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => messages.push(message.clone()),
        }
        Ok(())
    }

    async fn load_messages(&self, room_id: &str) -> Result<Vec<Message>, StorageError> {
        let rooms = self.messages.read().await;
        Ok(rooms.get(room_id).cloned().unwrap_or_default())
    }

    async fn save_fact_check(
        &self,
        room_id: &str,
        fact_check: &FactCheck,
    ) -> Result<(), StorageError> {
        let mut rooms = self.fact_checks.write().await;
        let checks = rooms.entry(room_id.to_string()).or_default();
        match checks.iter_mut().find(|f| f.id == fact_check.id) {
            Some(existing) => *existing = fact_check.clone(),
            None => checks.push(fact_check.clone()),
        }
        Ok(())
    }

    async fn load_fact_checks(&self, room_id: &str) -> Result<Vec<FactCheck>, StorageError> {
        let rooms = self.fact_checks.read().await;
        Ok(rooms.get(room_id).cloned().unwrap_or_default())
    }
}
