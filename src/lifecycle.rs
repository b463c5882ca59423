use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::analysis::{AnalysisClient, Analyzed, FactCheckResult};
use crate::messages::{FactCheck, Message, MessageStatus, ModerationResult, RoomEvent};
use crate::room::{Room, RoomInfo};
use crate::storage::{Storage, StorageError};

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("unknown room: {0}")]
    UnknownRoom(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

type Rooms = Arc<RwLock<HashMap<String, Room>>>;

/// Owner of every room's canonical state and the only mutator of
/// `Message.status`.
///
/// `submit` publishes the creation event and returns before any analysis
/// runs; moderation and fact-checking complete on background tasks and feed
/// their results back through the idempotent transition below, so a message
/// is visible to observers the instant it exists and always leaves `pending`
/// eventually.
#[derive(Clone)]
pub struct RoomManager {
    rooms: Rooms,
    analysis: Arc<AnalysisClient>,
    storage: Arc<dyn Storage>,
    events: broadcast::Sender<RoomEvent>,
}

impl RoomManager {
    #[must_use]
    pub fn new(analysis: Arc<AnalysisClient>, storage: Arc<dyn Storage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        RoomManager {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            analysis,
            storage,
            events,
        }
    }

    /// Locally-originated events: `MessageCreated`, `MessageStatusChanged`,
    /// `FactCheckAdded`. Externally-ingested events are applied to state but
    /// not re-published here, so pumping this bus into the dispatch channel
    /// cannot echo.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    pub async fn create_room(&self, topic: &str) -> RoomInfo {
        let info = RoomInfo {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
        };
        let mut rooms = self.rooms.write().await;
        rooms.insert(info.id.clone(), Room::new(info.clone()));
        info
    }

    /// Registers a room that exists elsewhere (or existed before a restart)
    /// and loads its history from storage.
    pub async fn restore_room(&self, info: RoomInfo) -> Result<(), LifecycleError> {
        let room_id = info.id.clone();
        {
            let mut rooms = self.rooms.write().await;
            rooms.entry(room_id.clone()).or_insert_with(|| Room::new(info));
        }
        self.resync_room(&room_id).await
    }

    /// Drops the room's state. Late analysis callbacks for its messages are
    /// treated as stale and ignored.
    pub async fn close_room(&self, room_id: &str) {
        let mut rooms = self.rooms.write().await;
        if rooms.remove(room_id).is_none() {
            debug!("close_room: {room_id} was not open");
        }
    }

    pub async fn room_info(&self, room_id: &str) -> Option<RoomInfo> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|room| room.info.clone())
    }

    pub async fn join(&self, room_id: &str) -> Result<usize, LifecycleError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| LifecycleError::UnknownRoom(room_id.to_string()))?;
        room.participant_count += 1;
        Ok(room.participant_count)
    }

    pub async fn leave(&self, room_id: &str) -> Result<usize, LifecycleError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| LifecycleError::UnknownRoom(room_id.to_string()))?;
        room.participant_count = room.participant_count.saturating_sub(1);
        Ok(room.participant_count)
    }

    /// Creates a `pending` message, publishes `MessageCreated`, then
    /// schedules analysis. Returns without waiting for any of it.
    pub async fn submit(
        &self,
        room_id: &str,
        author_id: &str,
        author_display_name: &str,
        content: &str,
    ) -> Result<Message, LifecycleError> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            author_id: author_id.to_string(),
            author_display_name: author_display_name.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            status: MessageStatus::Pending,
            moderation: None,
        };

        {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .get_mut(room_id)
                .ok_or_else(|| LifecycleError::UnknownRoom(room_id.to_string()))?;
            room.messages.push(message.clone());
        }
        self.storage.save_message(room_id, &message).await?;

        let _ = self.events.send(RoomEvent::MessageCreated {
            message: message.clone(),
        });

        self.schedule_analysis(room_id, &message);
        Ok(message)
    }

    fn schedule_analysis(&self, room_id: &str, message: &Message) {
        let manager = self.clone();
        let moderation_room = room_id.to_string();
        let message_id = message.id.clone();
        let content = message.content.clone();
        tokio::spawn(async move {
            let outcome = manager.analysis.moderate(&content).await;
            manager
                .apply_moderation(&moderation_room, &message_id, outcome)
                .await;
        });

        if contains_claim(&message.content) {
            let manager = self.clone();
            let factcheck_room = room_id.to_string();
            let claim = message.content.clone();
            tokio::spawn(async move {
                let outcome = manager.analysis.fact_check(&claim).await;
                manager.record_fact_check(&factcheck_room, outcome.value).await;
            });
        }
    }

    /// Applies a completed moderation result. `pending` moves to `approved`
    /// or `flagged` by `is_toxic`; any other starting state makes this a
    /// no-op, and an unknown room or message id is logged as stale and
    /// swallowed. Never raises.
    pub async fn apply_moderation(
        &self,
        room_id: &str,
        message_id: &str,
        outcome: Analyzed<ModerationResult>,
    ) {
        if outcome.is_degraded() {
            debug!("applying degraded moderation verdict to {message_id}");
        }
        let Some(updated) = self.transition(room_id, message_id, &outcome.value).await else {
            return;
        };

        if let Err(e) = self.storage.save_message(room_id, &updated).await {
            warn!("failed to persist status of {message_id}: {e}");
        }
        let _ = self.events.send(RoomEvent::MessageStatusChanged {
            message_id: updated.id.clone(),
            status: updated.status,
            moderation: outcome.value,
        });
    }

    /// The idempotent state machine step. Returns the updated message only
    /// when a transition actually happened.
    async fn transition(
        &self,
        room_id: &str,
        message_id: &str,
        moderation: &ModerationResult,
    ) -> Option<Message> {
        let status = if moderation.is_toxic {
            MessageStatus::Flagged
        } else {
            MessageStatus::Approved
        };

        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            warn!("moderation result for unknown room {room_id}; dropping");
            return None;
        };
        let Some(message) = room.find_message_mut(message_id) else {
            warn!("moderation result for unknown message {message_id}; treating as stale");
            return None;
        };
        if message.status != MessageStatus::Pending {
            debug!("message {message_id} already resolved; duplicate result ignored");
            return None;
        }
        message.status = status;
        message.moderation = Some(moderation.clone());
        Some(message.clone())
    }

    /// Stores a fact-check outcome in the room's registry and announces it.
    pub async fn record_fact_check(&self, room_id: &str, result: FactCheckResult) {
        let registry = {
            let rooms = self.rooms.read().await;
            let Some(room) = rooms.get(room_id) else {
                warn!("fact-check result for unknown room {room_id}; dropping");
                return;
            };
            Arc::clone(&room.registry)
        };

        let entry = registry
            .upsert(&result.claim, result.verdict, result.sources, result.confidence)
            .await;
        if let Err(e) = self.storage.save_fact_check(room_id, &entry).await {
            warn!("failed to persist fact-check for {room_id}: {e}");
        }
        let _ = self.events.send(RoomEvent::FactCheckAdded { fact_check: entry });
    }

    /// Snapshot of a room's messages in creation order.
    pub async fn get_messages(&self, room_id: &str) -> Result<Vec<Message>, LifecycleError> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|room| room.messages.clone())
            .ok_or_else(|| LifecycleError::UnknownRoom(room_id.to_string()))
    }

    /// Fact-checks for a room, most recent first.
    pub async fn get_fact_checks(&self, room_id: &str) -> Result<Vec<FactCheck>, LifecycleError> {
        let registry = {
            let rooms = self.rooms.read().await;
            let room = rooms
                .get(room_id)
                .ok_or_else(|| LifecycleError::UnknownRoom(room_id.to_string()))?;
            Arc::clone(&room.registry)
        };
        Ok(registry.list().await)
    }

    /// Ingests an event that originated on another connection. State changes
    /// go through the same idempotent paths as local ones but are not
    /// re-published on the local bus.
    pub async fn apply_remote(&self, room_id: &str, event: RoomEvent) {
        match event {
            RoomEvent::MessageCreated { message } => {
                {
                    let mut rooms = self.rooms.write().await;
                    let Some(room) = rooms.get_mut(room_id) else {
                        warn!("remote message for unknown room {room_id}; dropping");
                        return;
                    };
                    if room.contains_message(&message.id) {
                        return;
                    }
                    room.messages.push(message.clone());
                }
                if let Err(e) = self.storage.save_message(room_id, &message).await {
                    warn!("failed to persist remote message {}: {e}", message.id);
                }
            }
            RoomEvent::MessageStatusChanged {
                message_id,
                moderation,
                ..
            } => {
                if let Some(updated) = self.transition(room_id, &message_id, &moderation).await {
                    if let Err(e) = self.storage.save_message(room_id, &updated).await {
                        warn!("failed to persist remote status of {message_id}: {e}");
                    }
                }
            }
            RoomEvent::FactCheckAdded { fact_check } => {
                let registry = {
                    let rooms = self.rooms.read().await;
                    let Some(room) = rooms.get(room_id) else {
                        warn!("remote fact-check for unknown room {room_id}; dropping");
                        return;
                    };
                    Arc::clone(&room.registry)
                };
                if let Err(e) = self.storage.save_fact_check(room_id, &fact_check).await {
                    warn!("failed to persist remote fact-check {}: {e}", fact_check.id);
                }
                registry.insert_record(fact_check).await;
            }
            RoomEvent::GapDetected { dropped } => {
                warn!("event gap detected ({dropped} dropped); resyncing {room_id}");
                if let Err(e) = self.resync_room(room_id).await {
                    warn!("resync of {room_id} failed: {e}");
                }
            }
        }
    }

    /// Reloads a room wholesale from storage.
    pub async fn resync_room(&self, room_id: &str) -> Result<(), LifecycleError> {
        let messages = self.storage.load_messages(room_id).await?;
        let fact_checks = self.storage.load_fact_checks(room_id).await?;

        let registry = {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .get_mut(room_id)
                .ok_or_else(|| LifecycleError::UnknownRoom(room_id.to_string()))?;
            room.messages = messages;
            Arc::clone(&room.registry)
        };
        registry.replace_all(fact_checks).await;
        Ok(())
    }
}

/// Whether a message asserts something worth fact-checking: a declarative
/// sentence of non-trivial length carrying an assertion verb or a number.
#[must_use]
pub fn contains_claim(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.len() < 20 || trimmed.ends_with('?') {
        return false;
    }
    if trimmed.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    let lowered = format!(" {} ", trimmed.to_lowercase());
    [" is ", " are ", " was ", " were ", " will ", " has ", " have "]
        .iter()
        .any(|marker| lowered.contains(marker))
}
