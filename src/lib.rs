//! Content-analysis orchestration core for a live debate room: message
//! lifecycle, moderation and fact-check analysis with degradation tiers, a
//! per-room fact-check registry, and a reconnecting realtime event channel.
//!
//! The rendering layer is a consumer of this crate: it calls
//! [`lifecycle::RoomManager::submit`] and re-renders on the events it
//! receives from [`lifecycle::RoomManager::subscribe`] and
//! [`channel::ChannelHandle::subscribe`].

pub mod analysis;
pub mod channel;
pub mod config;
pub mod lifecycle;
pub mod messages;
pub mod registry;
pub mod room;
pub mod storage;
