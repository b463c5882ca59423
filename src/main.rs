use std::sync::Arc;

use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use public_square::analysis::AnalysisClient;
use public_square::channel::DispatchChannel;
use public_square::config::{AnalysisConfig, ChannelConfig};
use public_square::lifecycle::RoomManager;
use public_square::messages::RoomEvent;
use public_square::storage::{MemoryStorage, Storage};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let analysis = match AnalysisClient::new(AnalysisConfig::from_env()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("failed to build analysis client: {e}");
            std::process::exit(1);
        }
    };

    if analysis.health_check().await {
        info!("analysis backend reachable");
    } else {
        warn!("analysis backend unreachable; expect degraded verdicts");
    }

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let manager = RoomManager::new(analysis, storage);

    let topic = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "open discussion".to_string());
    let room = manager.create_room(&topic).await;
    let _ = manager.join(&room.id).await;
    info!("room {} open: {}", room.id, room.topic);

    let channel = DispatchChannel::connect(ChannelConfig::from_env(), &room.id);

    // Local events out to the wire.
    let publisher = channel.publisher();
    let mut local_events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match local_events.recv().await {
                Ok(event) => publisher.publish(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("publisher lagged, {skipped} events not forwarded");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Remote events into local state.
    let mut remote_events = channel.subscribe();
    let remote_manager = manager.clone();
    let remote_room = room.id.clone();
    tokio::spawn(async move {
        loop {
            match remote_events.recv().await {
                Ok(event) => {
                    describe(&event);
                    remote_manager.apply_remote(&remote_room, event).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("subscriber lagged, {skipped} events missed");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let author_id = Uuid::new_v4().to_string();
    let author_name = std::env::var("USER").unwrap_or_else(|_| "participant".to_string());

    info!("type a message and press enter; ctrl-d to leave");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        match manager.submit(&room.id, &author_id, &author_name, content).await {
            Ok(message) => info!("message {} submitted for review", message.id),
            Err(e) => error!("submit failed: {e}"),
        }
    }

    let _ = manager.leave(&room.id).await;
    manager.close_room(&room.id).await;
    channel.close().await;
    info!("left room");
}

fn describe(event: &RoomEvent) {
    match event {
        RoomEvent::MessageCreated { message } => {
            info!("{}: {}", message.author_display_name, message.content);
        }
        RoomEvent::MessageStatusChanged {
            message_id, status, ..
        } => {
            info!("message {message_id} is now {status:?}");
        }
        RoomEvent::FactCheckAdded { fact_check } => {
            info!(
                "fact-check [{:?}] {} ({} sources)",
                fact_check.verdict,
                fact_check.claim,
                fact_check.sources.len()
            );
        }
        RoomEvent::GapDetected { dropped } => {
            warn!("{dropped} events dropped; view may be stale until resync");
        }
    }
}
