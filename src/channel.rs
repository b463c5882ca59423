use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::{ChannelConfig, ReconnectPolicy};
use crate::messages::RoomEvent;

const EVENT_FANOUT_CAPACITY: usize = 256;

/// Room-scoped realtime connection.
///
/// Outgoing events are per-connection FIFO. While the transport is down they
/// accumulate in a bounded buffer and are replayed in original order after
/// reconnection; when the buffer overflows the oldest event is dropped and
/// subscribers receive `GapDetected` so they can resync instead of silently
/// missing data. Delivery is at-least-once on both directions, so consumers
/// must apply events idempotently.
pub struct DispatchChannel;

impl DispatchChannel {
    /// Spawns the connection task for `{base}/ws/debate/{room_id}` and
    /// returns its handle. The task reconnects with exponential backoff
    /// until [`ChannelHandle::close`] is called.
    #[must_use]
    pub fn connect(config: ChannelConfig, room_id: &str) -> ChannelHandle {
        let runtime = ChannelRuntime {
            url: config.ws_url(room_id),
            capacity: config.buffer_capacity.max(1),
            policy: config.reconnect,
        };
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_FANOUT_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(runtime, outgoing_rx, events_tx.clone(), shutdown_rx));
        ChannelHandle {
            outgoing: outgoing_tx,
            events: events_tx,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }
}

pub struct ChannelHandle {
    outgoing: mpsc::UnboundedSender<RoomEvent>,
    events: broadcast::Sender<RoomEvent>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    /// Fire-and-forget publish.
    pub fn publish(&self, event: RoomEvent) {
        if self.outgoing.send(event).is_err() {
            warn!("dispatch channel task is gone; event dropped");
        }
    }

    /// A cheap clone of the publish side, for pump tasks.
    #[must_use]
    pub fn publisher(&self) -> ChannelPublisher {
        ChannelPublisher {
            outgoing: self.outgoing.clone(),
        }
    }

    /// Incoming events (and locally-raised `GapDetected`). At-least-once;
    /// duplicates are possible after a reconnect replay.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    /// Sends a close frame when connected and waits for the task to finish.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        // Release the connection on every exit path, close() or not.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Clone)]
pub struct ChannelPublisher {
    outgoing: mpsc::UnboundedSender<RoomEvent>,
}

impl ChannelPublisher {
    pub fn publish(&self, event: RoomEvent) {
        if self.outgoing.send(event).is_err() {
            warn!("dispatch channel task is gone; event dropped");
        }
    }
}

struct ChannelRuntime {
    url: String,
    capacity: usize,
    policy: ReconnectPolicy,
}

enum Exit {
    Shutdown,
    Disconnected,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run(
    runtime: ChannelRuntime,
    mut outgoing: mpsc::UnboundedReceiver<RoomEvent>,
    events: broadcast::Sender<RoomEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending: VecDeque<RoomEvent> = VecDeque::new();
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let connected = tokio::select! {
            result = connect_async(runtime.url.as_str()) => result,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
                continue;
            }
        };

        match connected {
            Ok((socket, _)) => {
                info!("dispatch channel connected to {}", runtime.url);
                attempt = 0;
                match serve_connection(
                    socket,
                    &runtime,
                    &mut outgoing,
                    &mut pending,
                    &events,
                    &mut shutdown,
                )
                .await
                {
                    Exit::Shutdown => return,
                    Exit::Disconnected => {
                        warn!("dispatch channel disconnected from {}", runtime.url);
                    }
                }
            }
            Err(e) => {
                debug!("dispatch channel connect failed: {e}");
            }
        }

        let delay = jittered(&runtime.policy, attempt);
        attempt = attempt.saturating_add(1);
        debug!("dispatch channel retrying in {delay:?}");
        if let Exit::Shutdown = wait_while_disconnected(
            delay,
            &runtime,
            &mut outgoing,
            &mut pending,
            &events,
            &mut shutdown,
        )
        .await
        {
            return;
        }
    }
}

/// Backoff wait that keeps accepting publishes into the replay buffer.
async fn wait_while_disconnected(
    delay: Duration,
    runtime: &ChannelRuntime,
    outgoing: &mut mpsc::UnboundedReceiver<RoomEvent>,
    pending: &mut VecDeque<RoomEvent>,
    events: &broadcast::Sender<RoomEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Exit {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return Exit::Disconnected,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Exit::Shutdown;
                }
            }
            maybe = outgoing.recv() => match maybe {
                Some(event) => buffer_event(pending, runtime.capacity, event, events),
                None => return Exit::Shutdown,
            },
        }
    }
}

async fn serve_connection(
    socket: Socket,
    runtime: &ChannelRuntime,
    outgoing: &mut mpsc::UnboundedReceiver<RoomEvent>,
    pending: &mut VecDeque<RoomEvent>,
    events: &broadcast::Sender<RoomEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Exit {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Replay everything buffered while disconnected, in original order.
    while let Some(event) = pending.pop_front() {
        match serde_json::to_string(&event) {
            Ok(text) => {
                if ws_tx.send(WsMessage::text(text)).await.is_err() {
                    pending.push_front(event);
                    return Exit::Disconnected;
                }
            }
            Err(e) => warn!("dropping unencodable event: {e}"),
        }
    }

    loop {
        tokio::select! {
            maybe = outgoing.recv() => match maybe {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(text) => {
                        if ws_tx.send(WsMessage::text(text)).await.is_err() {
                            // Keep the event for replay after reconnecting.
                            buffer_event(pending, runtime.capacity, event, events);
                            return Exit::Disconnected;
                        }
                    }
                    Err(e) => warn!("dropping unencodable event: {e}"),
                },
                None => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    return Exit::Shutdown;
                }
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<RoomEvent>(text.as_str()) {
                        Ok(event) => {
                            let _ = events.send(event);
                        }
                        Err(e) => warn!("discarding malformed event: {e}"),
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => return Exit::Disconnected,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("websocket error: {e}");
                    return Exit::Disconnected;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    return Exit::Shutdown;
                }
            }
        }
    }
}

fn buffer_event(
    pending: &mut VecDeque<RoomEvent>,
    capacity: usize,
    event: RoomEvent,
    events: &broadcast::Sender<RoomEvent>,
) {
    if pending.len() >= capacity {
        pending.pop_front();
        let _ = events.send(RoomEvent::GapDetected { dropped: 1 });
    }
    pending.push_back(event);
}

fn jittered(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let base = policy.delay_for(attempt);
    let spread = (base.as_millis() as u64 / 4).max(1);
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{FactCheck, Verdict};

    fn event(n: usize) -> RoomEvent {
        RoomEvent::FactCheckAdded {
            fact_check: FactCheck {
                id: format!("fc-{n}"),
                claim: format!("claim {n}"),
                verdict: Verdict::Unverified,
                sources: Vec::new(),
                confidence: 0.0,
                created_at: chrono::Utc::now(),
            },
        }
    }

    #[test]
    fn buffer_drops_oldest_and_signals_gap() {
        let (events, mut rx) = broadcast::channel(16);
        let mut pending = VecDeque::new();

        for n in 0..3 {
            buffer_event(&mut pending, 2, event(n), &events);
        }

        assert_eq!(pending.len(), 2);
        match &pending[0] {
            RoomEvent::FactCheckAdded { fact_check } => assert_eq!(fact_check.id, "fc-1"),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.try_recv() {
            Ok(RoomEvent::GapDetected { dropped }) => assert_eq!(dropped, 1),
            other => panic!("expected gap signal, got {other:?}"),
        }
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_delay() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        };
        for _ in 0..50 {
            let delay = jittered(&policy, 0);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }
}
