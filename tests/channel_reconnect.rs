use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use public_square::channel::DispatchChannel;
use public_square::config::{ChannelConfig, ReconnectPolicy};
use public_square::messages::{FactCheck, Message, MessageStatus, RoomEvent, Verdict};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use warp::Filter;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn fast_config(port: u16, buffer_capacity: usize) -> ChannelConfig {
    ChannelConfig {
        base_url: format!("http://127.0.0.1:{port}"),
        buffer_capacity,
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
        },
    }
}

fn created_event(n: usize) -> RoomEvent {
    RoomEvent::MessageCreated {
        message: Message {
            id: format!("m-{n}"),
            author_id: "u-1".to_string(),
            author_display_name: "alice".to_string(),
            content: format!("message number {n}"),
            created_at: chrono::Utc::now(),
            status: MessageStatus::Pending,
            moderation: None,
        },
    }
}

fn event_message_id(raw: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(raw).unwrap();
    assert_eq!(value["type"], "MessageCreated");
    value["payload"]["message"]["id"].as_str().unwrap().to_string()
}

/// Room socket endpoint that records every text frame it receives.
fn recording_ws_server(port: u16, received: Arc<Mutex<Vec<String>>>) -> JoinHandle<()> {
    let route = warp::path!("ws" / "debate" / String)
        .and(warp::ws())
        .map(move |_room: String, ws: warp::ws::Ws| {
            let received = Arc::clone(&received);
            ws.on_upgrade(move |socket| async move {
                let (_tx, mut rx) = socket.split();
                while let Some(Ok(frame)) = rx.next().await {
                    if let Ok(text) = frame.to_str() {
                        received.lock().await.push(text.to_string());
                    }
                }
            })
        });
    tokio::spawn(warp::serve(route).run(([127, 0, 0, 1], port)))
}

/// Room socket endpoint that pushes one event to every client, then idles.
fn pushing_ws_server(port: u16, payload: String) -> JoinHandle<()> {
    let route = warp::path!("ws" / "debate" / String)
        .and(warp::ws())
        .map(move |_room: String, ws: warp::ws::Ws| {
            let payload = payload.clone();
            ws.on_upgrade(move |socket| async move {
                let (mut tx, mut rx) = socket.split();
                let _ = tx.send(warp::ws::Message::text(payload)).await;
                while let Some(Ok(_)) = rx.next().await {}
            })
        });
    tokio::spawn(warp::serve(route).run(([127, 0, 0, 1], port)))
}

async fn wait_for_count(received: &Arc<Mutex<Vec<String>>>, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if received.lock().await.len() >= count {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} frames"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn events_published_while_down_replay_in_order() {
    let port = free_port();
    let channel = DispatchChannel::connect(fast_config(port, 8), "r-1");

    for n in 0..3 {
        channel.publish(created_event(n));
    }
    // Give the channel time to fail its first attempts and buffer.
    tokio::time::sleep(Duration::from_millis(250)).await;

    let received = Arc::new(Mutex::new(Vec::new()));
    let _server = recording_ws_server(port, Arc::clone(&received));

    wait_for_count(&received, 3).await;
    let frames = received.lock().await;
    let ids: Vec<String> = frames.iter().map(|raw| event_message_id(raw)).collect();
    assert_eq!(ids, vec!["m-0", "m-1", "m-2"]);
    drop(frames);

    channel.close().await;
}

#[tokio::test]
async fn overflow_drops_oldest_and_signals_gap() {
    let port = free_port();
    let channel = DispatchChannel::connect(fast_config(port, 2), "r-1");
    let mut events = channel.subscribe();

    for n in 0..5 {
        channel.publish(created_event(n));
    }

    // The buffer holds two; dropping the overflow must surface as a gap.
    let mut saw_gap = false;
    for _ in 0..5 {
        match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Ok(RoomEvent::GapDetected { dropped })) => {
                assert!(dropped >= 1);
                saw_gap = true;
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => panic!("event stream closed: {e}"),
            Err(_) => break,
        }
    }
    assert!(saw_gap, "overflow must deliver GapDetected");

    // The newest events survived and are delivered in order.
    let received = Arc::new(Mutex::new(Vec::new()));
    let _server = recording_ws_server(port, Arc::clone(&received));
    wait_for_count(&received, 2).await;
    let frames = received.lock().await;
    let ids: Vec<String> = frames.iter().map(|raw| event_message_id(raw)).collect();
    assert_eq!(ids, vec!["m-3", "m-4"]);
    drop(frames);

    channel.close().await;
}

#[tokio::test]
async fn incoming_events_reach_subscribers() {
    let port = free_port();
    let fact_check = RoomEvent::FactCheckAdded {
        fact_check: FactCheck {
            id: "fc-1".to_string(),
            claim: "ai systems are too complex to audit".to_string(),
            verdict: Verdict::Mixed,
            sources: vec!["Nature 2024".to_string()],
            confidence: 0.75,
            created_at: chrono::Utc::now(),
        },
    };
    let _server = pushing_ws_server(port, serde_json::to_string(&fact_check).unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let channel = DispatchChannel::connect(fast_config(port, 8), "r-1");
    let mut events = channel.subscribe();

    let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("timed out waiting for pushed event")
        .expect("event stream closed");
    match event {
        RoomEvent::FactCheckAdded { fact_check } => {
            assert_eq!(fact_check.claim, "ai systems are too complex to audit");
            assert_eq!(fact_check.verdict, Verdict::Mixed);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    channel.close().await;
}

#[tokio::test]
async fn close_completes_while_disconnected() {
    let port = free_port();
    let channel = DispatchChannel::connect(fast_config(port, 8), "r-1");
    channel.publish(created_event(0));

    tokio::time::timeout(Duration::from_secs(2), channel.close())
        .await
        .expect("close must not hang while reconnecting");
}
