//! Integration tests for the resilient socket client and the socket gateway.
//!
//! Each test spins up an Axum WebSocket server on a random port and drives
//! the real tokio-tungstenite transport against it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use intake_assist::config::{EngineConfig, SocketConfig};
use intake_assist::gateway::SocketGateway;
use intake_assist::intake::{ConversationEngine, ConversationState, QuestionTable};
use intake_assist::socket::{ConnectionState, ResilientSocketClient, SocketEvent};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct ServerState {
    connections: Arc<AtomicUsize>,
}

/// Start an Axum server on a random port, return (port, state).
async fn start_server() -> (u16, ServerState) {
    let state = ServerState::default();
    let app = Router::new()
        .route("/ws", get(backend_ws))
        .route("/ws-drop", get(dropping_ws))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, state)
}

async fn backend_ws(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(handle_backend)
}

/// Greets with one malformed and one valid frame, then answers requests.
async fn handle_backend(mut socket: WebSocket) {
    let greeting = json!({"type": "status", "message": "connected"}).to_string();
    for frame in ["not json {".to_string(), greeting] {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }

    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let result = match request["method"].as_str() {
            Some("analyze_symptoms") => json!({
                "needsMoreInfo": false,
                "recommendedSpecialty": "Nội khoa",
                "confidence": 0.8
            }),
            Some("queue_status") => json!({"current_number": 3, "waiting_time": 10}),
            Some("echo") => request["params"].clone(),
            _ => {
                let reply = json!({"id": request["id"], "error": "unknown method"});
                let _ = socket.send(Message::Text(reply.to_string().into())).await;
                continue;
            }
        };
        let reply = json!({"id": request["id"], "result": result});
        if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
            return;
        }
    }
}

async fn dropping_ws(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket.send(Message::Close(None)).await;
    })
}

fn socket_config(url: String, max_attempts: u32) -> SocketConfig {
    SocketConfig {
        url,
        max_attempts,
        reconnect_delay: Duration::from_millis(50),
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SocketEvent>) -> SocketEvent {
    rx.recv().await.expect("event channel closed")
}

// ── Client ───────────────────────────────────────────────────────────

#[tokio::test]
async fn client_delivers_frames_and_skips_malformed_ones() {
    timeout(TEST_TIMEOUT, async {
        let (port, _state) = start_server().await;
        let client = ResilientSocketClient::new(&socket_config(
            format!("ws://127.0.0.1:{port}/ws"),
            3,
        ));
        let mut events = client.events().await.unwrap();

        assert!(client.connect().await);
        assert_eq!(next_event(&mut events).await, SocketEvent::Connected);
        assert_eq!(
            next_event(&mut events).await,
            SocketEvent::Frame(json!({"type": "status", "message": "connected"}))
        );
        assert_eq!(client.state(), ConnectionState::Connected);

        client
            .send(&json!({"id": 1, "method": "echo", "params": {"x": 1}}))
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut events).await,
            SocketEvent::Frame(json!({"id": 1, "result": {"x": 1}}))
        );

        client.disconnect().await;
        assert_eq!(next_event(&mut events).await, SocketEvent::Disconnected);
        assert!(client.send(&json!({})).await.is_err());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn client_reconnects_after_server_closes() {
    timeout(TEST_TIMEOUT, async {
        let (port, state) = start_server().await;
        let client = ResilientSocketClient::new(&socket_config(
            format!("ws://127.0.0.1:{port}/ws-drop"),
            3,
        ));
        let mut events = client.events().await.unwrap();

        client.connect().await;
        assert_eq!(next_event(&mut events).await, SocketEvent::Connected);
        assert!(matches!(
            next_event(&mut events).await,
            SocketEvent::Reconnecting { attempt: 1, .. }
        ));
        // The successful reopen resets the count, so it is attempt 1 again.
        assert_eq!(next_event(&mut events).await, SocketEvent::Connected);
        assert!(matches!(
            next_event(&mut events).await,
            SocketEvent::Reconnecting { attempt: 1, .. }
        ));

        client.disconnect().await;
        assert!(state.connections.load(Ordering::SeqCst) >= 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn client_gives_up_on_unreachable_server() {
    timeout(TEST_TIMEOUT, async {
        // Bind then drop a listener to get a port nobody is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ResilientSocketClient::new(&socket_config(
            format!("ws://127.0.0.1:{port}/ws"),
            2,
        ));
        let mut events = client.events().await.unwrap();

        client.connect().await;
        assert!(matches!(
            next_event(&mut events).await,
            SocketEvent::Reconnecting { attempt: 1, .. }
        ));
        assert_eq!(next_event(&mut events).await, SocketEvent::Failed { attempts: 2 });
        assert_eq!(client.state(), ConnectionState::Failed);
        assert_eq!(client.attempt_count().await, 2);
    })
    .await
    .expect("test timed out");
}

// ── Gateway + engine ─────────────────────────────────────────────────

#[tokio::test]
async fn intake_runs_over_the_socket_gateway() {
    timeout(TEST_TIMEOUT, async {
        let (port, _state) = start_server().await;
        let client = Arc::new(ResilientSocketClient::new(&socket_config(
            format!("ws://127.0.0.1:{port}/ws"),
            3,
        )));
        let events = client.events().await.unwrap();
        let (gateway, mut pushed) =
            SocketGateway::attach(Arc::clone(&client), events, Duration::from_secs(2));

        client.connect().await;
        assert_eq!(pushed.recv().await, Some(SocketEvent::Connected));
        assert!(matches!(pushed.recv().await, Some(SocketEvent::Frame(_))));

        let engine = ConversationEngine::new(
            Arc::new(gateway),
            QuestionTable::consultation(),
            EngineConfig::default(),
        );
        engine.start().await;
        for raw in ["An", "34", "nam", "an@example.com"] {
            engine.submit_answer(raw).await.unwrap();
        }
        let turn = engine.submit_answer("đau đầu, chóng mặt").await.unwrap();
        assert_eq!(turn.state, ConversationState::CollectingMedicalHistory);

        let snapshot = engine.snapshot().await;
        assert_eq!(
            snapshot.profile.recommended_specialty.as_deref(),
            Some("Nội khoa")
        );

        // Unknown methods come back as error replies.
        let err = engine.chat("xin chào").await.unwrap_err();
        assert!(err.to_string().contains("unknown method"), "got {err}");

        client.disconnect().await;
    })
    .await
    .expect("test timed out");
}
