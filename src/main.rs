use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use tokio::sync::mpsc;

use intake_assist::config::IntakeConfig;
use intake_assist::error::{IntakeError, Result, SocketError};
use intake_assist::gateway::{BackendGateway, HttpGateway, SocketGateway};
use intake_assist::intake::{
    ConversationEngine, Message, MessageKind, QuestionTable, spawn_event_forwarder,
};
use intake_assist::socket::{ResilientSocketClient, SocketEvent};

/// One line of REPL input.
enum Command<'a> {
    Quit,
    Restart,
    Status,
    Queue,
    Save,
    Book { date: &'a str, time: &'a str },
    Chat(&'a str),
    Answer(&'a str),
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        if !line.starts_with('/') {
            return Self::Answer(line);
        }
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match cmd {
            "/quit" | "/exit" => Self::Quit,
            "/restart" => Self::Restart,
            "/status" => Self::Status,
            "/queue" => Self::Queue,
            "/save" => Self::Save,
            "/chat" => Self::Chat(rest),
            "/book" => match rest.split_once(' ') {
                Some((date, time)) => Self::Book {
                    date: date.trim(),
                    time: time.trim(),
                },
                None => Self::Unknown(line),
            },
            _ => Self::Unknown(line),
        }
    }
}

fn render(message: &Message) {
    match message.kind {
        MessageKind::User => {}
        MessageKind::Bot => println!("\n🩺 {}\n", message.content),
        MessageKind::System => println!("ℹ️  {}", message.content),
        MessageKind::Error => println!("❌ {}", message.content),
    }
}

/// The selected backend transport.
struct Backend {
    gateway: Arc<dyn BackendGateway>,
    /// Present in socket mode.
    socket: Option<Arc<ResilientSocketClient>>,
    pushed: Option<mpsc::UnboundedReceiver<SocketEvent>>,
}

async fn connect_backend(config: &IntakeConfig) -> Result<Backend> {
    if !config.use_socket {
        eprintln!("   Transport: http");
        return Ok(Backend {
            gateway: Arc::new(HttpGateway::new(&config.gateway)?),
            socket: None,
            pushed: None,
        });
    }

    let client = Arc::new(ResilientSocketClient::new(&config.socket));
    let events = client
        .events()
        .await
        .ok_or_else(|| SocketError::Protocol("event stream already taken".to_string()))?;
    let (gateway, pushed) =
        SocketGateway::attach(Arc::clone(&client), events, config.gateway.request_timeout);
    client.connect().await;
    eprintln!(
        "   Transport: socket {} (max {} attempts)",
        config.socket.url, config.socket.max_attempts
    );
    Ok(Backend {
        gateway: Arc::new(gateway),
        socket: Some(client),
        pushed: Some(pushed),
    })
}

/// Print log entries appended since `cursor`; returns the new cursor.
async fn print_new(engine: &ConversationEngine, cursor: usize) -> usize {
    let fresh = engine.messages_since(cursor).await;
    for message in &fresh {
        render(message);
    }
    cursor + fresh.len()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = IntakeConfig::from_env().context("Invalid INTAKE_* configuration")?;

    eprintln!("🏥 Intake Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", config.gateway.base_url);

    // ── Gateway ─────────────────────────────────────────────────────────
    let Backend {
        gateway,
        socket,
        pushed,
    } = connect_backend(&config)
        .await
        .context("Failed to set up the backend gateway")?;

    // ── Engine ──────────────────────────────────────────────────────────
    let engine = Arc::new(ConversationEngine::new(
        gateway,
        QuestionTable::consultation(),
        config.engine.clone(),
    ));
    let _forwarder = pushed.map(|events| spawn_event_forwarder(Arc::clone(&engine), events));

    eprintln!("   Commands: /chat TEXT, /queue, /book YYYY-MM-DD HH:MM, /save, /status, /restart, /quit\n");

    engine.start().await;
    let mut cursor = print_new(&engine, 0).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            eprint!("> ");
            continue;
        }

        let result = match Command::parse(line) {
            Command::Quit => break,
            Command::Restart => {
                engine.restart().await;
                cursor = 0;
                engine.start().await;
                Ok(())
            }
            Command::Status => {
                let snapshot = engine.snapshot().await;
                eprintln!(
                    "   state={} question={} busy={}",
                    snapshot.state, snapshot.question_index, snapshot.busy
                );
                eprintln!("{}", serde_json::to_string_pretty(&snapshot.profile)?);
                Ok(())
            }
            Command::Queue => engine.queue_status().await.map(drop),
            Command::Save => engine.save_profile().await.map(drop),
            Command::Book { date, time } => engine.book_appointment(date, time).await.map(drop),
            Command::Chat(text) => engine.chat(text).await.map(drop),
            Command::Answer(text) => engine.submit_answer(text).await.map(drop),
            Command::Unknown(text) => {
                eprintln!("Unknown command: {text}");
                Ok(())
            }
        };

        cursor = print_new(&engine, cursor).await;

        match result {
            // Already reported through the message log.
            Ok(()) | Err(IntakeError::Validation(_) | IntakeError::Backend(_)) => {}
            Err(e) => eprintln!("⚠️  {e}"),
        }
        eprint!("> ");
    }

    if let Some(client) = socket {
        client.disconnect().await;
    }
    eprintln!("Goodbye.");
    Ok(())
}
