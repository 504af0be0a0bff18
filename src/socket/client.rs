//! Resilient socket client — keeps one push channel open, reconnecting with a
//! bounded number of attempts.
//!
//! Architecture:
//! - `connect()` spawns one driver task per session. The driver opens the
//!   transport, pumps frames both ways, and on failure sleeps for the backoff
//!   delay before trying again. The sleep is the only reconnect timer, so at
//!   most one is ever pending.
//! - All state changes happen under the session lock and are tagged with a
//!   session generation. `disconnect()` bumps the generation and fires the
//!   shutdown signal, so a superseded driver can never write state again.
//! - The shutdown sender sits in its own plain mutex so that `Drop` can
//!   always take it, even while the session lock is held elsewhere.
//! - Every successful open gets a new connection id. `send()` reports the id
//!   of the connection a frame was queued on.
//! - Inbound frames and lifecycle changes are reported on a single event
//!   channel; the current state is also published through a `watch`.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::backoff::{Backoff, FixedBackoff};
use super::transport::{Connector, Transport, WsConnector};
use crate::config::SocketConfig;
use crate::error::SocketError;

/// Lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Gave up after `max_attempts` consecutive failures. Terminal until
    /// `reset()`.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Something the owner of the client should know about.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// A well-formed inbound JSON frame.
    Frame(serde_json::Value),
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    Failed { attempts: u32 },
    Disconnected,
}

#[derive(Default)]
struct Session {
    generation: u64,
    attempt_count: u32,
    /// Bumped on every successful open, across sessions.
    connection_id: u64,
    /// Feeds the live transport. Present only while Connected.
    outbound: Option<mpsc::UnboundedSender<String>>,
}

struct Shared {
    session: Mutex<Session>,
    /// Stops the current driver when fired or dropped.
    shutdown: StdMutex<Option<oneshot::Sender<()>>>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SocketEvent>>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        self.state_tx.send_replace(state)
    }

    fn arm_shutdown(&self, tx: oneshot::Sender<()>) {
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    fn take_shutdown(&self) -> Option<oneshot::Sender<()>> {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn emit(&self, event: SocketEvent) {
        // No receiver just means nobody is listening.
        let _ = self.events_tx.send(event);
    }

    fn deliver(&self, text: &str) {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(frame) => self.emit(SocketEvent::Frame(frame)),
            Err(e) => {
                let err = SocketError::Protocol(e.to_string());
                warn!(error = %err, len = text.len(), "Dropping malformed frame");
            }
        }
    }
}

/// Reconnecting wrapper around a persistent duplex transport.
pub struct ResilientSocketClient {
    url: String,
    max_attempts: u32,
    connector: Arc<dyn Connector>,
    backoff: Arc<dyn Backoff>,
    shared: Arc<Shared>,
}

impl ResilientSocketClient {
    /// WebSocket client with a fixed reconnect delay.
    pub fn new(config: &SocketConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(WsConnector),
            Arc::new(FixedBackoff::new(config.reconnect_delay)),
        )
    }

    pub fn with_parts(
        config: &SocketConfig,
        connector: Arc<dyn Connector>,
        backoff: Arc<dyn Backoff>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            url: config.url.clone(),
            max_attempts: config.max_attempts.max(1),
            connector,
            backoff,
            shared: Arc::new(Shared {
                session: Mutex::new(Session::default()),
                shutdown: StdMutex::new(None),
                state_tx,
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Take the event receiver. Only the first call gets it.
    pub async fn events(&self) -> Option<mpsc::UnboundedReceiver<SocketEvent>> {
        self.shared.events_rx.lock().await.take()
    }

    /// Consecutive failures since the last successful open.
    pub async fn attempt_count(&self) -> u32 {
        self.shared.session.lock().await.attempt_count
    }

    /// Start a session. Returns `false` (and does nothing) unless the client
    /// is Disconnected; a Failed client must be `reset()` first.
    pub async fn connect(&self) -> bool {
        let mut session = self.shared.session.lock().await;
        let current = self.shared.state();
        if current != ConnectionState::Disconnected {
            debug!(state = %current, "connect() ignored");
            return false;
        }

        session.generation += 1;
        session.attempt_count = 0;
        session.outbound = None;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shared.arm_shutdown(shutdown_tx);
        self.shared.set_state(ConnectionState::Connecting);
        info!(url = %self.url, "Connecting push channel");

        let driver = Driver {
            url: self.url.clone(),
            max_attempts: self.max_attempts,
            connector: Arc::clone(&self.connector),
            backoff: Arc::clone(&self.backoff),
            shared: Arc::clone(&self.shared),
            generation: session.generation,
        };
        tokio::spawn(driver.run(shutdown_rx));
        true
    }

    /// Serialize `payload` and queue it on the live transport. Returns the id
    /// of the connection it was queued on.
    pub async fn send<T>(&self, payload: &T) -> Result<u64, SocketError>
    where
        T: Serialize + ?Sized,
    {
        let session = self.shared.session.lock().await;
        if self.shared.state() != ConnectionState::Connected {
            return Err(SocketError::NotConnected);
        }
        let outbound = session.outbound.as_ref().ok_or(SocketError::NotConnected)?;
        let text = serde_json::to_string(payload)?;
        outbound
            .send(text)
            .map(|()| session.connection_id)
            .map_err(|_| SocketError::NotConnected)
    }

    /// Stop the session from any state: cancels a pending reconnect timer,
    /// closes an open transport and leaves the client Disconnected. The client
    /// may be connected again afterwards.
    pub async fn disconnect(&self) {
        let mut session = self.shared.session.lock().await;
        session.generation += 1;
        session.outbound = None;
        if let Some(tx) = self.shared.take_shutdown() {
            let _ = tx.send(());
        }
        let previous = self.shared.set_state(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            info!(url = %self.url, from = %previous, "Push channel disconnected");
            self.shared.emit(SocketEvent::Disconnected);
        }
    }

    /// Clear a Failed client back to Disconnected. Returns `false` if the
    /// client was not Failed.
    pub async fn reset(&self) -> bool {
        let mut session = self.shared.session.lock().await;
        if self.shared.state() != ConnectionState::Failed {
            return false;
        }
        session.attempt_count = 0;
        self.shared.set_state(ConnectionState::Disconnected);
        true
    }
}

impl Drop for ResilientSocketClient {
    fn drop(&mut self) {
        // Dropping the shutdown sender stops the driver.
        drop(self.shared.take_shutdown());
        if let Ok(mut session) = self.shared.session.try_lock() {
            session.generation += 1;
        }
    }
}

/// One session's connect / pump / backoff loop.
struct Driver {
    url: String,
    max_attempts: u32,
    connector: Arc<dyn Connector>,
    backoff: Arc<dyn Backoff>,
    shared: Arc<Shared>,
    generation: u64,
}

impl Driver {
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            let attempt = tokio::select! {
                _ = &mut shutdown => return,
                result = self.connector.connect(&self.url) => result,
            };

            match attempt {
                Ok(transport) => match self.serve(transport, &mut shutdown).await {
                    Some(reason) => warn!(url = %self.url, reason = %reason, "Push channel lost"),
                    None => return,
                },
                Err(e) => warn!(url = %self.url, error = %e, "Push channel connect failed"),
            }

            let Some(delay) = self.on_failure().await else {
                return;
            };

            tokio::select! {
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(delay) => {}
            }

            if !self.on_retry().await {
                return;
            }
        }
    }

    /// Pump frames until the connection drops. Returns the reason it dropped,
    /// or `None` if the session was shut down or superseded.
    async fn serve(
        &self,
        mut transport: Box<dyn Transport>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Option<String> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        if !self.on_open(out_tx).await {
            transport.close().await;
            return None;
        }

        loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    transport.close().await;
                    return None;
                }
                Some(text) = out_rx.recv() => {
                    if let Err(e) = transport.send_text(text).await {
                        return Some(e.to_string());
                    }
                }
                incoming = transport.next_text() => match incoming {
                    Some(Ok(text)) => self.shared.deliver(&text),
                    Some(Err(e)) => return Some(e.to_string()),
                    None => return Some("closed by peer".to_string()),
                },
            }
        }
    }

    async fn on_open(&self, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut session = self.shared.session.lock().await;
        if session.generation != self.generation {
            return false;
        }
        session.attempt_count = 0;
        session.connection_id += 1;
        session.outbound = Some(outbound);
        self.shared.set_state(ConnectionState::Connected);
        info!(url = %self.url, connection = session.connection_id, "Push channel connected");
        self.shared.emit(SocketEvent::Connected);
        true
    }

    /// Count the failure and either schedule a retry (returning its delay) or
    /// commit to Failed.
    async fn on_failure(&self) -> Option<Duration> {
        let mut session = self.shared.session.lock().await;
        if session.generation != self.generation {
            return None;
        }
        session.outbound = None;
        session.attempt_count += 1;
        let attempt = session.attempt_count;

        if attempt >= self.max_attempts {
            self.shared.take_shutdown();
            self.shared.set_state(ConnectionState::Failed);
            error!(url = %self.url, attempts = attempt, "Push channel gave up reconnecting");
            self.shared.emit(SocketEvent::Failed { attempts: attempt });
            return None;
        }

        let delay = self.backoff.delay(attempt);
        self.shared.set_state(ConnectionState::Reconnecting);
        info!(
            url = %self.url,
            attempt,
            max_attempts = self.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.shared.emit(SocketEvent::Reconnecting { attempt, delay });
        Some(delay)
    }

    async fn on_retry(&self) -> bool {
        let session = self.shared.session.lock().await;
        if session.generation != self.generation {
            return false;
        }
        self.shared.set_state(ConnectionState::Connecting);
        true
    }
}
