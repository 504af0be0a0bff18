//! Socket gateway — backend calls as request/reply frames on the push channel.
//!
//! Outbound: `{"id": 7, "method": "analyze_symptoms", "params": {...}}`.
//! Inbound replies carry the same `id` plus either `result` or `error`.
//! Anything else the backend pushes is handed to the caller untouched.
//!
//! Each pending call remembers the connection its request went out on. A
//! loss event only fails calls on connections the router has seen open, so a
//! late `Reconnecting` cannot fail requests already sent on a newer link.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    Acknowledgement, AnalyzeRequest, BackendGateway, BookingConfirmation, BookingRequest,
    ChatReply, ChatRequest, Endpoint, QueueRequest, QueueStatus, RecommendRequest,
    Recommendations, SymptomAnalysis,
};
use crate::error::GatewayError;
use crate::intake::PatientProfile;
use crate::socket::{ResilientSocketClient, SocketEvent};

struct PendingCall {
    endpoint: Endpoint,
    /// Client connection id the request was queued on.
    connection: u64,
    reply: oneshot::Sender<Result<Value, GatewayError>>,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingCall>>>;

#[derive(Serialize)]
struct RequestFrame<'a, P: Serialize + ?Sized> {
    id: u64,
    method: &'static str,
    params: &'a P,
}

/// Gateway that multiplexes calls over a [`ResilientSocketClient`].
pub struct SocketGateway {
    client: Arc<ResilientSocketClient>,
    pending: PendingMap,
    next_id: AtomicU64,
    timeout: Duration,
    router: JoinHandle<()>,
}

impl SocketGateway {
    /// Take over `events` from the client. Replies are consumed here; every
    /// other event comes out of the returned receiver.
    pub fn attach(
        client: Arc<ResilientSocketClient>,
        events: mpsc::UnboundedReceiver<SocketEvent>,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SocketEvent>) {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let router = tokio::spawn(route(events, Arc::clone(&pending), out_tx));

        let gateway = Self {
            client,
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            router,
        };
        (gateway, out_rx)
    }

    pub fn client(&self) -> &Arc<ResilientSocketClient> {
        &self.client
    }

    async fn call<P, R>(&self, endpoint: Endpoint, params: &P) -> Result<R, GatewayError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let frame = RequestFrame {
            id,
            method: endpoint.method(),
            params,
        };

        // Held across the send so the router cannot see the reply first.
        let mut pending = self.pending.lock().await;
        let connection = match self.client.send(&frame).await {
            Ok(connection) => connection,
            Err(e) => {
                return Err(GatewayError::Network {
                    endpoint: endpoint.method().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        pending.insert(
            id,
            PendingCall {
                endpoint,
                connection,
                reply: tx,
            },
        );
        drop(pending);
        debug!(id, connection, method = endpoint.method(), "Socket request");

        let value = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(_)) => {
                return Err(GatewayError::Network {
                    endpoint: endpoint.method().to_string(),
                    reason: "reply channel closed".to_string(),
                });
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(id, method = endpoint.method(), "Socket request timed out");
                return Err(GatewayError::Timeout {
                    endpoint: endpoint.method().to_string(),
                    timeout: self.timeout,
                });
            }
        };

        serde_json::from_value(value).map_err(|e| GatewayError::InvalidResponse {
            endpoint: endpoint.method().to_string(),
            reason: e.to_string(),
        })
    }
}

impl Drop for SocketGateway {
    fn drop(&mut self) {
        self.router.abort();
    }
}

/// `(id, outcome)` if `frame` is a reply to one of our requests.
fn parse_reply(frame: &Value) -> Option<(u64, Result<Value, (u16, String)>)> {
    let id = frame.get("id")?.as_u64()?;
    if let Some(result) = frame.get("result") {
        return Some((id, Ok(result.clone())));
    }
    let error = frame.get("error")?;
    let status = error
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(500);
    let message = match error {
        Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    };
    Some((id, Err((status, message))))
}

/// Fail every pending call sent on connection `through` or earlier.
async fn fail_pending(pending: &PendingMap, reason: &str, through: u64) {
    let drained: Vec<PendingCall> = {
        let mut pending = pending.lock().await;
        let stale: Vec<u64> = pending
            .iter()
            .filter(|(_, call)| call.connection <= through)
            .map(|(id, _)| *id)
            .collect();
        stale.iter().filter_map(|id| pending.remove(id)).collect()
    };
    if !drained.is_empty() {
        warn!(count = drained.len(), reason, through, "Failing in-flight socket requests");
    }
    for call in drained {
        let _ = call.reply.send(Err(GatewayError::Network {
            endpoint: call.endpoint.method().to_string(),
            reason: reason.to_string(),
        }));
    }
}

async fn route(
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
    pending: PendingMap,
    out: mpsc::UnboundedSender<SocketEvent>,
) {
    // Connections opened so far; the client numbers them from 1 in order.
    let mut opened = 0u64;
    while let Some(event) = events.recv().await {
        match event {
            SocketEvent::Frame(frame) => {
                let Some((id, outcome)) = parse_reply(&frame) else {
                    let _ = out.send(SocketEvent::Frame(frame));
                    continue;
                };
                match pending.lock().await.remove(&id) {
                    Some(call) => {
                        let outcome = outcome.map_err(|(status, body)| GatewayError::Server {
                            endpoint: call.endpoint.method().to_string(),
                            status,
                            body,
                        });
                        let _ = call.reply.send(outcome);
                    }
                    None => debug!(id, "Reply for unknown or expired request"),
                }
            }
            SocketEvent::Reconnecting { .. } | SocketEvent::Failed { .. } => {
                fail_pending(&pending, "connection lost", opened).await;
                let _ = out.send(event);
            }
            SocketEvent::Disconnected => {
                fail_pending(&pending, "disconnected", opened).await;
                let _ = out.send(event);
            }
            SocketEvent::Connected => {
                opened += 1;
                let _ = out.send(event);
            }
        }
    }
    fail_pending(&pending, "event stream closed", u64::MAX).await;
}

#[async_trait]
impl BackendGateway for SocketGateway {
    async fn analyze_symptoms(
        &self,
        symptoms: &[String],
        profile: &PatientProfile,
    ) -> Result<SymptomAnalysis, GatewayError> {
        let params = AnalyzeRequest {
            symptoms,
            patient_info: profile,
        };
        self.call(Endpoint::AnalyzeSymptoms, &params).await
    }

    async fn generate_recommendations(
        &self,
        profile: &PatientProfile,
        history: &str,
    ) -> Result<Recommendations, GatewayError> {
        let params = RecommendRequest {
            patient_info: profile,
            medical_history: history,
        };
        self.call(Endpoint::GenerateRecommendations, &params).await
    }

    async fn get_queue_status(&self, specialty: &str) -> Result<QueueStatus, GatewayError> {
        self.call(Endpoint::QueueStatus, &QueueRequest { specialty })
            .await
    }

    async fn book_appointment(
        &self,
        specialty: &str,
        profile: &PatientProfile,
        date: NaiveDate,
        time: &str,
    ) -> Result<BookingConfirmation, GatewayError> {
        let params = BookingRequest {
            specialty,
            patient_info: profile,
            appointment_date: date,
            appointment_time: time,
        };
        self.call(Endpoint::BookAppointment, &params).await
    }

    async fn chat(
        &self,
        message: &str,
        patient_id: Option<&str>,
    ) -> Result<ChatReply, GatewayError> {
        self.call(Endpoint::Chat, &ChatRequest { message, patient_id })
            .await
    }

    async fn save_profile(&self, profile: &PatientProfile) -> Result<Acknowledgement, GatewayError> {
        self.call(Endpoint::SaveProfile, profile).await
    }
}
