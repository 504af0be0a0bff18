//! Backend gateway: the remote analysis and booking capability.
//!
//! The engine talks to the backend only through [`BackendGateway`]. Two
//! implementations ship with the crate:
//! - [`HttpGateway`]: JSON POST over HTTP via reqwest
//! - [`SocketGateway`]: request/reply frames over the resilient push socket

pub mod http;
pub mod socket;

pub use http::HttpGateway;
pub use socket::SocketGateway;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::GatewayError;
use crate::intake::PatientProfile;

/// Remote calls the intake depends on. Every call may fail; callers treat
/// all failures the same way.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    async fn analyze_symptoms(
        &self,
        symptoms: &[String],
        profile: &PatientProfile,
    ) -> Result<SymptomAnalysis, GatewayError>;

    async fn generate_recommendations(
        &self,
        profile: &PatientProfile,
        history: &str,
    ) -> Result<Recommendations, GatewayError>;

    async fn get_queue_status(&self, specialty: &str) -> Result<QueueStatus, GatewayError>;

    async fn book_appointment(
        &self,
        specialty: &str,
        profile: &PatientProfile,
        date: NaiveDate,
        time: &str,
    ) -> Result<BookingConfirmation, GatewayError>;

    /// Free-form chat, outside the question phases.
    async fn chat(&self, message: &str, patient_id: Option<&str>)
    -> Result<ChatReply, GatewayError>;

    /// Store the full profile.
    async fn save_profile(&self, profile: &PatientProfile) -> Result<Acknowledgement, GatewayError>;
}

// ── Endpoints ───────────────────────────────────────────────────────────

/// The backend operations, with their HTTP path and socket method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Chat,
    AnalyzeSymptoms,
    GenerateRecommendations,
    QueueStatus,
    BookAppointment,
    SaveProfile,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Chat => "/chat",
            Self::AnalyzeSymptoms => "/api/analyze-symptoms",
            Self::GenerateRecommendations => "/api/generate-recommendations",
            Self::QueueStatus => "/api/queue-status",
            Self::BookAppointment => "/api/book-appointment",
            Self::SaveProfile => "/patient",
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::AnalyzeSymptoms => "analyze_symptoms",
            Self::GenerateRecommendations => "generate_recommendations",
            Self::QueueStatus => "queue_status",
            Self::BookAppointment => "book_appointment",
            Self::SaveProfile => "save_profile",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

// ── Request bodies ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    pub patient_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest<'a> {
    pub symptoms: &'a [String],
    pub patient_info: &'a PatientProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendRequest<'a> {
    pub patient_info: &'a PatientProfile,
    pub medical_history: &'a str,
}

#[derive(Debug, Serialize)]
pub struct QueueRequest<'a> {
    pub specialty: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest<'a> {
    pub specialty: &'a str,
    pub patient_info: &'a PatientProfile,
    pub appointment_date: NaiveDate,
    pub appointment_time: &'a str,
}

// ── Responses ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymptomAnalysis {
    #[serde(default)]
    pub needs_more_info: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_specialty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    pub specialty: String,
    pub urgency: String,
    /// Free text or minutes, depending on the backend.
    #[serde(deserialize_with = "string_or_number")]
    pub estimated_wait_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub current_number: u32,
    #[serde(rename = "waiting_time")]
    pub waiting_time_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingConfirmation {
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Everything else the backend returned.
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default)]
    pub patient_id: Option<String>,
}

/// Opaque acknowledgement body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acknowledgement(pub serde_json::Value);

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
