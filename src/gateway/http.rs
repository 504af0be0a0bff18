//! JSON POST gateway to the backend REST endpoints.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{
    Acknowledgement, AnalyzeRequest, BackendGateway, BookingConfirmation, BookingRequest,
    ChatReply, ChatRequest, Endpoint, QueueRequest, QueueStatus, RecommendRequest,
    Recommendations, SymptomAnalysis,
};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::intake::PatientProfile;

/// Gateway over plain HTTP.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Network {
                endpoint: config.base_url.clone(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
        })
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    fn transport_error(&self, endpoint: Endpoint, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                endpoint: endpoint.path().to_string(),
                timeout: self.timeout,
            }
        } else {
            GatewayError::Network {
                endpoint: endpoint.path().to_string(),
                reason: e.to_string(),
            }
        }
    }

    async fn post<B, R>(&self, endpoint: Endpoint, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        tracing::debug!(endpoint = %endpoint, "Backend request");

        let resp = self
            .client
            .post(self.url(endpoint))
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(endpoint, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(endpoint = %endpoint, status = status.as_u16(), "Backend returned an error");
            return Err(GatewayError::Server {
                endpoint: endpoint.path().to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| self.transport_error(endpoint, e))?;

        serde_json::from_slice(&bytes).map_err(|e| GatewayError::InvalidResponse {
            endpoint: endpoint.path().to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl BackendGateway for HttpGateway {
    async fn analyze_symptoms(
        &self,
        symptoms: &[String],
        profile: &PatientProfile,
    ) -> Result<SymptomAnalysis, GatewayError> {
        let body = AnalyzeRequest {
            symptoms,
            patient_info: profile,
        };
        self.post(Endpoint::AnalyzeSymptoms, &body).await
    }

    async fn generate_recommendations(
        &self,
        profile: &PatientProfile,
        history: &str,
    ) -> Result<Recommendations, GatewayError> {
        let body = RecommendRequest {
            patient_info: profile,
            medical_history: history,
        };
        self.post(Endpoint::GenerateRecommendations, &body).await
    }

    async fn get_queue_status(&self, specialty: &str) -> Result<QueueStatus, GatewayError> {
        self.post(Endpoint::QueueStatus, &QueueRequest { specialty })
            .await
    }

    async fn book_appointment(
        &self,
        specialty: &str,
        profile: &PatientProfile,
        date: NaiveDate,
        time: &str,
    ) -> Result<BookingConfirmation, GatewayError> {
        let body = BookingRequest {
            specialty,
            patient_info: profile,
            appointment_date: date,
            appointment_time: time,
        };
        self.post(Endpoint::BookAppointment, &body).await
    }

    async fn chat(
        &self,
        message: &str,
        patient_id: Option<&str>,
    ) -> Result<ChatReply, GatewayError> {
        self.post(Endpoint::Chat, &ChatRequest { message, patient_id })
            .await
    }

    async fn save_profile(&self, profile: &PatientProfile) -> Result<Acknowledgement, GatewayError> {
        self.post(Endpoint::SaveProfile, profile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let config = GatewayConfig {
            base_url: "http://localhost:8000/".to_string(),
            request_timeout: Duration::from_secs(1),
        };
        let gateway = HttpGateway::new(&config).unwrap();
        assert_eq!(
            gateway.url(Endpoint::AnalyzeSymptoms),
            "http://localhost:8000/api/analyze-symptoms"
        );
        assert_eq!(gateway.url(Endpoint::Chat), "http://localhost:8000/chat");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let config = GatewayConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout: Duration::from_secs(2),
        };
        let gateway = HttpGateway::new(&config).unwrap();
        let err = gateway.get_queue_status("Nội khoa").await.unwrap_err();
        assert!(
            matches!(err, GatewayError::Network { .. } | GatewayError::Timeout { .. }),
            "unexpected error: {err:?}"
        );
    }
}
