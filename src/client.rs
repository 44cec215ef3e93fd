//! HTTP client for a running authorship engine.
//!
//! Used by the CLI to replay recorded sessions and fetch results, and by
//! integration tests.

use crate::core::{ScoringResult, SessionKey};
use crate::events::TelemetryReport;
use crate::store::SubmissionRecord;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Where the engine is reachable.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL, e.g. `http://127.0.0.1:8080`
    pub base_url: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }

    pub fn telemetry_url(&self) -> String {
        format!("{}/api/telemetry", self.base_url)
    }

    pub fn submission_url(&self, key: SessionKey) -> String {
        format!(
            "{}/api/activities/{}/submissions/{}",
            self.base_url, key.activity_id, key.student_id
        )
    }
}

/// Client error types.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client config error: {0}")]
    Config(String),
    #[error("Network error: {0}")]
    Network(String),
    /// The engine answered with an error status; 503 is retryable
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Whether resending the same report may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Server { status, .. } => *status == 503,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

/// Async client for the engine's HTTP API.
#[derive(Debug, Clone)]
pub struct ReportClient {
    config: ClientConfig,
    client: reqwest::Client,
}

impl ReportClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Self::parse(response).await
    }

    /// Send one report and return the recomputed result.
    pub async fn send_report(
        &self,
        report: &TelemetryReport,
    ) -> Result<ScoringResult, ClientError> {
        let response = self
            .client
            .post(self.config.telemetry_url())
            .json(report)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Self::parse(response).await
    }

    /// Send a report, resending it while the failure is retryable.
    pub async fn send_report_with_retry(
        &self,
        report: &TelemetryReport,
        attempts: u32,
    ) -> Result<ScoringResult, ClientError> {
        let mut attempt = 1;
        loop {
            match self.send_report(report).await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(attempt, "Report delivery failed, retrying: {e}");
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Fetch the stored record of a submission, `None` if there is none.
    pub async fn submission_result(
        &self,
        key: SessionKey,
    ) -> Result<Option<SubmissionRecord>, ClientError> {
        let response = self
            .client
            .get(self.config.submission_url(key))
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse(response).await.map(Some)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

/// Blocking client for use in synchronous contexts.
pub struct BlockingReportClient {
    inner: ReportClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingReportClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: ReportClient::new(config)?,
            runtime,
        })
    }

    pub fn health(&self) -> Result<HealthStatus, ClientError> {
        self.runtime.block_on(self.inner.health())
    }

    pub fn send_report(&self, report: &TelemetryReport) -> Result<ScoringResult, ClientError> {
        self.runtime.block_on(self.inner.send_report(report))
    }

    pub fn send_report_with_retry(
        &self,
        report: &TelemetryReport,
        attempts: u32,
    ) -> Result<ScoringResult, ClientError> {
        self.runtime
            .block_on(self.inner.send_report_with_retry(report, attempts))
    }

    pub fn submission_result(
        &self,
        key: SessionKey,
    ) -> Result<Option<SubmissionRecord>, ClientError> {
        self.runtime.block_on(self.inner.submission_result(key))
    }
}
