//! Salesforce Bulk API v2 query jobs: submission and status polling.
//!
//! This module provides functionality to:
//! - Create bulk query jobs from SOQL
//! - Read job status, or wait for a terminal state with backoff
//! - Abort a job (best-effort)
//!
//! Result download lives in [`crate::salesforce::harvester`].
//!
//! # Security
//!
//! - Raw SOQL queries are never logged
//! - Auth headers and tokens are never logged
//! - Job ids are logged redacted

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, PollConfig, RequestOptions};
use crate::error::AppError;
use crate::salesforce::client::{Transport, TransportRequest, TransportResponse};
use crate::salesforce::API_VERSION;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a bulk job, named exactly as Salesforce reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkJobState {
    Open,
    UploadComplete,
    InProgress,
    Aborted,
    JobComplete,
    Failed,
    /// A state this client does not know about.
    #[serde(other)]
    Unknown,
}

impl BulkJobState {
    /// Returns true for states from which no further transition occurs.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BulkJobState::JobComplete | BulkJobState::Aborted | BulkJobState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BulkJobState::Open => "Open",
            BulkJobState::UploadComplete => "UploadComplete",
            BulkJobState::InProgress => "InProgress",
            BulkJobState::Aborted => "Aborted",
            BulkJobState::JobComplete => "JobComplete",
            BulkJobState::Failed => "Failed",
            BulkJobState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for BulkJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a bulk query job as last reported by Salesforce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Unique identifier for the job.
    pub id: String,
    /// Current state of the job.
    pub state: BulkJobState,
    #[serde(default)]
    pub operation: Option<String>,
    /// SOQL text, when the service echoes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// The sObject the query targets (e.g., "Account").
    #[serde(default)]
    pub object: Option<String>,
    /// User id of the job creator.
    #[serde(default)]
    pub created_by_id: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    /// Total records in the result set, once the job has finalized scope.
    #[serde(default)]
    pub number_records_processed: Option<u64>,
    /// Error message if job failed.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// A submitted bulk job as tracked by this client.
///
/// Fields other than `job_id` and `query` are only ever updated from a
/// status read, never inferred locally.
#[derive(Debug, Clone, Serialize)]
pub struct BulkJob {
    pub job_id: String,
    pub query: String,
    pub state: BulkJobState,
    pub total_records: Option<u64>,
    pub sfdc_object: Option<String>,
    pub creator_id: Option<String>,
}

impl BulkJob {
    /// A job just accepted by Salesforce.
    pub fn submitted(job_id: String, query: &str) -> Self {
        Self {
            job_id,
            query: query.to_string(),
            state: BulkJobState::Open,
            total_records: None,
            sfdc_object: None,
            creator_id: None,
        }
    }

    /// Copies the service-reported fields from a status read.
    pub fn apply_status(&mut self, status: &JobStatus) {
        self.state = status.state;
        if status.number_records_processed.is_some() {
            self.total_records = status.number_records_processed;
        }
        if status.object.is_some() {
            self.sfdc_object = status.object.clone();
        }
        if status.created_by_id.is_some() {
            self.creator_id = status.created_by_id.clone();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for creating a bulk query job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateQueryJobRequest<'a> {
    operation: &'static str,
    query: &'a str,
    content_type: &'static str,
}

/// Only the id is required from a creation response.
#[derive(Debug, Deserialize)]
struct CreatedJob {
    id: String,
}

/// Request body for aborting a bulk query job.
#[derive(Debug, Serialize)]
struct AbortJobRequest {
    state: &'static str,
}

/// Salesforce API error response format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SalesforceError {
    message: String,
    error_code: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkQueryClient
// ─────────────────────────────────────────────────────────────────────────────

/// Submits bulk query jobs and observes their lifecycle.
///
/// Holds the authenticated transport by reference count; it never forces
/// a state transition except through an explicit [`abort`](Self::abort).
#[derive(Clone)]
pub struct BulkQueryClient {
    transport: Arc<dyn Transport>,
    api_version: String,
}

impl BulkQueryClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            api_version: API_VERSION.to_string(),
        }
    }

    /// Creates a client that addresses the API version named in `config`.
    pub fn from_config(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self::new(transport).with_api_version(config.api_version.clone())
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Creates a new bulk query job.
    ///
    /// # Returns
    ///
    /// `Some(job_id)` on success, `None` if Salesforce accepted the request
    /// but the response carried no readable job id.
    ///
    /// # Errors
    ///
    /// - `AppError::Submission` - empty query (no request is sent), network
    ///   failure, or an error response from Salesforce
    /// - `AppError::RateLimited` - rate limit exceeded
    pub async fn submit(
        &self,
        soql: &str,
        options: &RequestOptions,
    ) -> Result<Option<String>, AppError> {
        if soql.trim().is_empty() {
            return Err(AppError::Submission("query must not be empty".to_string()));
        }

        let body = serde_json::to_value(CreateQueryJobRequest {
            operation: "query",
            query: soql,
            content_type: "CSV",
        })
        .map_err(|e| AppError::Internal(format!("Failed to encode job request: {}", e)))?;

        info!("[BULK] POST /jobs/query (creating job)");

        let request = TransportRequest::new(Method::POST, self.jobs_path())
            .json(body)
            .with_options(options);

        let response = self.transport.request(request).await.map_err(|e| match e {
            AppError::Transport(msg) => AppError::Submission(msg),
            other => other,
        })?;

        info!("[BULK] POST /jobs/query -> {}", response.status.as_u16());

        if !response.status.is_success() {
            return Err(match error_from_response(&response, None) {
                rate_limited @ AppError::RateLimited { .. } => rate_limited,
                other => AppError::Submission(other.to_string()),
            });
        }

        match serde_json::from_str::<CreatedJob>(&response.body) {
            Ok(job) if !job.id.is_empty() => {
                info!("[BULK] Created job {}", redact_id(&job.id));
                Ok(Some(job.id))
            }
            _ => {
                warn!("[BULK] Job creation response carried no job id");
                Ok(None)
            }
        }
    }

    /// Gets the current status of a bulk query job.
    ///
    /// A `Failed` or `Aborted` job is returned as a status, not an error.
    ///
    /// # Errors
    ///
    /// - `AppError::JobNotFound` - Salesforce does not know the job id
    /// - `AppError::Transport` - network failure or unreadable status payload
    pub async fn get_status(
        &self,
        job_id: &str,
        options: &RequestOptions,
    ) -> Result<JobStatus, AppError> {
        info!("[BULK] GET /jobs/query/{} (status)", redact_id(job_id));

        let request =
            TransportRequest::new(Method::GET, self.job_path(job_id)).with_options(options);
        let response = self.transport.request(request).await?;

        info!(
            "[BULK] GET /jobs/query/{} -> {}",
            redact_id(job_id),
            response.status.as_u16()
        );

        if !response.status.is_success() {
            return Err(error_from_response(&response, Some(job_id)));
        }

        serde_json::from_str(&response.body).map_err(|e| {
            AppError::Transport(format!("Failed to parse job status response: {}", e))
        })
    }

    /// Polls a job with exponential backoff until it reaches a terminal state.
    ///
    /// # Errors
    ///
    /// - `AppError::JobFailed` / `AppError::JobAborted` - terminal but unsuccessful
    /// - `AppError::PollTimeout` - `max_wait` elapsed first
    /// - any error from [`get_status`](Self::get_status), without retry
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        poll: &PollConfig,
        options: &RequestOptions,
    ) -> Result<JobStatus, AppError> {
        let poll_start = Instant::now();
        let mut interval = poll.initial_interval;

        loop {
            let status = self.get_status(job_id, options).await?;

            match status.state {
                BulkJobState::JobComplete => return Ok(status),
                BulkJobState::Failed => {
                    return Err(AppError::JobFailed {
                        job_id: job_id.to_string(),
                        message: status
                            .error_message
                            .unwrap_or_else(|| "Unknown error".to_string()),
                    })
                }
                BulkJobState::Aborted => return Err(AppError::JobAborted(job_id.to_string())),
                state => debug!("[BULK] Job {} is {}", redact_id(job_id), state),
            }

            if let Some(max_wait) = poll.max_wait {
                if poll_start.elapsed() >= max_wait {
                    return Err(AppError::PollTimeout {
                        job_id: job_id.to_string(),
                        waited_secs: poll_start.elapsed().as_secs(),
                    });
                }
            }

            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(poll.max_interval);
        }
    }

    /// Aborts a bulk query job (best-effort).
    ///
    /// The job may have already completed or failed.
    pub async fn abort(&self, job_id: &str, options: &RequestOptions) -> Result<(), AppError> {
        let body = serde_json::to_value(AbortJobRequest { state: "Aborted" })
            .map_err(|e| AppError::Internal(format!("Failed to encode abort request: {}", e)))?;

        info!("[BULK] PATCH /jobs/query/{} (aborting)", redact_id(job_id));

        let request = TransportRequest::new(Method::PATCH, self.job_path(job_id))
            .json(body)
            .with_options(options);
        let response = self.transport.request(request).await?;

        info!(
            "[BULK] PATCH /jobs/query/{} -> {}",
            redact_id(job_id),
            response.status.as_u16()
        );

        if !response.status.is_success() {
            return Err(error_from_response(&response, Some(job_id)));
        }

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Path Builders
    // ─────────────────────────────────────────────────────────────────────────

    /// /services/data/vXX.X/jobs/query
    fn jobs_path(&self) -> String {
        format!("/services/data/{}/jobs/query", self.api_version)
    }

    /// /services/data/vXX.X/jobs/query/{job_id}
    fn job_path(&self, job_id: &str) -> String {
        format!("{}/{}", self.jobs_path(), job_id)
    }

    /// /services/data/vXX.X/jobs/query/{job_id}/results
    pub(crate) fn results_path(&self, job_id: &str) -> String {
        format!("{}/results", self.job_path(job_id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Maps a non-success response to the matching `AppError`.
pub(crate) fn error_from_response(response: &TransportResponse, job_id: Option<&str>) -> AppError {
    let status = response.status;

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .header_str("Retry-After")
            .and_then(|s| s.parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    if status == StatusCode::NOT_FOUND {
        return AppError::JobNotFound(job_id.unwrap_or("unknown").to_string());
    }

    if let Ok(errors) = serde_json::from_str::<Vec<SalesforceError>>(&response.body) {
        if let Some(first_error) = errors.first() {
            if first_error.error_code == "REQUEST_LIMIT_EXCEEDED" {
                return AppError::RateLimited {
                    retry_after_secs: None,
                };
            }

            return AppError::SalesforceError(format!(
                "[{}] {}",
                first_error.error_code, first_error.message
            ));
        }
    }

    AppError::SalesforceError(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

/// Redacts a job ID for logging (shows first 8 chars).
pub(crate) fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
