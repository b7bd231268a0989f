//! In-memory [`Transport`] for driving bulk components without a server.

use std::collections::VecDeque;
use std::sync::Mutex;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;

use crate::error::AppError;
use crate::salesforce::client::{Transport, TransportFuture, TransportRequest, TransportResponse};

/// Replays a fixed script of responses and records every request it receives.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, AppError>>>,
    fallback: Option<TransportResponse>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Result<TransportResponse, AppError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every request with the same response.
    pub(crate) fn repeating(response: TransportResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self, request: TransportRequest) -> Result<TransportResponse, AppError> {
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(response) => response,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AppError::Transport("script exhausted".to_string())),
        }
    }
}

impl Transport for ScriptedTransport {
    fn request<'a>(&'a self, request: TransportRequest) -> TransportFuture<'a> {
        let response = self.next_response(request);
        Box::pin(async move { response })
    }
}

/// A 200 response with optional `Sforce-NumberOfRecords` and `Sforce-Locator` headers.
pub(crate) fn page(body: &str, record_count: Option<u64>, locator: Option<&str>) -> TransportResponse {
    let mut headers = HeaderMap::new();
    if let Some(count) = record_count {
        headers.insert("sforce-numberofrecords", HeaderValue::from(count));
    }
    if let Some(locator) = locator {
        headers.insert(
            "sforce-locator",
            HeaderValue::from_str(locator).unwrap(),
        );
    }
    TransportResponse {
        status: StatusCode::OK,
        headers,
        body: body.to_string(),
    }
}

/// A 200 status response for `job_id` reporting `total` records.
pub(crate) fn status_page(job_id: &str, state: &str, total: u64) -> TransportResponse {
    let body = serde_json::json!({
        "id": job_id,
        "state": state,
        "object": "Account",
        "createdById": "005xx0000001AAA",
        "numberRecordsProcessed": total
    });
    page(&body.to_string(), None, None)
}
