//! Authenticated transport for Salesforce REST calls, with safe logging.
//!
//! Bulk job components never talk to reqwest directly. They hold an
//! `Arc<dyn Transport>` and hand it a [`TransportRequest`]; the
//! [`SalesforceClient`] implementation resolves the path against the
//! instance URL, attaches the bearer token, and reads the whole body.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use url::Url;

use crate::config::{ClientConfig, RequestOptions};
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all Salesforce API requests.
pub(crate) const CLIENT_USER_AGENT: &str = "sfharvest/0.1.0";

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "refresh_token",
    "client_secret",
    "code",
    "token",
    "sid",
    "session",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/services/data/v60.0/jobs/query`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/services/data/v60.0/jobs/query/750xx/results?locator=MTAw&maxRecords=100000`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Determines if a query parameter key is sensitive and should be redacted.
fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging based on the specified mode.
///
/// The result never contains the scheme, host, or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Boxed future returned by [`Transport::request`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransportResponse, AppError>> + Send + 'a>>;

/// One outbound call, described independently of the HTTP library.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    /// API path relative to the instance URL (e.g., "/services/data/v60.0/jobs/query").
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    /// JSON request body, if any.
    pub body: Option<serde_json::Value>,
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn query_pair(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Merges per-call overrides. Headers named in `options` replace earlier values.
    pub fn with_options(mut self, options: &RequestOptions) -> Self {
        for (name, value) in options.headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        if options.timeout.is_some() {
            self.timeout = options.timeout;
        }
        self
    }

    /// Returns the value of a query parameter, if present.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TransportResponse {
    /// Returns a header value as text, ignoring values that are not visible ASCII.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Capability to send authenticated requests to the remote service.
pub trait Transport: Send + Sync {
    fn request<'a>(&'a self, request: TransportRequest) -> TransportFuture<'a>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SalesforceClient
// ─────────────────────────────────────────────────────────────────────────────

/// reqwest-backed [`Transport`] bound to one Salesforce instance and token.
#[derive(Clone)]
pub struct SalesforceClient {
    /// The underlying HTTP client.
    http: reqwest::Client,
    instance_url: Url,
    access_token: SecretString,
    /// Controls URL sanitization for logging.
    logging_mode: LoggingMode,
}

impl std::fmt::Debug for SalesforceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceClient")
            .field("instance_url", &self.instance_url.as_str())
            .field("access_token", &"[REDACTED]")
            .field("logging_mode", &self.logging_mode)
            .finish()
    }
}

impl SalesforceClient {
    /// Creates a client for the configured instance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` if the instance URL cannot be parsed,
    /// or `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(config: &ClientConfig) -> Result<Self, AppError> {
        let instance_url = Url::parse(&config.instance_url)
            .map_err(|_| AppError::InvalidConfig("Invalid instance URL".to_string()))?;
        if instance_url.cannot_be_a_base() {
            return Err(AppError::InvalidConfig("Invalid instance URL".to_string()));
        }

        let http = build_http_client(config.timeout)?;
        Ok(Self {
            http,
            instance_url,
            access_token: config.access_token.clone(),
            logging_mode: config.logging_mode,
        })
    }

    /// Builds a full URL by joining the path with the instance URL.
    pub fn build_url(&self, path: &str, query: &[(String, String)]) -> Result<Url, AppError> {
        let mut url = self
            .instance_url
            .join(path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))?;

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Executes a single authenticated request with timing and logging.
    ///
    /// Never logs the Authorization header or bodies, and error messages
    /// never carry the raw URL.
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, AppError> {
        let url = self.build_url(&request.path, &request.query)?;
        let sanitized_url = sanitize_url_for_logs(&url, self.logging_mode);
        let method = request.method.clone();
        let start = Instant::now();

        let mut builder = self
            .http
            .request(request.method, url.as_str())
            .bearer_auth(self.access_token.expose_secret())
            .headers(request.headers);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(_) => {
                info!(
                    "[SFDC] {} {} FAILED {}ms",
                    method,
                    sanitized_url,
                    start.elapsed().as_millis()
                );
                return Err(AppError::Transport(
                    "Connection to Salesforce failed".to_string(),
                ));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let x_request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();

        let body = response.text().await.map_err(|_| {
            AppError::Transport("Failed to read Salesforce response body".to_string())
        })?;

        info!(
            "[SFDC] {} {} {} {}ms {}",
            method,
            sanitized_url,
            status.as_u16(),
            start.elapsed().as_millis(),
            x_request_id
        );

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

impl Transport for SalesforceClient {
    fn request<'a>(&'a self, request: TransportRequest) -> TransportFuture<'a> {
        Box::pin(self.execute(request))
    }
}

/// Builds the configured HTTP client.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
