//! Explicit configuration passed to each component at construction.
//!
//! Nothing here touches process-wide state. Callers build these values
//! directly or, for the Salesforce connection, read them from the
//! environment with [`ClientConfig::from_env`].

use std::time::Duration;

use reqwest::header::HeaderMap;
use secrecy::SecretString;

use crate::error::AppError;
use crate::salesforce::client::LoggingMode;
use crate::salesforce::API_VERSION;

/// Records requested per page after the first results fetch.
pub const DEFAULT_PAGE_SIZE: u64 = 100_000;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

const ENV_INSTANCE_URL: &str = "SALESFORCE_INSTANCE_URL";
const ENV_ACCESS_TOKEN: &str = "SALESFORCE_ACCESS_TOKEN";
const ENV_API_VERSION: &str = "SALESFORCE_API_VERSION";

// ─────────────────────────────────────────────────────────────────────────────
// ClientConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Connection settings for an authenticated Salesforce session.
#[derive(Clone)]
pub struct ClientConfig {
    /// Instance URL (e.g., "https://na1.salesforce.com")
    pub instance_url: String,
    /// Session or OAuth access token.
    pub access_token: SecretString,
    /// Salesforce API version (e.g., "v60.0")
    pub api_version: String,
    /// Default timeout applied to every request.
    pub timeout: Duration,
    /// Controls URL sanitization for logging.
    pub logging_mode: LoggingMode,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("instance_url", &self.instance_url)
            .field("access_token", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .field("logging_mode", &self.logging_mode)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(instance_url: impl Into<String>, access_token: SecretString) -> Self {
        Self {
            instance_url: instance_url.into(),
            access_token,
            api_version: API_VERSION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            logging_mode: LoggingMode::default(),
        }
    }

    /// Reads the connection from `SALESFORCE_INSTANCE_URL`,
    /// `SALESFORCE_ACCESS_TOKEN` and (optionally) `SALESFORCE_API_VERSION`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` if a required variable is missing.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let instance_url = lookup(ENV_INSTANCE_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::InvalidConfig(format!("{} is not set", ENV_INSTANCE_URL)))?;
        let token = lookup(ENV_ACCESS_TOKEN)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::InvalidConfig(format!("{} is not set", ENV_ACCESS_TOKEN)))?;

        let mut config = Self::new(instance_url, SecretString::from(token));
        if let Some(version) = lookup(ENV_API_VERSION).filter(|v| !v.trim().is_empty()) {
            config.api_version = version;
        }
        Ok(config)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RequestOptions
// ─────────────────────────────────────────────────────────────────────────────

/// Per-call transport overrides, merged on top of the client defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers. A header named here replaces the client default.
    pub headers: HeaderMap,
    /// Overrides the client-wide timeout for this call.
    pub timeout: Option<Duration>,
}

// ─────────────────────────────────────────────────────────────────────────────
// HarvestOptions
// ─────────────────────────────────────────────────────────────────────────────

/// How the harvester advances its running record tally after each page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageCountPolicy {
    /// Add the requested page size, whatever the page reports.
    #[default]
    TrustRequested,
    /// Compare the page's `Sforce-NumberOfRecords` with the requested
    /// size and fail with `IncompleteHarvest` on any mismatch.
    Reconcile,
}

/// Settings for a single harvest run.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Records requested per page after the first fetch.
    pub page_size: u64,
    pub page_count_policy: PageCountPolicy,
    /// Transport overrides applied to every results and status request.
    pub request: RequestOptions,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_count_policy: PageCountPolicy::default(),
            request: RequestOptions::default(),
        }
    }
}

impl HarvestOptions {
    /// Rejects settings the pagination loop cannot terminate with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.page_size == 0 {
            return Err(AppError::InvalidConfig(
                "page size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PollConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Backoff settings for waiting on a bulk job.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Give up after this long. `None` waits indefinitely.
    pub max_wait: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(2),
            max_wait: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_reads_required_values() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (ENV_INSTANCE_URL, "https://na1.salesforce.com"),
            (ENV_ACCESS_TOKEN, "00Dxx!token"),
        ]))
        .unwrap();

        assert_eq!(config.instance_url, "https://na1.salesforce.com");
        assert_eq!(config.access_token.expose_secret(), "00Dxx!token");
        assert_eq!(config.api_version, API_VERSION);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_from_lookup_overrides_api_version() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (ENV_INSTANCE_URL, "https://na1.salesforce.com"),
            (ENV_ACCESS_TOKEN, "token"),
            (ENV_API_VERSION, "v58.0"),
        ]))
        .unwrap();

        assert_eq!(config.api_version, "v58.0");
    }

    #[test]
    fn test_from_lookup_requires_token() {
        let result = ClientConfig::from_lookup(lookup_from(&[(
            ENV_INSTANCE_URL,
            "https://na1.salesforce.com",
        )]));

        match result {
            Err(AppError::InvalidConfig(msg)) => assert!(msg.contains(ENV_ACCESS_TOKEN)),
            other => panic!("Expected InvalidConfig, got: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_client_config_debug_redacts_token() {
        let config = ClientConfig::new(
            "https://na1.salesforce.com",
            SecretString::from("super_secret_token".to_string()),
        );

        let debug_output = format!("{:?}", config);

        assert!(debug_output.contains("na1.salesforce.com"));
        assert!(!debug_output.contains("super_secret_token"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_harvest_options_default_page_size() {
        let options = HarvestOptions::default();
        assert_eq!(options.page_size, 100_000);
        assert_eq!(options.page_count_policy, PageCountPolicy::TrustRequested);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_harvest_options_reject_zero_page_size() {
        let options = HarvestOptions {
            page_size: 0,
            ..HarvestOptions::default()
        };
        assert!(matches!(options.validate(), Err(AppError::InvalidConfig(_))));
    }
}
