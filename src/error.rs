use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "refresh_token",
    "access_token",
    "client_secret",
    "authorization:",
    "password",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for the command line.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Bulk Jobs ─────────────────────────────────────────────────────────────
    #[error("Bulk job submission failed: {0}")]
    Submission(String),

    #[error("Bulk job not found: {0}")]
    JobNotFound(String),

    #[error("Bulk job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Bulk job {0} was aborted")]
    JobAborted(String),

    #[error("Bulk job {job_id} did not finish within {waited_secs}s")]
    PollTimeout { job_id: String, waited_secs: u64 },

    #[error("Harvest of job {job_id} incomplete: {processed} of {total} records")]
    IncompleteHarvest {
        job_id: String,
        processed: u64,
        total: u64,
    },

    // ── API ───────────────────────────────────────────────────────────────────
    #[error("Salesforce error: {0}")]
    SalesforceError(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Transport error: {0}")]
    Transport(String),

    // ── Operators ─────────────────────────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(String),

    #[error("SSH tunnel error: {0}")]
    Tunnel(String),

    #[error("Survey API error: {0}")]
    Survey(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a user-friendly presentation suitable for display.
    /// Never leaks secrets, tokens, or sensitive URL parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Bulk Jobs ─────────────────────────────────────────────────────
            AppError::Submission(msg) => ErrorPresentation {
                title: "Job Submission Failed".into(),
                message: sanitize_message(msg, "The bulk query job could not be created."),
                action: Some("Check the query and try again".into()),
            },

            AppError::JobNotFound(job_id) => ErrorPresentation {
                title: "Job Not Found".into(),
                message: format!("Salesforce does not know bulk job {}.", job_id),
                action: Some("Check the job id".into()),
            },

            AppError::JobFailed { job_id: _, message } => ErrorPresentation {
                title: "Bulk Job Failed".into(),
                message: sanitize_message(message, "The bulk query job failed."),
                action: Some("Review the error and submit a new job".into()),
            },

            AppError::JobAborted(_) => ErrorPresentation {
                title: "Bulk Job Aborted".into(),
                message: "The bulk query job was aborted before it completed.".into(),
                action: Some("Submit a new job".into()),
            },

            AppError::PollTimeout { waited_secs, .. } => ErrorPresentation {
                title: "Job Still Running".into(),
                message: format!(
                    "The bulk query job did not complete within {} seconds.",
                    waited_secs
                ),
                action: Some("Harvest the job later by its id".into()),
            },

            AppError::IncompleteHarvest {
                processed, total, ..
            } => ErrorPresentation {
                title: "Incomplete Export".into(),
                message: format!(
                    "Only {} of {} records were retrieved. The output file is not valid.",
                    processed, total
                ),
                action: Some("Discard the file and harvest the job again".into()),
            },

            // ── API ───────────────────────────────────────────────────────────
            AppError::SalesforceError(msg) => ErrorPresentation {
                title: "Salesforce Error".into(),
                message: sanitize_message(msg, "A Salesforce error occurred."),
                action: None,
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("Salesforce is limiting requests. {}", wait_msg),
                    action: Some("Wait and retry".into()),
                }
            }

            // ── Network ───────────────────────────────────────────────────────
            AppError::Transport(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "The remote service could not be reached or answered unexpectedly."
                    .into(),
                action: Some("Check network and retry".into()),
            },

            // ── Operators ─────────────────────────────────────────────────────
            AppError::Database(msg) => ErrorPresentation {
                title: "Database Error".into(),
                message: sanitize_message(msg, "The database operation failed."),
                action: None,
            },

            AppError::Tunnel(msg) => ErrorPresentation {
                title: "SSH Tunnel Error".into(),
                message: sanitize_message(msg, "The SSH tunnel could not be managed."),
                action: Some("Check the SSH server settings".into()),
            },

            AppError::Survey(msg) => ErrorPresentation {
                title: "Survey API Error".into(),
                message: sanitize_message(msg, "The survey service returned an error."),
                action: None,
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::InvalidConfig(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: sanitize_message(msg, "The configuration is invalid."),
                action: Some("Fix the configuration and try again".into()),
            },

            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns all AppError variants for exhaustive testing.
    fn all_variants() -> Vec<AppError> {
        vec![
            AppError::Submission("empty query".into()),
            AppError::JobNotFound("750xx000000001".into()),
            AppError::JobFailed {
                job_id: "750xx000000001".into(),
                message: "test failure".into(),
            },
            AppError::JobAborted("750xx000000001".into()),
            AppError::PollTimeout {
                job_id: "750xx000000001".into(),
                waited_secs: 600,
            },
            AppError::IncompleteHarvest {
                job_id: "750xx000000001".into(),
                processed: 10,
                total: 20,
            },
            AppError::SalesforceError("test sf error".into()),
            AppError::RateLimited {
                retry_after_secs: Some(30),
            },
            AppError::RateLimited {
                retry_after_secs: None,
            },
            AppError::Transport("timeout".into()),
            AppError::Database("relation does not exist".into()),
            AppError::Tunnel("ssh exited".into()),
            AppError::Survey("HTTP 401".into()),
            AppError::InvalidConfig("page size".into()),
            AppError::Internal("something broke".into()),
        ]
    }

    #[test]
    fn test_all_variants_have_nonempty_title_and_message() {
        for variant in all_variants() {
            let presentation = variant.to_presentation();
            assert!(
                !presentation.title.trim().is_empty(),
                "Empty title for {:?}",
                variant
            );
            assert!(
                !presentation.message.trim().is_empty(),
                "Empty message for {:?}",
                variant
            );
        }
    }

    #[test]
    fn test_incomplete_harvest_reports_counts() {
        let presentation = AppError::IncompleteHarvest {
            job_id: "750xx".into(),
            processed: 150000,
            total: 250000,
        }
        .to_presentation();

        assert!(presentation.message.contains("150000"));
        assert!(presentation.message.contains("250000"));
        let action = presentation.action.expect("IncompleteHarvest should have action");
        assert!(action.to_lowercase().contains("discard"));
    }

    #[test]
    fn test_rate_limited_suggests_wait_retry() {
        let presentation = AppError::RateLimited {
            retry_after_secs: Some(30),
        }
        .to_presentation();
        let action = presentation.action.expect("RateLimited should have action");
        let action_lower = action.to_lowercase();
        assert!(action_lower.contains("wait") || action_lower.contains("retry"));
        assert!(presentation.message.contains("30"));
    }

    #[test]
    fn test_serialization_produces_valid_json_with_required_fields() {
        for variant in all_variants() {
            let json = serde_json::to_string(&variant)
                .unwrap_or_else(|_| panic!("Failed to serialize {:?}", variant));
            let parsed: serde_json::Value = serde_json::from_str(&json)
                .unwrap_or_else(|_| panic!("Failed to parse JSON for {:?}", variant));

            assert!(parsed.get("title").is_some(), "{:?} missing title", variant);
            assert!(parsed.get("message").is_some(), "{:?} missing message", variant);
            assert!(parsed.get("action").is_some(), "{:?} missing action", variant);
        }
    }

    #[test]
    fn test_no_secret_leakage_in_presentation() {
        let test_cases: Vec<(&str, AppError)> = vec![
            (
                "Submission",
                AppError::Submission("Authorization: Bearer abc123".into()),
            ),
            (
                "SalesforceError",
                AppError::SalesforceError("AUTHORIZATION: Bearer token".into()),
            ),
            (
                "Transport",
                AppError::Transport("access_token=xyz client_secret=abc".into()),
            ),
            (
                "Database",
                AppError::Database("password authentication failed".into()),
            ),
            (
                "JobFailed",
                AppError::JobFailed {
                    job_id: "750xx".into(),
                    message: "Bearer token invalid".into(),
                },
            ),
        ];

        for (label, variant) in test_cases {
            let presentation = variant.to_presentation();
            let output_lower = format!(
                "{} {} {}",
                presentation.title,
                presentation.message,
                presentation.action.as_deref().unwrap_or("")
            )
            .to_ascii_lowercase();

            for pattern in SENSITIVE_PATTERNS {
                assert!(
                    !output_lower.contains(pattern),
                    "{} presentation contains sensitive pattern {}",
                    label,
                    pattern
                );
            }
        }
    }
}
