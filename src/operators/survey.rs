//! Survey API operator (Typeform-compatible REST).
//!
//! Lists forms and their responses and flattens each submission into a
//! single JSON object ready for loading. Only the first page of forms and
//! responses is read.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderValue, AUTHORIZATION, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;
use url::Url;

use crate::error::AppError;
use crate::salesforce::client::CLIENT_USER_AGENT;

/// Default survey API endpoint.
pub const DEFAULT_SURVEY_BASE_URL: &str = "https://api.typeform.com";

const SURVEY_TIMEOUT_SECS: u64 = 60;

/// Submission keys that are not part of the metadata view.
const NON_METADATA_KEYS: &[&str] = &["answers", "variables", "calculated", "hidden"];

/// A form as listed by `GET /forms`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FormSummary {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct FormList {
    #[serde(default)]
    items: Vec<FormSummary>,
}

/// One page of submissions for a form.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsePage {
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub items: Vec<Value>,
}

/// Which parts of a submission to include besides its answers.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionFields {
    pub metadata: bool,
    pub hidden: bool,
}

impl Default for SubmissionFields {
    fn default() -> Self {
        Self {
            metadata: true,
            hidden: true,
        }
    }
}

/// Client for a survey account.
#[derive(Clone)]
pub struct SurveyOperator {
    http: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
}

impl std::fmt::Debug for SurveyOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurveyOperator")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl SurveyOperator {
    /// Connects to [`DEFAULT_SURVEY_BASE_URL`].
    pub fn new(api_key: SecretString) -> Result<Self, AppError> {
        Self::with_base_url(DEFAULT_SURVEY_BASE_URL, api_key)
    }

    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` if `base_url` is not a valid URL.
    pub fn with_base_url(base_url: &str, api_key: SecretString) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::InvalidConfig(format!("Invalid survey API URL: {}", e)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(SURVEY_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub async fn list_forms(&self) -> Result<Vec<FormSummary>, AppError> {
        let forms: FormList = self.get_json(&["forms"]).await?;
        Ok(forms.items)
    }

    pub async fn form_ids(&self) -> Result<Vec<String>, AppError> {
        Ok(self.list_forms().await?.into_iter().map(|f| f.id).collect())
    }

    pub async fn form_titles(&self) -> Result<Vec<String>, AppError> {
        Ok(self
            .list_forms()
            .await?
            .into_iter()
            .map(|f| f.title)
            .collect())
    }

    pub async fn list_responses(&self, form_id: &str) -> Result<ResponsePage, AppError> {
        self.get_json(&["forms", form_id, "responses"]).await
    }

    /// Returns one flattened object per submission of `form_id`.
    ///
    /// Keys are merged metadata first, then hidden fields, then answers,
    /// with later keys replacing earlier ones.
    pub async fn submission_data(
        &self,
        form_id: &str,
        fields: SubmissionFields,
    ) -> Result<Vec<Map<String, Value>>, AppError> {
        let page = self.list_responses(form_id).await?;
        page.items
            .iter()
            .map(|item| flatten_submission(item, fields))
            .collect()
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::InvalidConfig("Survey API URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key.expose_secret()))
            .map_err(|_| AppError::InvalidConfig("Survey API key is not a valid header".to_string()))?;
        auth.set_sensitive(true);

        let start = Instant::now();
        let response = self
            .http
            .get(url.clone())
            .header(AUTHORIZATION, auth)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await
            .map_err(|_| AppError::Survey("Connection to survey API failed".to_string()))?;

        let status = response.status();
        info!(
            "[SURVEY] GET {} {} {}ms",
            url.path(),
            status.as_u16(),
            start.elapsed().as_millis()
        );

        if !status.is_success() {
            return Err(AppError::Survey(format!(
                "HTTP {} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Survey(format!("Failed to parse response: {}", e)))
    }
}

/// Flattens one submission into metadata, hidden fields and answers.
pub fn flatten_submission(
    item: &Value,
    fields: SubmissionFields,
) -> Result<Map<String, Value>, AppError> {
    let submission = item
        .as_object()
        .ok_or_else(|| AppError::Survey("Submission is not a JSON object".to_string()))?;

    let mut flat = Map::new();

    if fields.metadata {
        for (key, value) in submission {
            if !NON_METADATA_KEYS.contains(&key.as_str()) {
                flat.insert(key.clone(), value.clone());
            }
        }
    }

    if fields.hidden {
        if let Some(hidden) = submission.get("hidden").and_then(Value::as_object) {
            for (key, value) in hidden {
                flat.insert(key.clone(), value.clone());
            }
        }
    }

    let answers = submission
        .get("answers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for answer in answers {
        let key = answer
            .pointer("/field/ref")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Survey("Answer has no field ref".to_string()))?;
        flat.insert(key.to_string(), answer_value(answer));
    }

    Ok(flat)
}

/// The answer's value, picked by its `type`.
fn answer_value(answer: &Value) -> Value {
    let kind = answer.get("type").and_then(Value::as_str).unwrap_or_default();
    let picked = match kind {
        "choice" => answer.pointer("/choice/label"),
        "choices" => answer
            .pointer("/choices/labels")
            .or_else(|| answer.pointer("/choices/other")),
        other => answer.get(other),
    };
    picked.cloned().unwrap_or(Value::Null)
}
