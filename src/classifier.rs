use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

const DETAILS: &str = "description,treatment";
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("No plant health API credential is configured")]
    Configuration,
    #[error("Plant health API rejected all {attempts} credential(s); last error: {last}")]
    Upstream { attempts: usize, last: String },
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Why a single credential attempt failed.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unreadable response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Client for the external plant health assessment API.
///
/// Credentials are tried strictly in order, one request each, stopping at
/// the first success. Attempts are sequential so every key keeps its own
/// rate limit.
#[derive(Debug, Clone)]
pub struct ClassificationClient {
    http: reqwest::Client,
    endpoint: String,
    credentials: Vec<String>,
}

impl ClassificationClient {
    pub fn new(
        endpoint: impl Into<String>,
        credentials: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            credentials,
        })
    }

    /// Submits a JPEG for health assessment and returns the raw response body.
    pub async fn assess(&self, jpeg: &[u8]) -> Result<Value, ClassifierError> {
        if self.credentials.is_empty() {
            return Err(ClassifierError::Configuration);
        }

        let request = json!({
            "images": [format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg))],
            "similar_images": true,
        });

        let mut last_error = None;
        for (index, credential) in self.credentials.iter().enumerate() {
            let attempt = index + 1;
            match self.attempt(credential, &request).await {
                Ok(body) => {
                    tracing::info!(attempt, "plant health API accepted request");
                    return Ok(body);
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "plant health API attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(ClassifierError::Upstream {
            attempts: self.credentials.len(),
            last: last_error.map(|err| err.to_string()).unwrap_or_default(),
        })
    }

    async fn attempt(&self, credential: &str, request: &Value) -> Result<Value, AttemptError> {
        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("details", DETAILS)])
            .header("Api-Key", credential)
            .json(request)
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
            return Err(AttemptError::Status { status, body });
        }

        response.json::<Value>().await.map_err(AttemptError::Body)
    }
}

fn floor_char_boundary(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    (0..=max).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0)
}
