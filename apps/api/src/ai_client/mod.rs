/// AI Client: relays scoring/chat/matching calls to the external AI service.
///
/// This service never looks inside the payloads: the client's JSON goes
/// upstream untouched and the upstream JSON comes back untouched.
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub mod handlers;

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI service error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("AI service returned invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("AI service unavailable after {retries} retries")]
    Exhausted { retries: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiService {
    Score,
    Chat,
    Match,
}

impl AiService {
    pub fn path(self) -> &'static str {
        match self {
            AiService::Score => "score",
            AiService::Chat => "chat",
            AiService::Match => "match",
        }
    }
}

impl FromStr for AiService {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "score" => Ok(AiService::Score),
            "chat" => Ok(AiService::Chat),
            "match" => Ok(AiService::Match),
            other => Err(format!(
                "Unknown AI service '{other}'. Expected one of: score, chat, match"
            )),
        }
    }
}

impl fmt::Display for AiService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Retrying JSON relay to `<base_url>/<service>`.
#[derive(Clone)]
pub struct AiClient {
    client: Client,
    base_url: String,
    backoff: Duration,
}

impl AiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AiError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            backoff: Duration::from_millis(1000),
        })
    }

    /// Base delay of the exponential backoff (1x, 2x, 4x ...).
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn endpoint(&self, service: AiService) -> String {
        format!("{}/{}", self.base_url, service.path())
    }

    /// Forwards `body` and returns the upstream JSON.
    /// Retries on 429 (rate limit), 5xx and transport errors with exponential backoff.
    pub async fn relay(&self, service: AiService, body: &Value) -> Result<Value, AiError> {
        let url = self.endpoint(service);
        let mut last_error: Option<AiError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = self.backoff * (1 << (attempt - 1));
                warn!(
                    "AI relay attempt {} to {} failed, retrying after {}ms...",
                    attempt,
                    service,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self.client.post(&url).json(body).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(AiError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let text = response.text().await.unwrap_or_default();
                warn!("AI service returned {}: {}", status, text);
                last_error = Some(AiError::Api {
                    status: status.as_u16(),
                    message: text,
                });
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(AiError::Api {
                    status: status.as_u16(),
                    message: text,
                });
            }

            let bytes = response.bytes().await?;
            let value: Value = serde_json::from_slice(&bytes)?;
            debug!(%service, bytes = bytes.len(), "AI relay succeeded");
            return Ok(value);
        }

        Err(last_error.unwrap_or(AiError::Exhausted {
            retries: MAX_RETRIES,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_names() {
        assert_eq!("score".parse::<AiService>().unwrap(), AiService::Score);
        assert_eq!("match".parse::<AiService>().unwrap(), AiService::Match);
        assert!("shell".parse::<AiService>().unwrap_err().contains("shell"));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = AiClient::new("http://ai.internal/v1/").unwrap();
        assert_eq!(client.endpoint(AiService::Chat), "http://ai.internal/v1/chat");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_an_error() {
        // Port 9 (discard) on loopback: connection refused.
        let client = AiClient::new("http://127.0.0.1:9")
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let err = client
            .relay(AiService::Score, &serde_json::json!({"cv": {}}))
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Http(_)));
    }
}
