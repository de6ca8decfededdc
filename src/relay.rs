//! Webhook relay client
//!
//! Delivers each normalized inbound message to the automation endpoint with a
//! single bounded `POST`. Failures are reported, never retried.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::types::{NormalizedMessage, WebhookPayload};

/// Result of one webhook call
#[derive(Debug)]
pub enum RelayOutcome {
    /// 2xx answer; JSON body, a JSON string for plain-text bodies, or null when empty
    Delivered(Value),
    Failed(RelayError),
}

impl RelayOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, RelayOutcome::Delivered(_))
    }
}

/// HTTP client for the automation webhook
#[derive(Clone)]
pub struct RelayClient {
    http_client: Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
    debug_mode: bool,
}

impl RelayClient {
    /// Create a relay client from configuration
    pub fn new(config: &RelayConfig) -> Result<Self, reqwest::Error> {
        let mut client = Self::with_timeout(config.webhook_url.clone(), config.webhook_timeout())?;
        client.token = config.webhook_token.clone();
        client.debug_mode = config.debug_mode;
        Ok(client)
    }

    pub fn with_timeout(url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http_client: Client::builder().timeout(timeout).build()?,
            url,
            token: None,
            timeout,
            debug_mode: false,
        })
    }

    /// Forward a message to the webhook
    pub async fn relay(&self, message: &NormalizedMessage) -> RelayOutcome {
        let payload = WebhookPayload::from(message);
        debug!(
            message_id = %message.message_id,
            from = %message.sender_id,
            "Relaying message to webhook"
        );

        let mut request = self.http_client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return RelayOutcome::Failed(self.classify(e)),
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Webhook returned error status");
            return RelayOutcome::Failed(RelayError::HttpStatus(status.as_u16()));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return RelayOutcome::Failed(self.classify(e)),
        };

        if self.debug_mode {
            debug!("Raw webhook response: {}", body);
        }

        info!(
            message_id = %message.message_id,
            status = status.as_u16(),
            "Webhook accepted message"
        );
        RelayOutcome::Delivered(parse_body(&body))
    }

    fn classify(&self, error: reqwest::Error) -> RelayError {
        if error.is_timeout() {
            RelayError::Timeout(self.timeout)
        } else {
            RelayError::Network(error)
        }
    }
}

/// Parse a response body the way automation tools tend to answer:
/// JSON when possible, otherwise the raw text.
fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
