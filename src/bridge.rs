//! HTTP client for the WhatsApp protocol sidecar.
//!
//! The sidecar runs the protocol library (pairing, encryption, multi-device
//! sync) and exposes it over a small HTTP API. Events are fetched by
//! long-polling `/events/poll` and pushed into the broker's channel.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::protocol::{CloseReason, ConnectionEvent, MessagingClient, ProtocolEvent};
use crate::types::RawEnvelope;

/// HTTP connect timeout for bridge calls
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Timeout for non-polling bridge calls
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Long-poll timeout; the bridge answers with an empty list before this
const POLL_TIMEOUT_SECS: u64 = 60;

/// Initial and maximum delay between failed polls (milliseconds)
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Event as serialized by the sidecar
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeEvent {
    /// New pairing QR token
    Qr { qr: String },
    Open,
    Close {
        #[serde(rename = "statusCode", default)]
        status_code: Option<u16>,
    },
    Message { message: Box<RawEnvelope> },
}

impl From<BridgeEvent> for ProtocolEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Qr { qr } => {
                ProtocolEvent::Connection(ConnectionEvent::PairingChallengeIssued(qr))
            }
            BridgeEvent::Open => ProtocolEvent::Connection(ConnectionEvent::Opened),
            BridgeEvent::Close { status_code } => ProtocolEvent::Connection(
                ConnectionEvent::Closed(status_code.map_or(CloseReason::UNKNOWN, CloseReason)),
            ),
            BridgeEvent::Message { message } => ProtocolEvent::Message(message),
        }
    }
}

/// [`MessagingClient`] backed by the sidecar's HTTP API
pub struct BridgeClient {
    client: Client,
    poll_client: Client,
    base_url: String,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let poll_client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            poll_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poller: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Rejected { status, body });
        }
        Ok(())
    }

    /// Replace the running poller, if any.
    fn spawn_poller(&self, events: mpsc::Sender<ProtocolEvent>) {
        let poll_url = format!("{}/events/poll", self.base_url);
        let client = self.poll_client.clone();
        let handle = tokio::spawn(poll_loop(client, poll_url, events));

        if let Some(previous) = self.poller.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl MessagingClient for BridgeClient {
    async fn connect(&self, events: mpsc::Sender<ProtocolEvent>) -> Result<(), ClientError> {
        info!(url = %self.base_url, "Connecting to WhatsApp bridge");
        self.post("/connect", serde_json::json!({})).await?;
        self.spawn_poller(events);
        Ok(())
    }

    async fn send(&self, jid: &str, text: &str) -> Result<(), ClientError> {
        self.post("/send", serde_json::json!({ "jid": jid, "text": text }))
            .await?;
        debug!(jid, "message handed to bridge");
        Ok(())
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.post("/logout", serde_json::json!({})).await?;
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
        }
        info!("Logged out of WhatsApp bridge");
        Ok(())
    }
}

/// Decode a poll batch event by event. Unknown or malformed entries are
/// skipped so they cannot take the rest of the batch down with them.
fn decode_batch(batch: Vec<serde_json::Value>) -> Vec<BridgeEvent> {
    batch
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<BridgeEvent>(raw) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, "skipping unrecognized bridge event");
                None
            }
        })
        .collect()
}

/// Poll the bridge until the receiver goes away, backing off on errors.
async fn poll_loop(client: Client, poll_url: String, events: mpsc::Sender<ProtocolEvent>) {
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        match client.get(&poll_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                backoff_ms = INITIAL_BACKOFF_MS;
                match resp.json::<Vec<serde_json::Value>>().await {
                    Ok(batch) => {
                        for event in decode_batch(batch) {
                            debug!(?event, "received bridge event");
                            if events.send(event.into()).await.is_err() {
                                // Receiver dropped, shut down cleanly.
                                return;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "unreadable bridge event batch"),
                }
                continue;
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "event poll returned non-200");
            }
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                warn!(error = %e, backoff_ms, "bridge event poll failed");
            }
        }

        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
    }
}
