//! Message types for the WhatsApp protocol bridge, the webhook and the HTTP API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Inbound Envelope (from the protocol layer)
// =============================================================================

/// Raw message envelope as emitted by the protocol library.
///
/// Only the fields the normalizer reads are modelled; everything else in the
/// upstream payload is ignored during deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEnvelope {
    #[serde(default)]
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<MessageContent>,
    /// Unix seconds; the library sends either a number or a numeric string
    #[serde(default)]
    pub message_timestamp: Option<serde_json::Value>,
}

/// Addressing part of an envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Chat the message belongs to (contact or group JID)
    #[serde(default, deserialize_with = "null_as_default")]
    pub remote_jid: String,
    /// Whether this session sent the message
    #[serde(default, deserialize_with = "null_as_default")]
    pub from_me: bool,
    #[serde(default)]
    pub id: Option<String>,
    /// Actual author inside a group chat
    #[serde(default)]
    pub participant: Option<String>,
}

/// Key fields arrive as explicit `null` from some library versions.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Message body variants. At most one is normally set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedText>,
    #[serde(default)]
    pub image_message: Option<MediaMessage>,
    #[serde(default)]
    pub video_message: Option<MediaMessage>,
    #[serde(default)]
    pub document_message: Option<MediaMessage>,
}

/// Text with quote/link preview metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

/// Media message; only the caption is relevant here
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaMessage {
    #[serde(default)]
    pub caption: Option<String>,
}

// =============================================================================
// Relay Types
// =============================================================================

/// Envelope kind a normalized message was extracted from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    Conversation,
    ExtendedTextMessage,
    ImageMessage,
    VideoMessage,
    DocumentMessage,
}

/// Canonical inbound message forwarded to the webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    /// Bare contact identifier, transport suffix stripped
    pub sender_id: String,
    /// Full address of the chat, used as the reply target
    pub chat_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
    pub source_kind: SourceKind,
}

/// Body of the webhook call
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload<'a> {
    pub from: &'a str,
    pub text: &'a str,
    pub timestamp: DateTime<Utc>,
    pub message_id: &'a str,
    pub message_type: SourceKind,
}

impl<'a> From<&'a NormalizedMessage> for WebhookPayload<'a> {
    fn from(msg: &'a NormalizedMessage) -> Self {
        Self {
            from: &msg.sender_id,
            text: &msg.text,
            timestamp: msg.timestamp,
            message_id: &msg.message_id,
            message_type: msg.source_kind,
        }
    }
}

/// Where an outbound message came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Reply resolved from a webhook response
    RelayReply,
    /// `POST /send` API call
    DirectApi,
}

/// A message to send back through the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub target_id: String,
    pub text: String,
    pub origin: Origin,
}

impl OutboundRequest {
    pub fn relay_reply(target_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            text: text.into(),
            origin: Origin::RelayReply,
        }
    }

    pub fn direct_api(target_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            text: text.into(),
            origin: Origin::DirectApi,
        }
    }
}

// =============================================================================
// HTTP API Types
// =============================================================================

/// `POST /send` request body. Fields are optional so that missing values
/// produce a 400 with a JSON body instead of an extractor rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// `POST /send` success body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    pub message: String,
    pub to: String,
    pub timestamp: DateTime<Utc>,
}

/// JSON error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: None,
            details: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// `GET /qr-status` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrStatusResponse {
    pub connected: bool,
    pub qr: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// `GET /health` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub whatsapp: String,
    pub timestamp: DateTime<Utc>,
}

/// `GET /status` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub connected: bool,
    pub timestamp: DateTime<Utc>,
    /// Seconds since process start
    pub uptime: u64,
}
