//! Inbound normalizer: turns protocol envelopes into [`NormalizedMessage`]s.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{MessageContent, NormalizedMessage, RawEnvelope, SourceKind};

/// Transport suffixes stripped from sender addresses
const ADDRESS_SUFFIXES: [&str; 5] = [
    "@s.whatsapp.net",
    "@c.us",
    "@g.us",
    "@lid",
    "@broadcast",
];

/// Pseudo-chat carrying status updates; never forwarded
const STATUS_BROADCAST: &str = "status@broadcast";

/// Normalize an inbound envelope.
///
/// Returns `None` for messages sent by this session, status broadcasts,
/// envelopes without a chat address and envelopes without a recognized text
/// field.
pub fn normalize(envelope: &RawEnvelope) -> Option<NormalizedMessage> {
    let key = &envelope.key;
    if key.from_me || key.remote_jid.is_empty() || key.remote_jid == STATUS_BROADCAST {
        return None;
    }

    let (source_kind, text) = extract_text(envelope.message.as_ref()?)?;

    let sender = key
        .participant
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(&key.remote_jid);

    Some(NormalizedMessage {
        sender_id: strip_address(sender),
        chat_id: key.remote_jid.clone(),
        text: text.trim().to_string(),
        timestamp: envelope
            .message_timestamp
            .as_ref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now),
        message_id: key
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        source_kind,
    })
}

/// First recognized text field, in fixed order.
fn extract_text(content: &MessageContent) -> Option<(SourceKind, &str)> {
    if let Some(text) = content.conversation.as_deref() {
        return Some((SourceKind::Conversation, text));
    }
    if let Some(text) = content
        .extended_text_message
        .as_ref()
        .and_then(|m| m.text.as_deref())
    {
        return Some((SourceKind::ExtendedTextMessage, text));
    }

    [
        (SourceKind::ImageMessage, &content.image_message),
        (SourceKind::VideoMessage, &content.video_message),
        (SourceKind::DocumentMessage, &content.document_message),
    ]
    .into_iter()
    .find_map(|(kind, media)| {
        media
            .as_ref()
            .and_then(|m| m.caption.as_deref())
            .map(|caption| (kind, caption))
    })
}

/// `123:7@s.whatsapp.net` -> `123`
pub fn strip_address(address: &str) -> String {
    let bare = ADDRESS_SUFFIXES
        .iter()
        .find_map(|suffix| address.strip_suffix(suffix))
        .unwrap_or(address);

    // Multi-device addresses carry a `:device` qualifier
    match bare.split_once(':') {
        Some((user, _device)) => user.to_string(),
        None => bare.to_string(),
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    DateTime::from_timestamp(secs, 0)
}
