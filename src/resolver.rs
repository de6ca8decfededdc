//! Reply resolver: extracts the reply text from a webhook response.
//!
//! Recognized shapes, in priority order:
//!
//! 1. the response itself is a string;
//! 2. an object carrying a string in one of [`REPLY_FIELDS`], checked in the
//!    listed order. The first field that holds a non-blank string wins, no
//!    matter how many of the others are present.
//!
//! Anything else (null, numbers, arrays, objects without a usable field) has
//! no reply and nothing is sent.

use serde_json::Value;

/// Object fields that may carry the reply, highest priority first.
pub const REPLY_FIELDS: [&str; 5] = ["reply", "message", "text", "response", "data"];

/// A recognized response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape<'a> {
    Direct(&'a str),
    Field { name: &'static str, value: &'a str },
}

impl<'a> ReplyShape<'a> {
    /// Match a response against the known shapes.
    pub fn decode(raw: &'a Value) -> Option<Self> {
        match raw {
            Value::String(s) if !s.trim().is_empty() => Some(ReplyShape::Direct(s)),
            Value::Object(map) => REPLY_FIELDS.iter().find_map(|&name| match map.get(name) {
                Some(Value::String(s)) if !s.trim().is_empty() => {
                    Some(ReplyShape::Field { name, value: s })
                }
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn text(&self) -> &'a str {
        match *self {
            ReplyShape::Direct(text) => text,
            ReplyShape::Field { value, .. } => value,
        }
    }
}

/// Reply text for a webhook response, if it has one.
pub fn resolve(raw: &Value) -> Option<String> {
    ReplyShape::decode(raw).map(|shape| shape.text().to_string())
}
