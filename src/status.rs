//! Status surface: read-only view of the session for HTTP callers

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use qrcode::QrCode;
use qrcode::render::svg;
use serde::Serialize;

use crate::error::QrRenderError;

/// Point-in-time view of the connection.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub connected: bool,
    /// Data URI of the current pairing QR code, if one is pending
    pub pairing_challenge: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Encode a pairing token as an SVG QR code wrapped in a data URI.
pub fn render_qr_data_uri(token: &str) -> Result<String, QrRenderError> {
    let code = QrCode::new(token.as_bytes()).map_err(|e| QrRenderError(e.to_string()))?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build();

    Ok(format!(
        "data:image/svg+xml;base64,{}",
        BASE64.encode(image.as_bytes())
    ))
}
