//! Error taxonomy shared across the relay.
//!
//! Every failure inside the event loop is one of these values. None of them is
//! fatal: the broker logs them and moves on.

/// Errors raised by a [`MessagingClient`](crate::protocol::MessagingClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request to the protocol bridge failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge answered with a non-success status.
    #[error("bridge rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The protocol session is not open.
    #[error("not connected to WhatsApp")]
    NotConnected,
}

/// Why a webhook delivery failed.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Connection refused, reset, DNS failure, unreadable body.
    #[error("webhook request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("webhook did not answer within {0:?}")]
    Timeout(std::time::Duration),

    /// The webhook answered with a non-2xx status.
    #[error("webhook returned HTTP {0}")]
    HttpStatus(u16),
}

/// Why an outbound message could not be sent.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The session is not in the Connected state; nothing was sent.
    #[error("WhatsApp not connected")]
    NotConnected,

    /// The protocol layer failed or timed out while sending.
    #[error("send failed: {0}")]
    SendFailure(String),
}

/// The pairing token could not be encoded as a QR code.
#[derive(Debug, thiserror::Error)]
#[error("failed to render pairing QR code: {0}")]
pub struct QrRenderError(pub String);
