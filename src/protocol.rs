//! Seam between the relay and the messaging-protocol session.
//!
//! The protocol library (pairing, encryption, multi-device sync) runs outside
//! this crate. Whatever drives it implements [`MessagingClient`] and pushes
//! [`ProtocolEvent`]s into the channel handed to [`MessagingClient::connect`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::types::RawEnvelope;

/// Close code the protocol library uses when the device was logged out.
pub const LOGGED_OUT: u16 = 401;

/// Status code attached to a connection close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReason(pub u16);

impl CloseReason {
    /// Reported when the bridge gives no code.
    pub const UNKNOWN: CloseReason = CloseReason(0);

    /// The session was invalidated and needs a new pairing; reconnecting is pointless.
    pub fn is_logged_out(self) -> bool {
        self.0 == LOGGED_OUT
    }
}

/// Session lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A new pairing token must be scanned to link the device.
    PairingChallengeIssued(String),
    Opened,
    Closed(CloseReason),
}

/// Everything the protocol layer reports.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    Connection(ConnectionEvent),
    Message(Box<RawEnvelope>),
}

/// Capability interface of the external protocol session.
///
/// `connect` registers the event channel (the message and state-change
/// handlers) and starts the session. It may be called again after a close.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn connect(&self, events: mpsc::Sender<ProtocolEvent>) -> Result<(), ClientError>;

    /// Send a text message to a fully-qualified address.
    async fn send(&self, jid: &str, text: &str) -> Result<(), ClientError>;

    async fn logout(&self) -> Result<(), ClientError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// In-memory client recording every call.
    #[derive(Default)]
    pub struct MockClient {
        pub connects: AtomicUsize,
        pub logouts: AtomicUsize,
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail_connect: AtomicBool,
        pub fail_send: AtomicBool,
    }

    impl MockClient {
        pub fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl MessagingClient for MockClient {
        async fn connect(&self, _events: mpsc::Sender<ProtocolEvent>) -> Result<(), ClientError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(ClientError::Rejected {
                    status: 502,
                    body: "bridge unavailable".to_string(),
                });
            }
            Ok(())
        }

        async fn send(&self, jid: &str, text: &str) -> Result<(), ClientError> {
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(ClientError::NotConnected);
            }
            self.sent.lock().push((jid.to_string(), text.to_string()));
            Ok(())
        }

        async fn logout(&self) -> Result<(), ClientError> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
