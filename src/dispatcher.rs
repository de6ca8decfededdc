//! Outbound dispatcher: sends replies and API messages through the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::protocol::MessagingClient;
use crate::session::Session;
use crate::types::OutboundRequest;

/// Default address domain for bare phone numbers
const USER_DOMAIN: &str = "@s.whatsapp.net";

pub struct OutboundDispatcher {
    session: Arc<Session>,
    client: Arc<dyn MessagingClient>,
    send_timeout: Duration,
}

impl OutboundDispatcher {
    pub fn new(
        session: Arc<Session>,
        client: Arc<dyn MessagingClient>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            session,
            client,
            send_timeout,
        }
    }

    /// Send one outbound message. Fails fast without touching the network
    /// unless the session is connected.
    pub async fn dispatch(&self, request: OutboundRequest) -> Result<(), DispatchError> {
        if !self.session.is_connected() {
            debug!(origin = ?request.origin, "Dropping send, session not connected");
            return Err(DispatchError::NotConnected);
        }

        let jid = normalize_target(&request.target_id);
        match timeout(self.send_timeout, self.client.send(&jid, &request.text)).await {
            Ok(Ok(())) => {
                info!(to = %jid, origin = ?request.origin, "📤 Message sent");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(to = %jid, error = %e, "Send failed");
                Err(DispatchError::SendFailure(e.to_string()))
            }
            Err(_) => {
                warn!(to = %jid, "Send timed out");
                Err(DispatchError::SendFailure(format!(
                    "timed out after {}s",
                    self.send_timeout.as_secs()
                )))
            }
        }
    }
}

/// Fully-qualify a target address. Addresses that already carry a domain are
/// left untouched; bare numbers get the user domain.
pub fn normalize_target(target: &str) -> String {
    let target = target.trim();
    if target.contains('@') {
        return target.to_string();
    }
    format!("{}{}", target.trim_start_matches('+'), USER_DOMAIN)
}
