//! Connection state machine for the single WhatsApp session.
//!
//! Owns the lifecycle (`Disconnected → AwaitingPairing → Connected → Closing`),
//! the pending pairing challenge and the reconnect policy. The broker feeds it
//! protocol events and acts on the returned [`NextStep`]; HTTP handlers only
//! read it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::protocol::{CloseReason, ConnectionEvent};
use crate::status::{StatusSnapshot, render_qr_data_uri};

/// Lifecycle states of the session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    AwaitingPairing,
    Connected,
    /// Shutdown in progress; no reconnects are scheduled
    Closing,
}

/// Pairing token together with its rendered form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingChallenge {
    pub token: String,
    /// `None` if the token could not be rendered
    pub data_uri: Option<String>,
}

/// What the caller has to do after a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Idle,
    /// Start a timer and call [`Session::take_reconnect`] when it fires
    ScheduleReconnect(Duration),
    /// Session invalidated; it has to be re-paired out of band
    Terminal,
}

#[derive(Debug)]
struct SessionState {
    state: ConnectionState,
    pairing: Option<PairingChallenge>,
    last_close: Option<CloseReason>,
    reconnect_pending: bool,
    invalidated: bool,
    updated_at: DateTime<Utc>,
}

/// The per-process session record
pub struct Session {
    inner: RwLock<SessionState>,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_delay: Duration,
    setup_retry_delay: Duration,
}

impl Session {
    pub fn new(reconnect_delay: Duration, setup_retry_delay: Duration) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: RwLock::new(SessionState {
                state: ConnectionState::Disconnected,
                pairing: None,
                last_close: None,
                reconnect_pending: false,
                invalidated: false,
                updated_at: Utc::now(),
            }),
            state_tx,
            reconnect_delay,
            setup_retry_delay,
        }
    }

    /// Apply a lifecycle event from the protocol layer.
    pub fn on_event(&self, event: ConnectionEvent) -> NextStep {
        // Rendering happens before taking the lock so readers are never held up by it.
        let pairing = match &event {
            ConnectionEvent::PairingChallengeIssued(token) => {
                let data_uri = match render_qr_data_uri(token) {
                    Ok(uri) => Some(uri),
                    Err(e) => {
                        warn!(error = %e, "pairing challenge could not be rendered");
                        None
                    }
                };
                Some(PairingChallenge {
                    token: token.clone(),
                    data_uri,
                })
            }
            _ => None,
        };

        let mut guard = self.inner.write();
        if guard.state == ConnectionState::Closing
            && !matches!(event, ConnectionEvent::Closed(_))
        {
            debug!(?event, "shutdown in progress, ignoring connection event");
            return NextStep::Idle;
        }

        let next = match event {
            ConnectionEvent::PairingChallengeIssued(_) => {
                info!("📱 Pairing challenge issued, waiting for scan");
                guard.state = ConnectionState::AwaitingPairing;
                guard.pairing = pairing;
                NextStep::Idle
            }
            ConnectionEvent::Opened => {
                info!("✅ WhatsApp session connected");
                guard.state = ConnectionState::Connected;
                guard.pairing = None;
                guard.invalidated = false;
                NextStep::Idle
            }
            ConnectionEvent::Closed(reason) => {
                let closing = guard.state == ConnectionState::Closing;
                guard.last_close = Some(reason);
                guard.pairing = None;
                if !closing {
                    guard.state = ConnectionState::Disconnected;
                }

                if reason.is_logged_out() {
                    warn!(
                        code = reason.0,
                        "WhatsApp session logged out; re-pair the device to continue"
                    );
                    guard.invalidated = true;
                    NextStep::Terminal
                } else if closing || guard.invalidated {
                    debug!(code = reason.0, "connection closed, not reconnecting");
                    NextStep::Idle
                } else {
                    info!(code = reason.0, "connection closed");
                    Self::schedule(&mut guard, self.reconnect_delay)
                }
            }
        };

        guard.updated_at = Utc::now();
        self.state_tx.send_replace(guard.state);
        next
    }

    /// A connection attempt failed before the protocol produced any event.
    pub fn on_connect_failed(&self) -> NextStep {
        let mut guard = self.inner.write();
        if guard.state == ConnectionState::Closing || guard.invalidated {
            return NextStep::Idle;
        }
        Self::schedule(&mut guard, self.setup_retry_delay)
    }

    fn schedule(guard: &mut SessionState, delay: Duration) -> NextStep {
        if guard.reconnect_pending {
            debug!("reconnect already pending");
            return NextStep::Idle;
        }
        guard.reconnect_pending = true;
        info!(delay_secs = delay.as_secs(), "🔄 Reconnect scheduled");
        NextStep::ScheduleReconnect(delay)
    }

    /// Called when a reconnect timer fires. Clears the pending flag and
    /// reports whether a connection attempt should still be made.
    pub fn take_reconnect(&self) -> bool {
        let mut guard = self.inner.write();
        guard.reconnect_pending = false;
        guard.state == ConnectionState::Disconnected && !guard.invalidated
    }

    /// Enter `Closing`. Pending timers become no-ops.
    pub fn begin_shutdown(&self) {
        let mut guard = self.inner.write();
        guard.state = ConnectionState::Closing;
        guard.pairing = None;
        guard.updated_at = Utc::now();
        self.state_tx.send_replace(guard.state);
    }

    /// Shutdown finished; the session stays disconnected.
    pub fn finish_shutdown(&self) {
        let mut guard = self.inner.write();
        guard.state = ConnectionState::Disconnected;
        guard.invalidated = true;
        guard.updated_at = Utc::now();
        self.state_tx.send_replace(guard.state);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.read().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn pairing_challenge(&self) -> Option<PairingChallenge> {
        self.inner.read().pairing.clone()
    }

    pub fn last_close(&self) -> Option<CloseReason> {
        self.inner.read().last_close
    }

    pub fn reconnect_pending(&self) -> bool {
        self.inner.read().reconnect_pending
    }

    /// Time of the last state change
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.inner.read().updated_at
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Current connection and pairing status.
    pub fn current_status(&self) -> StatusSnapshot {
        let guard = self.inner.read();
        StatusSnapshot {
            connected: guard.state == ConnectionState::Connected,
            pairing_challenge: guard.pairing.as_ref().and_then(|p| p.data_uri.clone()),
            timestamp: Utc::now(),
        }
    }
}
