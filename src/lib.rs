//! WhatsApp Webhook Relay Library
//!
//! Keeps a WhatsApp session alive, forwards every inbound text message to an
//! automation webhook, and sends the webhook's reply back to the chat.
//!
//! # Architecture
//!
//! ```text
//! WhatsApp ◀──▶ Bridge sidecar ──events──▶ Relay (this) ──HTTP──▶ Automation webhook
//!                    ▲                        │                        │
//!                    └──────── send ──────────┴──────── reply ◀────────┘
//!                                             │
//!                                             ├── Session state machine
//!                                             ├── Message Broker (event loop)
//!                                             └── HTTP API (port 3000)
//! ```
//!
//! # Usage
//!
//! ```bash
//! export WEBHOOK_URL=https://automation.example.com/webhook/whatsapp
//! export BRIDGE_URL=http://127.0.0.1:3001   # optional
//! export API_KEY=your_api_key               # optional, guards POST /send
//!
//! whatsapp-webhook-relay
//! ```
//!
//! Open `http://localhost:3000/` and scan the pairing QR code. Once connected,
//! messages can also be sent directly:
//!
//! ```json
//! // POST /send
//! {"to": "5511999999999", "text": "Hello"}
//! ```

pub mod bridge;
pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod normalizer;
pub mod protocol;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod session;
pub mod status;
pub mod types;

pub use bridge::BridgeClient;
pub use broker::MessageBroker;
pub use config::RelayConfig;
pub use dispatcher::OutboundDispatcher;
pub use protocol::MessagingClient;
pub use relay::RelayClient;
pub use session::Session;
pub use types::*;

/// Prelude for common imports
pub mod prelude {
    pub use crate::broker::MessageBroker;
    pub use crate::config::RelayConfig;
    pub use crate::protocol::{ConnectionEvent, MessagingClient, ProtocolEvent};
    pub use crate::session::{ConnectionState, Session};
    pub use crate::types::*;
}
