//! WhatsApp Webhook Relay - Main Entry Point
//!
//! 1. Keeps a WhatsApp session alive through the bridge sidecar
//! 2. Forwards inbound messages to the automation webhook
//! 3. Sends the webhook's replies back to the originating chat

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use whatsapp_webhook_relay::{
    BridgeClient, MessageBroker, MessagingClient, OutboundDispatcher, RelayClient, RelayConfig,
    Session, logging,
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::from_env()?;
    logging::init(config.log_format);

    info!("🚀 WhatsApp Webhook Relay starting...");
    info!("📋 Configuration loaded, webhook: {}", config.webhook_url);

    let session = Arc::new(Session::new(
        config.reconnect_delay(),
        config.setup_retry_delay(),
    ));
    let client: Arc<dyn MessagingClient> = Arc::new(
        BridgeClient::new(config.bridge_url.clone()).context("failed to build bridge client")?,
    );
    let relay = RelayClient::new(&config).context("failed to build webhook client")?;
    let dispatcher = Arc::new(OutboundDispatcher::new(
        session.clone(),
        client.clone(),
        config.send_timeout(),
    ));

    let (broker, events) = MessageBroker::new(session.clone(), client, relay, dispatcher.clone());

    let http_addr: SocketAddr = config
        .http_addr
        .parse()
        .with_context(|| format!("invalid HTTP_ADDR: {}", config.http_addr))?;
    let state = AppState::new(session, dispatcher, config.api_key.clone());
    let http_server = spawn_http_server(http_addr, state);
    info!("🌐 HTTP server listening on {}", http_addr);

    let event_loop = tokio::spawn(broker.clone().run(events));
    broker.start().await;

    match signal::ctrl_c().await {
        Ok(()) => info!("📢 Shutdown signal received"),
        Err(err) => tracing::error!("Unable to listen for shutdown signal: {}", err),
    }

    info!("🛑 Shutting down...");
    broker.shutdown().await;
    event_loop.abort();
    http_server.abort();

    info!("✅ WhatsApp Webhook Relay stopped");
    Ok(())
}

/// Spawn the HTTP API server
fn spawn_http_server(addr: SocketAddr, state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = server::run_server(addr, state).await {
            tracing::error!("HTTP server error: {}", e);
        }
    })
}
