//! Logging setup using `tracing-subscriber`.
//!
//! Console output filtered by `RUST_LOG`, either human-readable or one JSON
//! object per line for log shippers.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogFormat;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,whatsapp_webhook_relay=debug";

/// Install the global subscriber. Call once, at startup.
pub fn init(format: LogFormat) {
    let env_filter = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
    );

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
