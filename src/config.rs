//! Configuration management

use std::time::Duration;

use anyhow::{Context, Result};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Relay service configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    // =========================================================================
    // Automation Webhook
    // =========================================================================
    /// Endpoint every inbound message is posted to
    pub webhook_url: String,

    /// Bearer token sent with webhook calls
    pub webhook_token: Option<String>,

    /// Webhook request timeout in seconds
    pub webhook_timeout_secs: u64,

    // =========================================================================
    // WhatsApp Bridge
    // =========================================================================
    /// Base URL of the protocol bridge sidecar
    pub bridge_url: String,

    /// Delay before reconnecting after a dropped connection
    pub reconnect_delay_secs: u64,

    /// Delay before retrying a connection attempt that failed to start
    pub setup_retry_delay_secs: u64,

    /// Outbound send timeout in seconds
    pub send_timeout_secs: u64,

    // =========================================================================
    // HTTP API
    // =========================================================================
    /// HTTP server bind address
    pub http_addr: String,

    /// API key required on `POST /send` (unset = open)
    pub api_key: Option<String>,

    // =========================================================================
    // Diagnostics
    // =========================================================================
    /// Log raw webhook responses
    pub debug_mode: bool,

    pub log_format: LogFormat,
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:3001".to_string()
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_setup_retry_delay() -> u64 {
    10
}

fn default_send_timeout() -> u64 {
    30
}

fn default_http_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build configuration from a variable lookup
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let webhook_url = var("WEBHOOK_URL")
            .filter(|s| !s.trim().is_empty())
            .context("WEBHOOK_URL is required")?;

        let number = |key: &str, default: u64| -> Result<u64> {
            match var(key) {
                Some(s) => s
                    .trim()
                    .parse()
                    .with_context(|| format!("{key} must be a whole number of seconds")),
                None => Ok(default),
            }
        };

        let log_format = match var("LOG_FORMAT").as_deref().map(str::trim) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            webhook_url,
            webhook_token: var("WEBHOOK_TOKEN").filter(|s| !s.is_empty()),
            webhook_timeout_secs: number("WEBHOOK_TIMEOUT_SECS", default_webhook_timeout())?,
            bridge_url: var("BRIDGE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(default_bridge_url),
            reconnect_delay_secs: number("RECONNECT_DELAY_SECS", default_reconnect_delay())?,
            setup_retry_delay_secs: number(
                "SETUP_RETRY_DELAY_SECS",
                default_setup_retry_delay(),
            )?,
            send_timeout_secs: number("SEND_TIMEOUT_SECS", default_send_timeout())?,
            http_addr: var("HTTP_ADDR").unwrap_or_else(default_http_addr),
            api_key: var("API_KEY").filter(|s| !s.is_empty()),
            debug_mode: var("DEBUG_MODE").is_some(),
            log_format,
        })
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn setup_retry_delay(&self) -> Duration {
        Duration::from_secs(self.setup_retry_delay_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<RelayConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("WEBHOOK_URL", "http://n8n.local/webhook/wa")]).unwrap();
        assert_eq!(config.webhook_url, "http://n8n.local/webhook/wa");
        assert_eq!(config.webhook_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.setup_retry_delay(), Duration::from_secs(10));
        assert_eq!(config.send_timeout(), Duration::from_secs(30));
        assert_eq!(config.bridge_url, "http://127.0.0.1:3001");
        assert_eq!(config.http_addr, "0.0.0.0:3000");
        assert!(config.api_key.is_none());
        assert!(config.webhook_token.is_none());
        assert!(!config.debug_mode);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_webhook_url_required() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("WEBHOOK_URL"));

        assert!(load(&[("WEBHOOK_URL", "  ")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WEBHOOK_URL", "http://hook"),
            ("WEBHOOK_TOKEN", "tok"),
            ("WEBHOOK_TIMEOUT_SECS", "3"),
            ("BRIDGE_URL", "http://bridge:3001/"),
            ("RECONNECT_DELAY_SECS", "7"),
            ("API_KEY", "k"),
            ("DEBUG_MODE", "1"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.webhook_token.as_deref(), Some("tok"));
        assert_eq!(config.webhook_timeout(), Duration::from_secs(3));
        assert_eq!(config.bridge_url, "http://bridge:3001");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(7));
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert!(config.debug_mode);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = load(&[("WEBHOOK_URL", "http://hook"), ("SEND_TIMEOUT_SECS", "soon")])
            .unwrap_err();
        assert!(err.to_string().contains("SEND_TIMEOUT_SECS"));
    }
}
