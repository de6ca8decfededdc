//! HTTP API: status page, QR polling, health and direct sends

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::dispatcher::{OutboundDispatcher, normalize_target};
use crate::error::DispatchError;
use crate::session::Session;
use crate::types::*;

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub dispatcher: Arc<OutboundDispatcher>,
    /// Required on `POST /send` when set
    pub api_key: Option<String>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        session: Arc<Session>,
        dispatcher: Arc<OutboundDispatcher>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            session,
            dispatcher,
            api_key,
            started_at: Instant::now(),
        }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/qr-status", get(qr_status))
        .route("/send", post(send_message))
        .route("/health", get(health_check))
        .route("/status", get(status))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Middleware to log all incoming HTTP requests
async fn log_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    info!("🌐 HTTP {} {} -> {}", method, path, response.status());

    response
}

/// Pairing/status page; the QR code is fetched from `/qr-status`
async fn status_page() -> Html<&'static str> {
    Html(STATUS_PAGE)
}

async fn qr_status(State(state): State<AppState>) -> Json<QrStatusResponse> {
    let snapshot = state.session.current_status();
    Json(QrStatusResponse {
        connected: snapshot.connected,
        qr: snapshot.pairing_challenge,
        timestamp: snapshot.timestamp,
    })
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let whatsapp = if state.session.is_connected() {
        "connected"
    } else {
        "disconnected"
    };
    Json(HealthResponse {
        status: "running".to_string(),
        whatsapp: whatsapp.to_string(),
        timestamp: Utc::now(),
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        connected: state.session.is_connected(),
        timestamp: Utc::now(),
        uptime: state.started_at.elapsed().as_secs(),
    })
}

/// Send a message on behalf of an API caller
async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Response {
    if let Some(key) = &state.api_key
        && !is_authorized(&headers, key)
    {
        warn!("Rejected unauthenticated send request");
        return error_response(StatusCode::UNAUTHORIZED, ErrorResponse::new("Unauthorized"));
    }

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Invalid send request body: {}", rejection.body_text());
            SendRequest::default()
        }
    };

    let (to, text) = match (request.to, request.text) {
        (Some(to), Some(text)) if !to.trim().is_empty() && !text.is_empty() => (to, text),
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("Missing required fields: to, text"),
            );
        }
    };

    let jid = normalize_target(&to);
    match state
        .dispatcher
        .dispatch(OutboundRequest::direct_api(jid.clone(), text))
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(SendResponse {
                success: true,
                message: "Message sent successfully".to_string(),
                to: jid,
                timestamp: Utc::now(),
            }),
        )
            .into_response(),
        Err(DispatchError::NotConnected) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::new("WhatsApp not connected").with_status("disconnected"),
        ),
        Err(e) => {
            error!(to = %jid, error = %e, "API send failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Failed to send message").with_details(e.to_string()),
            )
        }
    }
}

/// Accepts `x-api-key: <key>` or `Authorization: Bearer <key>`
fn is_authorized(headers: &HeaderMap, key: &str) -> bool {
    let header_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    header_key == Some(key) || bearer == Some(key)
}

fn error_response(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

const STATUS_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>WhatsApp Webhook Relay</title>
<style>
  body { font-family: sans-serif; text-align: center; margin-top: 3em; }
  #qr img { width: 280px; height: 280px; }
  .connected { color: #1a7f37; }
  .disconnected { color: #b42318; }
</style>
</head>
<body>
<h1>WhatsApp Webhook Relay</h1>
<p id="state" class="disconnected">Checking...</p>
<div id="qr"></div>
<script>
async function refresh() {
  try {
    const res = await fetch('/qr-status');
    const body = await res.json();
    const state = document.getElementById('state');
    const qr = document.getElementById('qr');
    if (body.connected) {
      state.textContent = 'Connected';
      state.className = 'connected';
      qr.innerHTML = '';
    } else {
      state.textContent = body.qr ? 'Scan the QR code with WhatsApp' : 'Waiting for session...';
      state.className = 'disconnected';
      qr.innerHTML = body.qr ? '<img alt="pairing QR code" src="' + body.qr + '">' : '';
    }
  } catch (e) {
    document.getElementById('state').textContent = 'Relay unreachable';
  }
}
refresh();
setInterval(refresh, 3000);
</script>
</body>
</html>
"#;
