//! Message broker - runs the session event loop and connects the pipeline
//!
//! Events from the protocol layer are consumed one at a time. State events
//! go to the [`Session`]; message events are normalized and then relayed,
//! resolved and dispatched on their own task so a slow webhook never stalls
//! the loop.

use std::future::{Future, poll_fn};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::dispatcher::OutboundDispatcher;
use crate::error::DispatchError;
use crate::normalizer;
use crate::protocol::{MessagingClient, ProtocolEvent};
use crate::relay::{RelayClient, RelayOutcome};
use crate::resolver::ReplyShape;
use crate::session::{NextStep, Session};
use crate::types::{NormalizedMessage, OutboundRequest};

/// Capacity of the protocol event channel
const EVENT_BUFFER: usize = 256;

/// Upper bound on the logout call during shutdown
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Message broker state
pub struct MessageBroker {
    session: Arc<Session>,
    client: Arc<dyn MessagingClient>,
    relay: RelayClient,
    dispatcher: Arc<OutboundDispatcher>,
    events_tx: mpsc::Sender<ProtocolEvent>,
    /// Fires once the most recently spawned relay has been issued
    last_relay: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MessageBroker {
    /// Create the broker and the receiving end of its event channel.
    pub fn new(
        session: Arc<Session>,
        client: Arc<dyn MessagingClient>,
        relay: RelayClient,
        dispatcher: Arc<OutboundDispatcher>,
    ) -> (Arc<Self>, mpsc::Receiver<ProtocolEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let broker = Arc::new(Self {
            session,
            client,
            relay,
            dispatcher,
            events_tx,
            last_relay: Mutex::new(None),
        });
        (broker, events_rx)
    }

    /// Start the first connection attempt.
    pub async fn start(self: &Arc<Self>) {
        self.connect().await;
    }

    /// Consume protocol events until every sender is gone.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ProtocolEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("Protocol event channel closed");
    }

    /// Handle a single protocol event.
    pub fn handle_event(self: &Arc<Self>, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Connection(event) => {
                let next = self.session.on_event(event);
                self.apply(next);
            }
            ProtocolEvent::Message(envelope) => {
                let Some(message) = normalizer::normalize(&envelope) else {
                    debug!(
                        chat = %envelope.key.remote_jid,
                        from_me = envelope.key.from_me,
                        "Ignoring inbound event"
                    );
                    return;
                };
                info!(
                    "📥 Message {} from {} ({:?})",
                    message.message_id, message.sender_id, message.source_kind
                );

                let (started_tx, started_rx) = oneshot::channel();
                let previous = self.last_relay.lock().replace(started_rx);
                let broker = self.clone();
                tokio::spawn(async move {
                    broker.forward_after(message, previous, started_tx).await;
                });
            }
        }
    }

    /// Relay one message and send the reply back, if there is one.
    pub async fn forward(&self, message: NormalizedMessage) {
        let outcome = self.relay.relay(&message).await;
        self.reply(&message, outcome).await;
    }

    /// Like [`forward`](Self::forward), but the webhook call is only issued
    /// after the previous message's call, keeping relays in arrival order.
    /// Responses are still awaited concurrently.
    async fn forward_after(
        &self,
        message: NormalizedMessage,
        previous: Option<oneshot::Receiver<()>>,
        started: oneshot::Sender<()>,
    ) {
        if let Some(previous) = previous {
            // A dropped sender means the previous task is gone; go ahead.
            let _ = previous.await;
        }

        let outcome = {
            let mut delivery = pin!(self.relay.relay(&message));
            let mut started = Some(started);
            poll_fn(|cx| {
                let poll = delivery.as_mut().poll(cx);
                if let Some(started) = started.take() {
                    let _ = started.send(());
                }
                poll
            })
            .await
        };
        self.reply(&message, outcome).await;
    }

    async fn reply(&self, message: &NormalizedMessage, outcome: RelayOutcome) {
        let raw = match outcome {
            RelayOutcome::Delivered(raw) => raw,
            RelayOutcome::Failed(e) => {
                warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Dropping message, webhook delivery failed"
                );
                return;
            }
        };

        let Some(shape) = ReplyShape::decode(&raw) else {
            warn!(
                message_id = %message.message_id,
                "Webhook response has no reply, nothing to send"
            );
            return;
        };
        if let ReplyShape::Field { name, .. } = shape {
            debug!(field = name, "Reply resolved from response field");
        }

        let request = OutboundRequest::relay_reply(message.chat_id.clone(), shape.text());
        match self.dispatcher.dispatch(request).await {
            Ok(()) => {}
            Err(DispatchError::NotConnected) => {
                warn!(
                    message_id = %message.message_id,
                    "Reply dropped, session not connected"
                );
            }
            Err(e) => {
                error!(message_id = %message.message_id, error = %e, "Reply could not be sent");
            }
        }
    }

    /// Log out and leave the session disconnected.
    pub async fn shutdown(&self) {
        self.session.begin_shutdown();
        match timeout(LOGOUT_TIMEOUT, self.client.logout()).await {
            Ok(Ok(())) => info!("👋 Session logged out"),
            Ok(Err(e)) => warn!(error = %e, "Logout failed"),
            Err(_) => warn!("Logout timed out"),
        }
        self.session.finish_shutdown();
    }

    async fn connect(self: &Arc<Self>) {
        match self.client.connect(self.events_tx.clone()).await {
            Ok(()) => info!("🔌 Connection attempt started"),
            Err(e) => {
                error!(error = %e, "Connection setup failed");
                let next = self.session.on_connect_failed();
                self.apply(next);
            }
        }
    }

    fn apply(self: &Arc<Self>, next: NextStep) {
        match next {
            NextStep::Idle => {}
            NextStep::Terminal => {
                warn!("Session invalidated, automatic reconnect disabled");
            }
            NextStep::ScheduleReconnect(delay) => {
                let broker = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if broker.session.take_reconnect() {
                        broker.connect().await;
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::MockClient;
    use crate::protocol::{CloseReason, ConnectionEvent, LOGGED_OUT};
    use crate::session::ConnectionState;
    use crate::types::{RawEnvelope, SourceKind};
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn build(client: Arc<MockClient>, webhook_url: String) -> (Arc<Session>, Arc<MessageBroker>) {
        let session = Arc::new(Session::new(Duration::from_secs(5), Duration::from_secs(10)));
        let relay = RelayClient::with_timeout(webhook_url, Duration::from_secs(5)).unwrap();
        let dispatcher = Arc::new(OutboundDispatcher::new(
            session.clone(),
            client.clone(),
            Duration::from_secs(5),
        ));
        let (broker, _events) = MessageBroker::new(session.clone(), client, relay, dispatcher);
        (session, broker)
    }

    async fn webhook(reply: Value) -> String {
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<Value>| {
                let reply = reply.clone();
                async move {
                    assert_eq!(body["from"], "123");
                    assert_eq!(body["text"], "hello");
                    Json(reply)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/hook", addr)
    }

    fn inbound() -> NormalizedMessage {
        let envelope = serde_json::from_value(json!({
            "key": {"remoteJid": "123@s.whatsapp.net", "fromMe": false, "id": "MSG1"},
            "message": {"conversation": "hello"}
        }))
        .unwrap();
        normalizer::normalize(&envelope).unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_inbound_to_reply_scenario() {
        let client = Arc::new(MockClient::default());
        let (session, broker) = build(client.clone(), webhook(json!({"reply": "hi there"})).await);
        session.on_event(ConnectionEvent::Opened);

        let message = inbound();
        assert_eq!(message.sender_id, "123");
        assert_eq!(message.source_kind, SourceKind::Conversation);

        broker.forward(message).await;

        assert_eq!(
            client.sent(),
            vec![("123@s.whatsapp.net".to_string(), "hi there".to_string())]
        );
    }

    #[tokio::test]
    async fn test_no_reply_sends_nothing() {
        let client = Arc::new(MockClient::default());
        let (session, broker) = build(client.clone(), webhook(json!({})).await);
        session.on_event(ConnectionEvent::Opened);

        broker.forward(inbound()).await;
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_reply_dropped_when_disconnected() {
        let client = Arc::new(MockClient::default());
        let (_session, broker) = build(client.clone(), webhook(json!("direct")).await);

        broker.forward(inbound()).await;
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_relay_failure_sends_nothing() {
        let client = Arc::new(MockClient::default());
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);
        let (session, broker) = build(client.clone(), url);
        session.on_event(ConnectionEvent::Opened);

        broker.forward(inbound()).await;
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_relay_waits_for_previous_message() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/hook",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = Arc::new(MockClient::default());
        let (_session, broker) = build(client, url);

        let (previous_tx, previous_rx) = oneshot::channel();
        let (started_tx, started_rx) = oneshot::channel();
        let task = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .forward_after(inbound(), Some(previous_rx), started_tx)
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        previous_tx.send(()).unwrap();
        started_rx.await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_event_chains_relays() {
        let client = Arc::new(MockClient::default());
        let (_session, broker) = build(client, "http://127.0.0.1:9/hook".to_string());

        let envelope: RawEnvelope = serde_json::from_value(json!({
            "key": {"remoteJid": "123@s.whatsapp.net", "id": "A"},
            "message": {"conversation": "first"}
        }))
        .unwrap();
        broker.handle_event(ProtocolEvent::Message(Box::new(envelope.clone())));
        let first = broker.last_relay.lock().take().unwrap();
        broker.handle_event(ProtocolEvent::Message(Box::new(envelope)));

        tokio::time::timeout(Duration::from_secs(5), first)
            .await
            .unwrap()
            .unwrap();
        assert!(broker.last_relay.lock().is_some());
    }

    #[tokio::test]
    async fn test_self_message_not_forwarded() {
        let client = Arc::new(MockClient::default());
        let (session, broker) = build(client.clone(), "http://127.0.0.1:9/hook".to_string());
        session.on_event(ConnectionEvent::Opened);

        let envelope = serde_json::from_value(json!({
            "key": {"remoteJid": "123@s.whatsapp.net", "fromMe": true},
            "message": {"conversation": "my own reply"}
        }))
        .unwrap();
        broker.handle_event(ProtocolEvent::Message(Box::new(envelope)));
        settle().await;

        assert!(client.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_schedules_one_reconnect() {
        let client = Arc::new(MockClient::default());
        let (session, broker) = build(client.clone(), "http://127.0.0.1:9/hook".to_string());

        broker.handle_event(ProtocolEvent::Connection(ConnectionEvent::Opened));
        broker.handle_event(ProtocolEvent::Connection(ConnectionEvent::Closed(
            CloseReason(428),
        )));
        broker.handle_event(ProtocolEvent::Connection(ConnectionEvent::Closed(
            CloseReason(428),
        )));
        assert_eq!(session.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(client.connect_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(client.connect_count(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(client.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logged_out_never_reconnects() {
        let client = Arc::new(MockClient::default());
        let (_session, broker) = build(client.clone(), "http://127.0.0.1:9/hook".to_string());

        broker.handle_event(ProtocolEvent::Connection(ConnectionEvent::Closed(
            CloseReason(LOGGED_OUT),
        )));

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(client.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_retries_forever() {
        let client = Arc::new(MockClient::default());
        client.fail_connect.store(true, Ordering::SeqCst);
        let (session, broker) = build(client.clone(), "http://127.0.0.1:9/hook".to_string());

        broker.start().await;
        assert_eq!(client.connect_count(), 1);
        assert!(session.reconnect_pending());

        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;
        assert_eq!(client.connect_count(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(client.connect_count(), 3);

        client.fail_connect.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(client.connect_count(), 4);
        assert!(!session.reconnect_pending());
    }

    #[tokio::test]
    async fn test_shutdown_logs_out() {
        let client = Arc::new(MockClient::default());
        let (session, broker) = build(client.clone(), "http://127.0.0.1:9/hook".to_string());
        session.on_event(ConnectionEvent::Opened);

        broker.shutdown().await;

        assert_eq!(client.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.on_connect_failed(), NextStep::Idle);
    }

    #[tokio::test]
    async fn test_run_processes_events_in_order() {
        let client = Arc::new(MockClient::default());
        let (session, broker) = build(client, "http://127.0.0.1:9/hook".to_string());
        let (tx, rx) = mpsc::channel(8);

        tx.send(ProtocolEvent::Connection(ConnectionEvent::PairingChallengeIssued(
            "abc123".to_string(),
        )))
        .await
        .unwrap();
        tx.send(ProtocolEvent::Connection(ConnectionEvent::Opened))
            .await
            .unwrap();
        drop(tx);

        broker.run(rx).await;

        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(session.current_status().pairing_challenge.is_none());
    }
}
