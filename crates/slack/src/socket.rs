use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::commands::SlashCommandPayload;
use crate::events::{
    ChannelMessageEvent, EventContext, EventDispatcher, HandlerResult,
    NoopReplySink, ReactionEvent, ReplySink, SlackEnvelope, SlackEvent,
};
use crate::web::SlackWebClient;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
    #[error("malformed socket frame: {0}")]
    Frame(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the event source is finished for good.
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;

    fn mode(&self) -> &'static str {
        "socket"
    }
}

#[derive(Default)]
pub struct NoopSocketTransport;

#[async_trait]
impl SocketTransport for NoopSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "noop"
    }
}

type SocketStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Slack Socket Mode over a websocket opened through `apps.connections.open`.
pub struct WebSocketTransport {
    client: Arc<SlackWebClient>,
    stream: Mutex<Option<SocketStream>>,
}

impl WebSocketTransport {
    pub fn new(client: Arc<SlackWebClient>) -> Self {
        Self { client, stream: Mutex::new(None) }
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self
            .client
            .open_socket_url()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| TransportError::Receive("socket is not connected".to_owned()))?;

        loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(error)) => return Err(TransportError::Receive(error.to_string())),
                None => return Err(TransportError::Receive("socket stream ended".to_owned())),
            };

            match message {
                Message::Text(text) => match parse_socket_frame(&text) {
                    Ok(SocketFrame::Hello) => debug!("socket mode hello received"),
                    Ok(SocketFrame::Disconnect { reason }) => {
                        // slack rotates connections; surface it so the runner reconnects
                        return Err(TransportError::Receive(format!(
                            "server requested reconnect: {reason}"
                        )));
                    }
                    Ok(SocketFrame::Envelope(envelope)) => return Ok(Some(envelope)),
                    Err(error) => warn!(error = %error, "skipping malformed socket frame"),
                },
                Message::Close(_) => {
                    return Err(TransportError::Receive("socket closed by server".to_owned()));
                }
                _ => {}
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| TransportError::Acknowledge("socket is not connected".to_owned()))?;
        let ack = json!({ "envelope_id": envelope_id }).to_string();
        stream
            .send(Message::Text(ack))
            .await
            .map_err(|error| TransportError::Acknowledge(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(mut stream) = self.stream.lock().await.take() else {
            return Ok(());
        };
        stream.close(None).await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: Arc<EventDispatcher>,
    replies: Arc<dyn ReplySink>,
    reconnect_policy: ReconnectPolicy,
    drain_timeout: Duration,
    shutdown: watch::Sender<bool>,
}

impl Default for SocketModeRunner {
    fn default() -> Self {
        Self {
            transport: Arc::new(NoopSocketTransport),
            dispatcher: Arc::new(EventDispatcher::default()),
            replies: Arc::new(NoopReplySink),
            reconnect_policy: ReconnectPolicy::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            shutdown: watch::Sender::new(false),
        }
    }
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EventDispatcher,
        replies: Arc<dyn ReplySink>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            dispatcher: Arc::new(dispatcher),
            replies,
            reconnect_policy,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            shutdown: watch::Sender::new(false),
        }
    }

    /// Upper bound on waiting for in-flight envelopes once the pump stops.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn transport_mode(&self) -> &'static str {
        self.transport.mode()
    }

    /// Makes a running `start` stop reading, drain in-flight envelopes and
    /// return `Ok(())`.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Pumps events until the transport reports a clean end of stream. A
    /// successful connect resets the retry budget, so periodic server-side
    /// rotations never exhaust it.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            if self.stopping() {
                return Ok(());
            }
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(PumpFailure { connected, error }) => {
                    if connected {
                        attempt = 0;
                    }
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %error,
                        "socket mode transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = wait_for_shutdown(self.shutdown.subscribe()) => return Ok(()),
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), PumpFailure> {
        info!(attempt, "opening socket mode transport connection");
        self.transport.connect().await.map_err(PumpFailure::before_connect)?;
        info!(attempt, "socket mode transport connected");

        let mut tasks = JoinSet::new();
        let result = self.pump(attempt, &mut tasks).await;
        self.drain(&mut tasks).await;
        result.map_err(PumpFailure::after_connect)
    }

    /// In-flight signals finish before the connection is given up; whatever
    /// outlives the drain timeout is aborted.
    async fn drain(&self, tasks: &mut JoinSet<()>) {
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                event_name = "ingress.slack.drain_timeout",
                pending = tasks.len(),
                drain_timeout_ms = self.drain_timeout.as_millis() as u64,
                "aborting envelopes still in flight"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    async fn pump(&self, attempt: u32, tasks: &mut JoinSet<()>) -> Result<(), TransportError> {
        let stop = self.shutdown.subscribe();
        tokio::pin! {
            let stopped = wait_for_shutdown(stop);
        }

        loop {
            while tasks.try_join_next().is_some() {}

            let next = tokio::select! {
                biased;
                _ = &mut stopped => {
                    info!(attempt, in_flight = tasks.len(), "socket mode shutdown requested");
                    self.transport.disconnect().await?;
                    return Ok(());
                }
                next = self.transport.next_envelope() => next?,
            };
            let Some(envelope) = next else {
                info!(attempt, "socket mode transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            let (match_id, channel_id) = correlation_fields(&envelope);

            info!(
                event_name = "ingress.slack.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                match_id = match_id.as_deref().unwrap_or("unknown"),
                channel_id = channel_id.as_deref().unwrap_or("unknown"),
                "received slack envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge slack envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    "acknowledged slack envelope"
                );
            }

            let dispatcher = self.dispatcher.clone();
            let replies = self.replies.clone();
            tasks.spawn(async move { dispatch_one(&dispatcher, replies.as_ref(), envelope).await });
        }
    }
}

async fn wait_for_shutdown(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            // sender gone with the runner; nothing left to wait for
            std::future::pending::<()>().await;
        }
    }
}

struct PumpFailure {
    connected: bool,
    error: TransportError,
}

impl PumpFailure {
    fn before_connect(error: TransportError) -> Self {
        Self { connected: false, error }
    }

    fn after_connect(error: TransportError) -> Self {
        Self { connected: true, error }
    }
}

async fn dispatch_one(
    dispatcher: &EventDispatcher,
    replies: &dyn ReplySink,
    envelope: SlackEnvelope,
) {
    let context = EventContext { correlation_id: envelope.envelope_id.clone() };
    match dispatcher.dispatch(&envelope, &context).await {
        Ok(HandlerResult::Responded(reply)) => {
            if let Err(error) = replies.send_reply(&reply).await {
                warn!(
                    event_name = "egress.slack.reply_failed",
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "failed to deliver reply"
                );
            }
        }
        Ok(_) => {}
        Err(error) => {
            warn!(
                envelope_id = %envelope.envelope_id,
                correlation_id = %context.correlation_id,
                error = %error,
                "event dispatch failed; continuing socket loop"
            );
        }
    }
}

fn correlation_fields(envelope: &SlackEnvelope) -> (Option<String>, Option<String>) {
    match &envelope.event {
        SlackEvent::SlashCommand(payload) => (None, Some(payload.channel_id.clone())),
        SlackEvent::Unsupported { .. } => (None, None),
        event => {
            let message = event.message_ref();
            (
                message.as_ref().map(|message| message.match_id().0),
                message.map(|message| message.channel_id),
            )
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SocketFrame {
    Hello,
    Disconnect { reason: String },
    Envelope(SlackEnvelope),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct RawSlashCommand {
    command: String,
    #[serde(default)]
    text: String,
    channel_id: String,
    user_id: String,
    #[serde(default)]
    trigger_id: String,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    user: Option<String>,
    reaction: Option<String>,
    item: Option<RawItem>,
    channel: Option<String>,
    text: Option<String>,
    ts: Option<String>,
    bot_id: Option<String>,
    subtype: Option<String>,
}

#[derive(Deserialize)]
struct RawItem {
    channel: Option<String>,
    ts: Option<String>,
}

pub fn parse_socket_frame(text: &str) -> Result<SocketFrame, TransportError> {
    let frame: RawFrame =
        serde_json::from_str(text).map_err(|error| TransportError::Frame(error.to_string()))?;

    match frame.frame_type.as_str() {
        "hello" => return Ok(SocketFrame::Hello),
        "disconnect" => {
            return Ok(SocketFrame::Disconnect {
                reason: frame.reason.unwrap_or_else(|| "unspecified".to_owned()),
            });
        }
        _ => {}
    }

    let envelope_id = frame.envelope_id.ok_or_else(|| {
        TransportError::Frame(format!("{} frame without envelope_id", frame.frame_type))
    })?;
    let event = match frame.frame_type.as_str() {
        "slash_commands" => {
            let raw: RawSlashCommand = serde_json::from_value(frame.payload)
                .map_err(|error| TransportError::Frame(error.to_string()))?;
            SlackEvent::SlashCommand(SlashCommandPayload {
                command: raw.command,
                text: raw.text,
                channel_id: raw.channel_id,
                user_id: raw.user_id,
                trigger_id: raw.trigger_id,
            })
        }
        "events_api" => {
            let raw = frame.payload.get("event").cloned().unwrap_or(Value::Null);
            let raw: RawEvent = serde_json::from_value(raw)
                .map_err(|error| TransportError::Frame(error.to_string()))?;
            convert_event(raw)
        }
        other => SlackEvent::Unsupported { event_type: other.to_owned() },
    };

    Ok(SocketFrame::Envelope(SlackEnvelope { envelope_id, event }))
}

fn convert_event(raw: RawEvent) -> SlackEvent {
    match raw.event_type.as_str() {
        "reaction_added" | "reaction_removed" => {
            let item = raw.item.unwrap_or(RawItem { channel: None, ts: None });
            let (Some(channel_id), Some(message_ts), Some(user_id), Some(reaction)) =
                (item.channel, item.ts, raw.user, raw.reaction)
            else {
                return SlackEvent::Unsupported { event_type: raw.event_type };
            };
            let event = ReactionEvent { channel_id, message_ts, user_id, reaction };
            if raw.event_type == "reaction_added" {
                SlackEvent::ReactionAdded(event)
            } else {
                SlackEvent::ReactionRemoved(event)
            }
        }
        // edits, joins and other subtypes never carry a fresh request
        "message" if raw.subtype.is_none() || raw.subtype.as_deref() == Some("bot_message") => {
            let (Some(channel_id), Some(ts), Some(text)) = (raw.channel, raw.ts, raw.text) else {
                return SlackEvent::Unsupported { event_type: raw.event_type };
            };
            SlackEvent::ChannelMessage(ChannelMessageEvent {
                channel_id,
                ts,
                user_id: raw.user.unwrap_or_default(),
                text,
                bot_id: raw.bot_id,
            })
        }
        _ => SlackEvent::Unsupported { event_type: raw.event_type },
    }
}
