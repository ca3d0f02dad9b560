use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use squadup_core::{
    IgnoreReason, MatchCoordinator, MatchError, MessageRef, MessengerError, RequestSource,
    SignalOutcome,
};
use thiserror::Error;
use tracing::debug;

use crate::{
    blocks::{intake_reply_message, MessageTemplate},
    commands::{
        infer_text_trigger, normalize_match_command, slash_command_source, CommandParseError,
        MatchCommand, SlashCommandPayload,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    SlashCommand(SlashCommandPayload),
    ChannelMessage(ChannelMessageEvent),
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::ChannelMessage(_) => SlackEventType::ChannelMessage,
            Self::ReactionAdded(_) => SlackEventType::ReactionAdded,
            Self::ReactionRemoved(_) => SlackEventType::ReactionRemoved,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    /// Message the event refers to, used as a log correlation field.
    pub fn message_ref(&self) -> Option<MessageRef> {
        match self {
            Self::ReactionAdded(event) | Self::ReactionRemoved(event) => Some(event.message_ref()),
            Self::ChannelMessage(event) => Some(MessageRef::new(&event.channel_id, &event.ts)),
            Self::SlashCommand(_) | Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    SlashCommand,
    ChannelMessage,
    ReactionAdded,
    ReactionRemoved,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelMessageEvent {
    pub channel_id: String,
    pub ts: String,
    pub user_id: String,
    pub text: String,
    /// Set when a bot authored the message.
    pub bot_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionEvent {
    pub channel_id: String,
    pub message_ts: String,
    pub user_id: String,
    pub reaction: String,
}

impl ReactionEvent {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef::new(&self.channel_id, &self.message_ts)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

/// Ephemeral answer for the user who raised a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub channel_id: String,
    pub user_id: String,
    pub message: MessageTemplate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(Reply),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("roster signal failed: {0}")]
    Signal(#[from] MatchError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Delivers ephemeral replies produced by handlers.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_reply(&self, reply: &Reply) -> Result<(), MessengerError>;
}

#[derive(Default)]
pub struct NoopReplySink;

#[async_trait]
impl ReplySink for NoopReplySink {
    async fn send_reply(&self, _reply: &Reply) -> Result<(), MessengerError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Dispatcher with every matchmaking handler wired to one coordinator.
pub fn match_dispatcher(coordinator: Arc<MatchCoordinator>) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(SlashCommandHandler::new(coordinator.clone()));
    dispatcher.register(ChannelMessageHandler::new(coordinator.clone()));
    dispatcher.register(ReactionHandler::added(coordinator.clone()));
    dispatcher.register(ReactionHandler::removed(coordinator));
    dispatcher
}

async fn submit_request(
    coordinator: &MatchCoordinator,
    source: RequestSource,
    command: MatchCommand,
) -> HandlerResult {
    let reply = coordinator
        .on_request(&source, &command.game, &command.players, command.schedule())
        .await;

    HandlerResult::Responded(Reply {
        channel_id: source.channel_id,
        user_id: source.user_id,
        message: intake_reply_message(&reply),
    })
}

pub struct SlashCommandHandler {
    coordinator: Arc<MatchCoordinator>,
}

impl SlashCommandHandler {
    pub fn new(coordinator: Arc<MatchCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl EventHandler for SlashCommandHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::SlashCommand
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::SlashCommand(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let command = normalize_match_command(payload)?;
        let source = slash_command_source(payload, &ctx.correlation_id);
        Ok(submit_request(&self.coordinator, source, command).await)
    }
}

pub struct ChannelMessageHandler {
    coordinator: Arc<MatchCoordinator>,
}

impl ChannelMessageHandler {
    pub fn new(coordinator: Arc<MatchCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl EventHandler for ChannelMessageHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ChannelMessage
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::ChannelMessage(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if event.bot_id.is_some() {
            return Ok(HandlerResult::Ignored);
        }
        let Some(command) = infer_text_trigger(&event.text) else {
            return Ok(HandlerResult::Processed);
        };

        let source = RequestSource {
            channel_id: event.channel_id.clone(),
            user_id: event.user_id.clone(),
            correlation_id: ctx.correlation_id.clone(),
        };
        Ok(submit_request(&self.coordinator, source, command).await)
    }
}

pub struct ReactionHandler {
    coordinator: Arc<MatchCoordinator>,
    event_type: SlackEventType,
}

impl ReactionHandler {
    pub fn added(coordinator: Arc<MatchCoordinator>) -> Self {
        Self { coordinator, event_type: SlackEventType::ReactionAdded }
    }

    pub fn removed(coordinator: Arc<MatchCoordinator>) -> Self {
        Self { coordinator, event_type: SlackEventType::ReactionRemoved }
    }
}

#[async_trait]
impl EventHandler for ReactionHandler {
    fn event_type(&self) -> SlackEventType {
        self.event_type.clone()
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let outcome = match &envelope.event {
            SlackEvent::ReactionAdded(event) => {
                self.coordinator
                    .on_reaction_add(&event.message_ref(), &event.reaction, &event.user_id)
                    .await?
            }
            SlackEvent::ReactionRemoved(event) => {
                self.coordinator
                    .on_reaction_remove(&event.message_ref(), &event.reaction, &event.user_id)
                    .await?
            }
            _ => return Ok(HandlerResult::Ignored),
        };

        Ok(match outcome {
            SignalOutcome::Applied { .. } => HandlerResult::Processed,
            SignalOutcome::Ignored(reason) => {
                debug!(
                    event_name = "ingress.slack.reaction_ignored",
                    correlation_id = %ctx.correlation_id,
                    reason = ignore_label(reason),
                    "reaction did not change any roster"
                );
                HandlerResult::Ignored
            }
        })
    }
}

fn ignore_label(reason: IgnoreReason) -> &'static str {
    match reason {
        IgnoreReason::UnknownRequest => "unknown_request",
        IgnoreReason::ForeignMarker => "foreign_marker",
        IgnoreReason::SelfReaction => "self_reaction",
        IgnoreReason::BotReaction => "bot_reaction",
        IgnoreReason::UnresolvedParticipant => "unresolved_participant",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use squadup_core::{
        CoordinatorSettings, InMemoryMessenger, MatchCoordinator, MessageRef, RetryPolicy,
        RosterStore,
    };

    use super::{
        match_dispatcher, ChannelMessageEvent, EventContext, EventDispatcher, HandlerResult,
        ReactionEvent, SlackEnvelope, SlackEvent,
    };
    use crate::commands::SlashCommandPayload;

    fn coordinator(messenger: Arc<InMemoryMessenger>) -> Arc<MatchCoordinator> {
        let settings = CoordinatorSettings {
            match_channel_id: Some("CGAMING".to_owned()),
            bot_user_id: Some("UBOT".to_owned()),
            retry: RetryPolicy::none(),
            ..CoordinatorSettings::default()
        };
        Arc::new(MatchCoordinator::new(Arc::new(RosterStore::new()), messenger, settings))
    }

    fn slash(channel_id: &str, text: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: "env-slash".to_owned(),
            event: SlackEvent::SlashCommand(SlashCommandPayload {
                command: "/match".to_owned(),
                text: text.to_owned(),
                channel_id: channel_id.to_owned(),
                user_id: "U1".to_owned(),
                trigger_id: "T1".to_owned(),
            }),
        }
    }

    fn reaction(message: &MessageRef, user_id: &str, added: bool) -> SlackEnvelope {
        let event = ReactionEvent {
            channel_id: message.channel_id.clone(),
            message_ts: message.message_id.clone(),
            user_id: user_id.to_owned(),
            reaction: "thumbsup".to_owned(),
        };
        SlackEnvelope {
            envelope_id: format!("env-{user_id}"),
            event: if added {
                SlackEvent::ReactionAdded(event)
            } else {
                SlackEvent::ReactionRemoved(event)
            },
        }
    }

    fn reply_text(result: &HandlerResult) -> Option<&str> {
        match result {
            HandlerResult::Responded(reply) => Some(reply.message.fallback_text.as_str()),
            _ => None,
        }
    }

    #[test]
    fn match_dispatcher_registers_handlers() {
        let dispatcher = match_dispatcher(coordinator(Arc::new(InMemoryMessenger::new())));
        assert_eq!(dispatcher.handler_count(), 4);
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::new();
        let result = dispatcher
            .dispatch(&slash("CGAMING", "Chess 2"), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }

    #[tokio::test]
    async fn slash_command_posts_and_acknowledges() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let coordinator = coordinator(messenger.clone());
        let dispatcher = match_dispatcher(coordinator.clone());

        let result = dispatcher
            .dispatch(&slash("CGAMING", "Chess 2 at noon"), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(reply_text(&result), Some("Match posted!"));
        assert_eq!(coordinator.store().len().await, 1);
    }

    #[tokio::test]
    async fn slash_command_outside_match_channel_is_redirected() {
        let coordinator = coordinator(Arc::new(InMemoryMessenger::new()));
        let dispatcher = match_dispatcher(coordinator.clone());

        let result = dispatcher
            .dispatch(&slash("CRANDOM", "Chess 2"), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(reply_text(&result), Some("Please use the #gaming channel for match requests."));
        assert!(coordinator.store().is_empty().await);
    }

    #[tokio::test]
    async fn text_trigger_from_bot_is_ignored() {
        let coordinator = coordinator(Arc::new(InMemoryMessenger::new()));
        let dispatcher = match_dispatcher(coordinator.clone());
        let envelope = SlackEnvelope {
            envelope_id: "env-bot".to_owned(),
            event: SlackEvent::ChannelMessage(ChannelMessageEvent {
                channel_id: "CGAMING".to_owned(),
                ts: "1.0".to_owned(),
                user_id: "UBOT".to_owned(),
                text: "!match Chess 2".to_owned(),
                bot_id: Some("B1".to_owned()),
            }),
        };

        let result =
            dispatcher.dispatch(&envelope, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
        assert!(coordinator.store().is_empty().await);
    }

    #[tokio::test]
    async fn text_trigger_with_bad_players_gets_usage() {
        let coordinator = coordinator(Arc::new(InMemoryMessenger::new()));
        let dispatcher = match_dispatcher(coordinator);
        let envelope = SlackEnvelope {
            envelope_id: "env-text".to_owned(),
            event: SlackEvent::ChannelMessage(ChannelMessageEvent {
                channel_id: "CGAMING".to_owned(),
                ts: "1.0".to_owned(),
                user_id: "U1".to_owned(),
                text: "!match Chess many".to_owned(),
                bot_id: None,
            }),
        };

        let result =
            dispatcher.dispatch(&envelope, &EventContext::default()).await.expect("dispatch");

        assert!(reply_text(&result).is_some_and(|text| text.starts_with("Usage: /match")));
    }

    #[tokio::test]
    async fn reactions_drive_the_roster() {
        let messenger = Arc::new(
            InMemoryMessenger::new().with_display_name("U1", "Alice").with_display_name("U2", "Bo"),
        );
        let coordinator = coordinator(messenger.clone());
        let dispatcher = match_dispatcher(coordinator.clone());
        let request = coordinator.create_request("CGAMING", "Chess", 2, None).await.expect("create");
        let ctx = EventContext::default();

        for (user, added) in [("U1", true), ("UBOT", true), ("U2", true), ("U1", false)] {
            dispatcher.dispatch(&reaction(&request.message, user, added), &ctx).await.expect("ok");
        }

        let stored = coordinator.store().get(&request.id).await.expect("tracked");
        assert_eq!(stored.joined, vec!["Bo"]);
        assert!(!stored.locked);
        assert!(messenger.has_marker(&request.message, "thumbsup").await);
    }
}
