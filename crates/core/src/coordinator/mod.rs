//! Match coordinator: the only writer of roster state.
//!
//! Every signal runs as one unit under the per-request guard. The reducer
//! decides the new roster, the guard is updated, and messenger effects run
//! before the guard is released, so a second signal for the same request
//! observes both the new state and the finished affordance change.

pub mod effects;
pub mod intake;

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::domain::marker::JoinMarker;
use crate::domain::match_request::{
    reduce, Intent, MatchDraft, MatchId, MatchRequest, MessageRef, Signal, TransitionEvent,
};
use crate::errors::MatchError;
use crate::messenger::Messenger;
use crate::roster::RosterStore;

pub use effects::{EffectExecutor, EffectReport, RetryPolicy};
pub use intake::{IntakeReply, RequestSource};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub join_marker: JoinMarker,
    /// When set, intake only accepts requests raised in this channel.
    pub match_channel_id: Option<String>,
    pub match_channel_name: String,
    /// Reactions from this user are the bot's own marker and never count.
    pub bot_user_id: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            join_marker: JoinMarker::default(),
            match_channel_id: None,
            match_channel_name: "gaming".to_owned(),
            bot_user_id: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            join_marker: JoinMarker::new(config.matchmaking.join_marker.as_str()),
            match_channel_id: config.matchmaking.channel_id.clone(),
            match_channel_name: config.matchmaking.channel_name.clone(),
            bot_user_id: config.slack.bot_user_id.clone(),
            retry: RetryPolicy::from_config(&config.matchmaking),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownRequest,
    ForeignMarker,
    SelfReaction,
    /// The reacting user is a bot, which covers the app's own marker even
    /// when its user id is not configured.
    BotReaction,
    UnresolvedParticipant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignalOutcome {
    Applied { request: MatchRequest, transition: Option<TransitionEvent>, effects: EffectReport },
    Ignored(IgnoreReason),
}

impl SignalOutcome {
    pub fn request(&self) -> Option<&MatchRequest> {
        match self {
            Self::Applied { request, .. } => Some(request),
            Self::Ignored(_) => None,
        }
    }
}

pub struct MatchCoordinator {
    store: Arc<RosterStore>,
    messenger: Arc<dyn Messenger>,
    executor: EffectExecutor,
    settings: CoordinatorSettings,
}

impl MatchCoordinator {
    pub fn new(
        store: Arc<RosterStore>,
        messenger: Arc<dyn Messenger>,
        settings: CoordinatorSettings,
    ) -> Self {
        let executor = EffectExecutor::new(
            messenger.clone(),
            settings.join_marker.clone(),
            settings.retry.clone(),
        );
        Self { store, messenger, executor, settings }
    }

    pub fn store(&self) -> &Arc<RosterStore> {
        &self.store
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Posts a new request and starts tracking it.
    ///
    /// A failed post aborts creation. A failed marker attach does not: the
    /// request is already tracked and the roster stays authoritative.
    pub async fn create_request(
        &self,
        channel_id: &str,
        game: &str,
        capacity: u32,
        schedule: Option<String>,
    ) -> Result<MatchRequest, MatchError> {
        let draft = MatchDraft::new(game, capacity, schedule)?;
        let message = self.messenger.post(channel_id, &draft.display()).await?;
        let request = draft.into_request(message);
        let id = request.id.clone();

        if let Err(insert_error) = self.store.insert(request).await {
            error!(
                event_name = "match.create.duplicate",
                match_id = %id,
                error = %insert_error,
                "posted message id collides with a tracked request"
            );
            return Err(insert_error.into());
        }

        let guard = self.store.lock(&id).await?;
        if !guard.locked && !self.executor.attach_marker(&guard).await {
            warn!(
                event_name = "match.create.marker_missing",
                match_id = %id,
                "request tracked without its join marker"
            );
        }
        let request = guard.clone();
        drop(guard);

        info!(
            event_name = "match.create.posted",
            match_id = %request.id,
            game = %request.game,
            capacity = request.capacity,
            "match request posted"
        );
        Ok(request)
    }

    /// Applies one join or leave to a tracked request.
    pub async fn apply_signal(
        &self,
        id: &MatchId,
        signal: Signal,
    ) -> Result<SignalOutcome, MatchError> {
        let Ok(mut guard) = self.store.lock(id).await else {
            debug!(
                event_name = "match.signal.ignored",
                match_id = %id,
                reason = "unknown_request",
                "signal for an untracked request"
            );
            return Ok(SignalOutcome::Ignored(IgnoreReason::UnknownRequest));
        };

        let (next, transition) = reduce(&guard, &signal);
        *guard = next;

        let effects = self.executor.apply(&guard, transition).await;
        let request = guard.clone();
        drop(guard);

        info!(
            event_name = "match.signal.applied",
            match_id = %request.id,
            participant = %signal.participant,
            intent = ?signal.intent,
            joined = request.joined.len(),
            capacity = request.capacity,
            transition = ?transition,
            "roster updated"
        );
        Ok(SignalOutcome::Applied { request, transition, effects })
    }

    pub async fn on_reaction_add(
        &self,
        message: &MessageRef,
        marker: &str,
        user_id: &str,
    ) -> Result<SignalOutcome, MatchError> {
        self.on_reaction(message, marker, user_id, Intent::Join).await
    }

    pub async fn on_reaction_remove(
        &self,
        message: &MessageRef,
        marker: &str,
        user_id: &str,
    ) -> Result<SignalOutcome, MatchError> {
        self.on_reaction(message, marker, user_id, Intent::Leave).await
    }

    async fn on_reaction(
        &self,
        message: &MessageRef,
        marker: &str,
        user_id: &str,
        intent: Intent,
    ) -> Result<SignalOutcome, MatchError> {
        if !self.settings.join_marker.matches(marker) {
            return Ok(SignalOutcome::Ignored(IgnoreReason::ForeignMarker));
        }
        if self.settings.bot_user_id.as_deref() == Some(user_id) {
            return Ok(SignalOutcome::Ignored(IgnoreReason::SelfReaction));
        }

        let id = message.match_id();
        if !self.store.contains(&id).await {
            return Ok(SignalOutcome::Ignored(IgnoreReason::UnknownRequest));
        }

        // identity is the name at signal time; a rename between join and
        // leave leaves the old entry behind
        let participant = match self.messenger.resolve_participant(user_id).await {
            Ok(participant) => participant,
            Err(lookup_error) => {
                warn!(
                    event_name = "match.signal.unresolved",
                    match_id = %id,
                    user_id,
                    error = %lookup_error,
                    "could not resolve participant display name"
                );
                return Ok(SignalOutcome::Ignored(IgnoreReason::UnresolvedParticipant));
            }
        };
        if participant.is_bot {
            debug!(
                event_name = "match.signal.ignored",
                match_id = %id,
                user_id,
                reason = "bot_reaction",
                "reaction from a bot user"
            );
            return Ok(SignalOutcome::Ignored(IgnoreReason::BotReaction));
        }

        self.apply_signal(&id, Signal { participant: participant.display_name, intent }).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{CoordinatorSettings, IgnoreReason, MatchCoordinator, RetryPolicy, SignalOutcome};
    use crate::domain::display::EMPTY_ROSTER_PLACEHOLDER;
    use crate::domain::match_request::{MatchId, Signal, TransitionEvent};
    use crate::errors::{DomainError, MatchError, MessengerError};
    use crate::messenger::{InMemoryMessenger, MessengerOperation, IN_MEMORY_BOT_USER};
    use crate::roster::RosterStore;

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            bot_user_id: Some("UBOT".to_owned()),
            retry: RetryPolicy::none(),
            ..CoordinatorSettings::default()
        }
    }

    fn coordinator(messenger: Arc<InMemoryMessenger>) -> MatchCoordinator {
        MatchCoordinator::new(Arc::new(RosterStore::new()), messenger, settings())
    }

    fn joined(outcome: &SignalOutcome) -> Vec<String> {
        outcome.request().map(|request| request.joined.clone()).unwrap_or_default()
    }

    #[tokio::test]
    async fn create_request_posts_attaches_marker_and_tracks() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let coordinator = coordinator(messenger.clone());

        let request = coordinator
            .create_request("C1", "Valorant", 5, Some("9pm".to_owned()))
            .await
            .expect("create");

        assert!(request.joined.is_empty());
        assert!(!request.locked);
        assert!(messenger.has_marker(&request.message, "thumbsup").await);
        assert_eq!(coordinator.store().get(&request.id).await, Some(request.clone()));
        let posted = messenger.latest_display(&request.message).await.expect("posted display");
        assert_eq!(posted.title, "Looking for players: Valorant");
    }

    #[tokio::test]
    async fn create_request_rejects_invalid_input_without_posting() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let coordinator = coordinator(messenger.clone());

        let error = coordinator.create_request("C1", "Chess", 0, None).await.expect_err("zero");
        assert!(matches!(error, MatchError::Domain(DomainError::InvalidCapacity { .. })));
        let error = coordinator.create_request("C1", " ", 2, None).await.expect_err("blank");
        assert_eq!(error, MatchError::Domain(DomainError::InvalidGame));

        assert_eq!(messenger.count(MessengerOperation::Post).await, 0);
        assert!(coordinator.store().is_empty().await);
    }

    #[tokio::test]
    async fn post_failure_aborts_creation() {
        let messenger = Arc::new(InMemoryMessenger::new());
        messenger.fail_next(MessengerOperation::Post, MessengerError::Post("down".into())).await;
        let coordinator = coordinator(messenger.clone());

        let error = coordinator.create_request("C1", "Chess", 2, None).await.expect_err("post");
        assert!(matches!(error, MatchError::Messenger(MessengerError::Post(_))));
        assert!(coordinator.store().is_empty().await);
    }

    #[tokio::test]
    async fn marker_attach_failure_still_tracks_request() {
        let messenger = Arc::new(InMemoryMessenger::new());
        messenger
            .fail_next(MessengerOperation::AddMarker, MessengerError::Reaction("denied".into()))
            .await;
        let coordinator = coordinator(messenger.clone());

        let request = coordinator.create_request("C1", "Chess", 2, None).await.expect("create");

        assert!(coordinator.store().contains(&request.id).await);
        assert!(!messenger.has_marker(&request.message, "thumbsup").await);
    }

    #[tokio::test]
    async fn capacity_two_round_trip_moves_the_marker() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let coordinator = coordinator(messenger.clone());
        let request = coordinator.create_request("C1", "Chess", 2, None).await.expect("create");
        let id = request.id.clone();

        let outcome = coordinator.apply_signal(&id, Signal::join("A")).await.expect("join A");
        assert_eq!(joined(&outcome), vec!["A"]);
        assert!(messenger.has_marker(&request.message, "thumbsup").await);

        let outcome = coordinator.apply_signal(&id, Signal::join("B")).await.expect("join B");
        assert_eq!(joined(&outcome), vec!["A", "B"]);
        assert!(matches!(
            outcome,
            SignalOutcome::Applied { transition: Some(TransitionEvent::Locked), .. }
        ));
        assert!(!messenger.has_marker(&request.message, "thumbsup").await);
        assert_eq!(messenger.count(MessengerOperation::RemoveMarker).await, 1);

        let outcome = coordinator.apply_signal(&id, Signal::leave("A")).await.expect("leave A");
        assert_eq!(joined(&outcome), vec!["B"]);
        assert!(messenger.has_marker(&request.message, "thumbsup").await);
        // one from creation, one from the unlock
        assert_eq!(messenger.count(MessengerOperation::AddMarker).await, 2);

        let outcome = coordinator.apply_signal(&id, Signal::join("A")).await.expect("rejoin A");
        assert_eq!(joined(&outcome), vec!["B", "A"]);
        assert!(outcome.request().is_some_and(|request| request.locked));
        assert!(!messenger.has_marker(&request.message, "thumbsup").await);
        assert_eq!(messenger.count(MessengerOperation::Edit).await, 4);
    }

    #[tokio::test]
    async fn capacity_one_renders_count_and_placeholder() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let coordinator = coordinator(messenger.clone());
        let request = coordinator.create_request("C1", "Chess", 1, None).await.expect("create");

        coordinator.apply_signal(&request.id, Signal::join("A")).await.expect("join");
        let display = messenger.latest_display(&request.message).await.expect("display");
        let roster = display.roster_field().expect("roster field");
        assert_eq!(roster.name, "Joined (1)");
        assert_eq!(roster.value, "A");
        assert!(!messenger.has_marker(&request.message, "thumbsup").await);

        coordinator.apply_signal(&request.id, Signal::leave("A")).await.expect("leave");
        let display = messenger.latest_display(&request.message).await.expect("display");
        let roster = display.roster_field().expect("roster field");
        assert_eq!(roster.name, "Joined (0)");
        assert_eq!(roster.value, EMPTY_ROSTER_PLACEHOLDER);
        assert!(messenger.has_marker(&request.message, "thumbsup").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_joins_land_once() {
        let messenger =
            Arc::new(InMemoryMessenger::new().with_latency(Duration::from_millis(5)));
        let coordinator = Arc::new(coordinator(messenger.clone()));
        let request = coordinator.create_request("C1", "Chess", 4, None).await.expect("create");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let id = request.id.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.apply_signal(&id, Signal::join("A")).await
            }));
        }
        for task in tasks {
            task.await.expect("task").expect("signal");
        }

        let stored = coordinator.store().get(&request.id).await.expect("tracked");
        assert_eq!(stored.joined, vec!["A"]);
        assert_eq!(messenger.max_in_flight().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn churn_never_overlaps_effects_for_one_request() {
        let messenger =
            Arc::new(InMemoryMessenger::new().with_latency(Duration::from_millis(2)));
        let coordinator = Arc::new(coordinator(messenger.clone()));
        let request = coordinator.create_request("C1", "Chess", 1, None).await.expect("create");

        let mut tasks = Vec::new();
        for index in 0..12 {
            let coordinator = coordinator.clone();
            let id = request.id.clone();
            let signal =
                if index % 2 == 0 { Signal::join("A") } else { Signal::leave("A") };
            tasks.push(tokio::spawn(async move { coordinator.apply_signal(&id, signal).await }));
        }
        for task in tasks {
            task.await.expect("task").expect("signal");
        }

        assert_eq!(messenger.max_in_flight().await, 1);
        let stored = coordinator.store().get(&request.id).await.expect("tracked");
        assert_eq!(stored.locked, stored.is_full());
        assert_eq!(messenger.has_marker(&request.message, "thumbsup").await, !stored.locked);
    }

    #[tokio::test]
    async fn held_request_does_not_block_another() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let coordinator = coordinator(messenger.clone());
        let first = coordinator.create_request("C1", "Chess", 2, None).await.expect("first");
        let second = coordinator.create_request("C1", "Go", 2, None).await.expect("second");

        let _held = coordinator.store().lock(&first.id).await.expect("hold first");
        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            coordinator.apply_signal(&second.id, Signal::join("B")),
        )
        .await
        .expect("second request must not wait")
        .expect("signal");

        assert_eq!(joined(&outcome), vec!["B"]);
    }

    #[tokio::test]
    async fn unknown_id_is_ignored() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let coordinator = coordinator(messenger.clone());

        let outcome = coordinator
            .apply_signal(&MatchId("C1:404".to_owned()), Signal::join("A"))
            .await
            .expect("signal");

        assert_eq!(outcome, SignalOutcome::Ignored(IgnoreReason::UnknownRequest));
        assert!(messenger.calls().await.is_empty());
    }

    #[tokio::test]
    async fn reactions_resolve_names_and_filter_noise() {
        let messenger = Arc::new(InMemoryMessenger::new().with_display_name("U1", "Alice"));
        let coordinator = coordinator(messenger.clone());
        let request = coordinator.create_request("C1", "Chess", 3, None).await.expect("create");
        let message = request.message.clone();

        let foreign = coordinator.on_reaction_add(&message, "tada", "U1").await.expect("foreign");
        assert_eq!(foreign, SignalOutcome::Ignored(IgnoreReason::ForeignMarker));

        let own = coordinator.on_reaction_add(&message, "thumbsup", "UBOT").await.expect("bot");
        assert_eq!(own, SignalOutcome::Ignored(IgnoreReason::SelfReaction));

        let added = coordinator.on_reaction_add(&message, "+1", "U1").await.expect("add");
        assert_eq!(joined(&added), vec!["Alice"]);

        let removed =
            coordinator.on_reaction_remove(&message, ":thumbsup:", "U1").await.expect("remove");
        assert!(joined(&removed).is_empty());

        let elsewhere = crate::domain::match_request::MessageRef::new("C1", "999.000100");
        let unknown = coordinator.on_reaction_add(&elsewhere, "thumbsup", "U1").await.expect("x");
        assert_eq!(unknown, SignalOutcome::Ignored(IgnoreReason::UnknownRequest));
    }

    #[tokio::test]
    async fn own_marker_reaction_is_ignored_without_configured_bot_id() {
        let messenger = Arc::new(
            InMemoryMessenger::new()
                .with_display_name(IN_MEMORY_BOT_USER, "squadup")
                .with_display_name("U1", "Alice")
                .with_bot("BOTHER"),
        );
        let settings = CoordinatorSettings { retry: RetryPolicy::none(), ..Default::default() };
        assert_eq!(settings.bot_user_id, None);
        let coordinator = MatchCoordinator::new(Arc::new(RosterStore::new()), messenger, settings);
        let request = coordinator.create_request("C1", "Chess", 1, None).await.expect("create");

        let own = coordinator
            .on_reaction_add(&request.message, "thumbsup", IN_MEMORY_BOT_USER)
            .await
            .expect("own marker");
        assert_eq!(own, SignalOutcome::Ignored(IgnoreReason::BotReaction));
        let other =
            coordinator.on_reaction_add(&request.message, "thumbsup", "BOTHER").await.expect("bot");
        assert_eq!(other, SignalOutcome::Ignored(IgnoreReason::BotReaction));

        let stored = coordinator.store().get(&request.id).await.expect("tracked");
        assert!(stored.joined.is_empty());
        assert!(!stored.locked);

        let human =
            coordinator.on_reaction_add(&request.message, "thumbsup", "U1").await.expect("human");
        assert_eq!(joined(&human), vec!["Alice"]);
        assert!(human.request().is_some_and(|request| request.locked));
    }

    #[tokio::test]
    async fn renamed_participant_leave_does_not_match() {
        let messenger = Arc::new(InMemoryMessenger::new().with_display_name("U1", "Alice"));
        let coordinator = coordinator(messenger.clone());
        let request = coordinator.create_request("C1", "Chess", 3, None).await.expect("create");

        coordinator.on_reaction_add(&request.message, "thumbsup", "U1").await.expect("add");
        messenger.set_display_name("U1", "Alicia").await;
        let outcome = coordinator
            .on_reaction_remove(&request.message, "thumbsup", "U1")
            .await
            .expect("remove");

        assert_eq!(joined(&outcome), vec!["Alice"]);
    }

    #[tokio::test]
    async fn lookup_failure_drops_the_signal() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let coordinator = coordinator(messenger.clone());
        let request = coordinator.create_request("C1", "Chess", 3, None).await.expect("create");
        messenger
            .fail_next(MessengerOperation::ResolveParticipant, MessengerError::Lookup("x".into()))
            .await;

        let outcome =
            coordinator.on_reaction_add(&request.message, "thumbsup", "U1").await.expect("add");

        assert_eq!(outcome, SignalOutcome::Ignored(IgnoreReason::UnresolvedParticipant));
        let stored = coordinator.store().get(&request.id).await.expect("tracked");
        assert!(stored.joined.is_empty());
    }

    #[tokio::test]
    async fn edit_failure_keeps_roster_state() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let coordinator = coordinator(messenger.clone());
        let request = coordinator.create_request("C1", "Chess", 3, None).await.expect("create");
        messenger.fail_next(MessengerOperation::Edit, MessengerError::Edit("gone".into())).await;

        let outcome = coordinator.apply_signal(&request.id, Signal::join("A")).await.expect("join");

        match outcome {
            SignalOutcome::Applied { request, effects, .. } => {
                assert_eq!(request.joined, vec!["A"]);
                assert!(!effects.display_synced);
            }
            other => panic!("expected applied outcome, got {other:?}"),
        }
        let stored = coordinator.store().get(&request.id).await.expect("tracked");
        assert_eq!(stored.joined, vec!["A"]);
    }
}
