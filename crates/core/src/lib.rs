pub mod config;
pub mod coordinator;
pub mod domain;
pub mod errors;
pub mod messenger;
pub mod roster;

pub use coordinator::{
    CoordinatorSettings, EffectReport, IgnoreReason, IntakeReply, MatchCoordinator,
    RequestSource, RetryPolicy, SignalOutcome,
};
pub use domain::display::{render, Display, DisplayField};
pub use domain::marker::JoinMarker;
pub use domain::match_request::{
    reduce, Intent, MatchDraft, MatchId, MatchRequest, MatchState, MessageRef, Signal,
    TransitionEvent,
};
pub use errors::{DomainError, InterfaceError, MatchError, MessengerError, RosterError};
pub use messenger::{
    InMemoryMessenger, Messenger, MessengerCall, MessengerOperation, Participant,
    IN_MEMORY_BOT_USER,
};
pub use roster::{RosterGuard, RosterStats, RosterStore};
