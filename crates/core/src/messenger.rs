use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::display::Display;
use crate::domain::match_request::MessageRef;
use crate::errors::MessengerError;

/// User id the in-memory messenger posts and reacts as.
pub const IN_MEMORY_BOT_USER: &str = "UBOT";

/// A reacting user as the chat platform reports them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub display_name: String,
    /// Bot users never join a roster, including the app's own marker.
    pub is_bot: bool,
}

impl Participant {
    pub fn human(display_name: impl Into<String>) -> Self {
        Self { display_name: display_name.into(), is_bot: false }
    }
}

/// Chat operations the coordinator depends on.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn post(&self, channel_id: &str, display: &Display)
        -> Result<MessageRef, MessengerError>;
    async fn edit(&self, message: &MessageRef, display: &Display) -> Result<(), MessengerError>;
    async fn add_marker(&self, message: &MessageRef, marker: &str) -> Result<(), MessengerError>;
    async fn remove_marker(&self, message: &MessageRef, marker: &str)
        -> Result<(), MessengerError>;
    async fn resolve_participant(&self, user_id: &str) -> Result<Participant, MessengerError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessengerOperation {
    Post,
    Edit,
    AddMarker,
    RemoveMarker,
    ResolveParticipant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessengerCall {
    Post { channel_id: String, display: Display },
    Edit { message: MessageRef, display: Display },
    AddMarker { message: MessageRef, marker: String },
    RemoveMarker { message: MessageRef, marker: String },
}

impl MessengerCall {
    pub fn operation(&self) -> MessengerOperation {
        match self {
            Self::Post { .. } => MessengerOperation::Post,
            Self::Edit { .. } => MessengerOperation::Edit,
            Self::AddMarker { .. } => MessengerOperation::AddMarker,
            Self::RemoveMarker { .. } => MessengerOperation::RemoveMarker,
        }
    }
}

/// Messenger that keeps everything in memory. Used by tests and by local
/// dry runs without chat credentials.
#[derive(Default)]
pub struct InMemoryMessenger {
    state: Mutex<InMemoryState>,
    latency: Option<Duration>,
}

#[derive(Default)]
struct InMemoryState {
    next_message: u64,
    calls: Vec<MessengerCall>,
    markers: HashMap<MessageRef, HashSet<String>>,
    latest_display: HashMap<MessageRef, Display>,
    display_names: HashMap<String, String>,
    bots: HashSet<String>,
    failures: HashMap<MessengerOperation, VecDeque<MessengerError>>,
    in_flight: HashMap<MessageRef, usize>,
    max_in_flight: usize,
}

impl InMemoryMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to edit and marker calls.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_display_name(mut self, user_id: &str, display_name: &str) -> Self {
        self.state.get_mut().display_names.insert(user_id.to_owned(), display_name.to_owned());
        self
    }

    pub fn with_bot(mut self, user_id: &str) -> Self {
        self.state.get_mut().bots.insert(user_id.to_owned());
        self
    }

    pub async fn set_display_name(&self, user_id: &str, display_name: &str) {
        self.state.lock().await.display_names.insert(user_id.to_owned(), display_name.to_owned());
    }

    pub async fn fail_next(&self, operation: MessengerOperation, error: MessengerError) {
        self.state.lock().await.failures.entry(operation).or_default().push_back(error);
    }

    pub async fn calls(&self) -> Vec<MessengerCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn count(&self, operation: MessengerOperation) -> usize {
        self.state.lock().await.calls.iter().filter(|call| call.operation() == operation).count()
    }

    pub async fn has_marker(&self, message: &MessageRef, marker: &str) -> bool {
        self.state
            .lock()
            .await
            .markers
            .get(message)
            .map(|markers| markers.contains(marker))
            .unwrap_or(false)
    }

    pub async fn latest_display(&self, message: &MessageRef) -> Option<Display> {
        self.state.lock().await.latest_display.get(message).cloned()
    }

    /// Highest number of effect calls observed in flight for one message.
    pub async fn max_in_flight(&self) -> usize {
        self.state.lock().await.max_in_flight
    }

    async fn begin(
        &self,
        operation: MessengerOperation,
        message: &MessageRef,
    ) -> Result<(), MessengerError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        let active = state.in_flight.entry(message.clone()).or_default();
        *active += 1;
        let active = *active;
        state.max_in_flight = state.max_in_flight.max(active);
        Ok(())
    }

    async fn finish(&self, message: &MessageRef, call: MessengerCall) {
        let mut state = self.state.lock().await;
        if let Some(active) = state.in_flight.get_mut(message) {
            *active = active.saturating_sub(1);
        }
        match &call {
            MessengerCall::Edit { message, display } => {
                state.latest_display.insert(message.clone(), display.clone());
            }
            MessengerCall::AddMarker { message, marker } => {
                state.markers.entry(message.clone()).or_default().insert(marker.clone());
            }
            MessengerCall::RemoveMarker { message, marker } => {
                if let Some(markers) = state.markers.get_mut(message) {
                    markers.remove(marker);
                }
            }
            MessengerCall::Post { .. } => {}
        }
        state.calls.push(call);
    }

    async fn effect(
        &self,
        operation: MessengerOperation,
        call: MessengerCall,
        message: &MessageRef,
    ) -> Result<(), MessengerError> {
        self.begin(operation, message).await?;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.finish(message, call).await;
        Ok(())
    }
}

#[async_trait]
impl Messenger for InMemoryMessenger {
    async fn post(
        &self,
        channel_id: &str,
        display: &Display,
    ) -> Result<MessageRef, MessengerError> {
        let mut state = self.state.lock().await;
        if let Some(error) =
            state.failures.get_mut(&MessengerOperation::Post).and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        state.next_message += 1;
        let message = MessageRef::new(channel_id, format!("{}.000100", state.next_message));
        state.latest_display.insert(message.clone(), display.clone());
        state.calls.push(MessengerCall::Post {
            channel_id: channel_id.to_owned(),
            display: display.clone(),
        });
        Ok(message)
    }

    async fn edit(&self, message: &MessageRef, display: &Display) -> Result<(), MessengerError> {
        let call = MessengerCall::Edit { message: message.clone(), display: display.clone() };
        self.effect(MessengerOperation::Edit, call, message).await
    }

    async fn add_marker(&self, message: &MessageRef, marker: &str) -> Result<(), MessengerError> {
        let call = MessengerCall::AddMarker { message: message.clone(), marker: marker.to_owned() };
        self.effect(MessengerOperation::AddMarker, call, message).await
    }

    async fn remove_marker(
        &self,
        message: &MessageRef,
        marker: &str,
    ) -> Result<(), MessengerError> {
        let call =
            MessengerCall::RemoveMarker { message: message.clone(), marker: marker.to_owned() };
        self.effect(MessengerOperation::RemoveMarker, call, message).await
    }

    async fn resolve_participant(&self, user_id: &str) -> Result<Participant, MessengerError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state
            .failures
            .get_mut(&MessengerOperation::ResolveParticipant)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(Participant {
            display_name: state
                .display_names
                .get(user_id)
                .cloned()
                .unwrap_or_else(|| user_id.to_owned()),
            is_bot: user_id == IN_MEMORY_BOT_USER || state.bots.contains(user_id),
        })
    }
}
