//! Process-local store of open match requests.
//!
//! Every request sits behind its own mutex. The outer map lock is only held
//! long enough to find or insert an entry, so work on one request never waits
//! on another request's signal.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::match_request::{MatchId, MatchRequest, MatchState};
use crate::errors::RosterError;

#[derive(Default)]
pub struct RosterStore {
    entries: RwLock<HashMap<MatchId, Arc<Mutex<MatchRequest>>>>,
}

/// Point-in-time counts. `in_flight` entries were mid-signal when counted,
/// so they are not classified as open or full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RosterStats {
    pub tracked: usize,
    pub full: usize,
    pub in_flight: usize,
}

/// Exclusive access to one stored request. Other holders for the same id wait
/// until this guard is dropped.
pub struct RosterGuard {
    guard: OwnedMutexGuard<MatchRequest>,
}

impl Deref for RosterGuard {
    type Target = MatchRequest;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for RosterGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl RosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &MatchId) -> Option<MatchRequest> {
        let entry = self.entry(id).await?;
        let request = entry.lock().await;
        Some(request.clone())
    }

    pub async fn insert(&self, request: MatchRequest) -> Result<(), RosterError> {
        let mut entries = self.entries.write().await;
        match entries.entry(request.id.clone()) {
            Entry::Occupied(occupied) => Err(RosterError::DuplicateId(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(request)));
                Ok(())
            }
        }
    }

    pub async fn lock(&self, id: &MatchId) -> Result<RosterGuard, RosterError> {
        let entry = self.entry(id).await.ok_or_else(|| RosterError::NotFound(id.clone()))?;
        Ok(RosterGuard { guard: entry.lock_owned().await })
    }

    pub async fn update<F>(&self, id: &MatchId, apply: F) -> Result<MatchRequest, RosterError>
    where
        F: FnOnce(&mut MatchRequest),
    {
        let mut guard = self.lock(id).await?;
        apply(&mut guard);
        Ok(guard.clone())
    }

    pub async fn contains(&self, id: &MatchId) -> bool {
        self.entries.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Counts requests without waiting on any entry lock.
    pub async fn stats(&self) -> RosterStats {
        let entries = self.entries.read().await;
        let mut stats = RosterStats { tracked: entries.len(), ..RosterStats::default() };
        for entry in entries.values() {
            match entry.try_lock() {
                Ok(request) if request.state() == MatchState::Full => stats.full += 1,
                Ok(_) => {}
                Err(_) => stats.in_flight += 1,
            }
        }
        stats
    }

    async fn entry(&self, id: &MatchId) -> Option<Arc<Mutex<MatchRequest>>> {
        self.entries.read().await.get(id).cloned()
    }
}
