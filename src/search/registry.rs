//! Bounded in-memory store of search operations.
//!
//! Terminal operations stay visible for a retention window and are swept
//! lazily when operations are created, cancelled or listed. When the store
//! is full, the oldest terminal operations are evicted first; in-flight
//! operations are never evicted.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::operation::{ProviderResult, SearchOperation, SearchStatus};
use crate::provider::ProviderKind;

type OperationMap = HashMap<String, SearchOperation>;

pub struct OperationRegistry {
    operations: Mutex<OperationMap>,
    retention: TimeDelta,
    capacity: usize,
}

impl OperationRegistry {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            operations: Mutex::new(HashMap::new()),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
            capacity: capacity.max(1),
        }
    }

    // The map holds plain data, so a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, OperationMap> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new `pending` operation and returns its id.
    pub fn begin(&self, query: &str) -> String {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let mut ops = self.lock();
        sweep(&mut ops, self.retention, now);
        while ops.len() >= self.capacity {
            if !evict_oldest_terminal(&mut ops) {
                warn!(
                    capacity = self.capacity,
                    "search registry full of in-flight operations"
                );
                break;
            }
        }
        ops.insert(id.clone(), SearchOperation::new(id.clone(), query, now));
        id
    }

    pub fn start(&self, id: &str) -> bool {
        self.update(id, |op| op.transition(SearchStatus::InProgress, Utc::now()))
    }

    pub fn record(
        &self,
        id: &str,
        provider: ProviderKind,
        outcome: Result<ProviderResult, String>,
    ) -> bool {
        self.update(id, |op| op.record(provider, outcome))
    }

    pub fn has_result(&self, id: &str) -> bool {
        self.lock().get(id).is_some_and(SearchOperation::has_result)
    }

    /// Moves the operation to a terminal status and returns it as stored.
    /// An operation that was already terminal (e.g. cancelled) keeps its status.
    pub fn finish(&self, id: &str, status: SearchStatus) -> Option<SearchOperation> {
        let mut ops = self.lock();
        let op = ops.get_mut(id)?;
        if !op.transition(status, Utc::now()) {
            debug!(search_id = id, current = ?op.status, requested = ?status, "operation already terminal");
        }
        Some(op.clone())
    }

    /// Advisory: marks the operation cancelled without aborting provider calls.
    /// Returns whether the id is known.
    pub fn cancel(&self, id: &str) -> bool {
        let now = Utc::now();
        let mut ops = self.lock();
        sweep(&mut ops, self.retention, now);
        match ops.get_mut(id) {
            Some(op) => {
                if op.transition(SearchStatus::Cancelled, now) {
                    info!(search_id = id, "search cancelled");
                }
                true
            }
            None => false,
        }
    }

    /// Retained operations, oldest first.
    pub fn snapshot(&self) -> Vec<SearchOperation> {
        let mut ops = self.lock();
        sweep(&mut ops, self.retention, Utc::now());
        let mut list: Vec<SearchOperation> = ops.values().cloned().collect();
        list.sort_by_key(|op| op.started_at);
        list
    }

    #[cfg(test)]
    pub fn count(&self) -> usize {
        let mut ops = self.lock();
        sweep(&mut ops, self.retention, Utc::now());
        ops.len()
    }

    #[cfg(test)]
    pub(crate) fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        sweep(&mut self.lock(), self.retention, now)
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut SearchOperation) -> bool) -> bool {
        self.lock().get_mut(id).is_some_and(f)
    }
}

fn sweep(ops: &mut OperationMap, retention: TimeDelta, now: DateTime<Utc>) -> usize {
    let before = ops.len();
    ops.retain(|_, op| !op.ended_at.is_some_and(|ended| now - ended > retention));
    let removed = before - ops.len();
    if removed > 0 {
        debug!(removed, "swept expired search operations");
    }
    removed
}

fn evict_oldest_terminal(ops: &mut OperationMap) -> bool {
    let oldest = ops
        .values()
        .filter(|op| op.status.is_terminal())
        .min_by_key(|op| op.ended_at.unwrap_or(op.started_at))
        .map(|op| op.id.clone());
    match oldest {
        Some(id) => {
            ops.remove(&id);
            debug!(search_id = %id, "evicted terminal search operation");
            true
        }
        None => false,
    }
}
