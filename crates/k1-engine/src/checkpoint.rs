//! Checkpoint store
//!
//! Durable record of which steps of an install have completed. Only the
//! runner holds a [`CheckpointStore`]; steps never see it.

use crate::adapter::Clock;
use crate::error::Result;
use crate::state::{CheckpointEntry, SharedState, lock_state};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct CheckpointStore {
    state: SharedState,
    clock: Arc<dyn Clock>,
}

impl CheckpointStore {
    pub(crate) fn new(state: SharedState, clock: Arc<dyn Clock>) -> Self {
        Self { state, clock }
    }

    /// Record `key` as done. Returns once the session file is durable.
    pub fn mark(&self, key: &str) -> Result<()> {
        let now = self.clock.now();
        lock_state(&self.state).update(|doc| {
            let entry = doc.checkpoints.entry(key.to_string()).or_default();
            if !entry.done {
                *entry = CheckpointEntry {
                    done: true,
                    completed_at: Some(now),
                    cleared_at: None,
                };
            }
            Ok(())
        })?;
        tracing::debug!(checkpoint = key, "marked");
        Ok(())
    }

    /// Record `key` as reverted. Used by destroy only.
    pub(crate) fn clear(&self, key: &str) -> Result<()> {
        let now = self.clock.now();
        lock_state(&self.state).update(|doc| {
            if let Some(entry) = doc.checkpoints.get_mut(key)
                && entry.done
            {
                entry.done = false;
                entry.cleared_at = Some(now);
            }
            Ok(())
        })?;
        tracing::debug!(checkpoint = key, "cleared");
        Ok(())
    }

    pub fn is_done(&self, key: &str) -> bool {
        lock_state(&self.state)
            .document()
            .checkpoints
            .get(key)
            .is_some_and(|entry| entry.done)
    }

    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        lock_state(&self.state)
            .document()
            .checkpoints
            .iter()
            .map(|(key, entry)| (key.clone(), entry.done))
            .collect()
    }

    /// Keys currently marked done.
    pub fn done_keys(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|(key, done)| done.then_some(key))
            .collect()
    }
}
