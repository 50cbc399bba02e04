//! Geometry index - id and user lookup for outstanding messages
//!
//! The index does not own message bodies; each stage does. It records which
//! stage a message is in, so deletions can be routed without scanning.

use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Where an outstanding message currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Hold,
    Pending,
    Active { row: usize },
}

/// Index record for one outstanding message
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Admission sequence number. Queue slots carrying a stale seq are tombstones.
    pub seq: u64,
    pub stage: Stage,
    /// Case-folded username
    pub user: String,
}

/// id → entry and user → ids, kept in lockstep
#[derive(Debug, Default)]
pub struct GeometryIndex {
    by_id: HashMap<String, IndexEntry>,
    by_user: HashMap<String, HashSet<String>>,
    next_seq: u64,
}

impl GeometryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly admitted message in the hold stage. Returns its seq.
    ///
    /// Any previous entry under the same id is replaced.
    pub fn insert(&mut self, id: &str, user: &str) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(old) = self.by_id.insert(
            id.to_string(),
            IndexEntry {
                seq,
                stage: Stage::Hold,
                user: user.to_string(),
            },
        ) {
            self.unlink_user(&old.user, id);
        }
        self.by_user
            .entry(user.to_string())
            .or_default()
            .insert(id.to_string());

        trace!(id, user, seq, "Indexed message");
        seq
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.by_id.get(id)
    }

    /// True if `(id, seq)` still refers to the indexed message in `stage`
    pub fn is_live(&self, id: &str, seq: u64, stage: Stage) -> bool {
        self.by_id
            .get(id)
            .is_some_and(|e| e.seq == seq && e.stage == stage)
    }

    /// Move an entry to a new stage. No-op for unknown ids.
    pub fn set_stage(&mut self, id: &str, stage: Stage) {
        if let Some(entry) = self.by_id.get_mut(id) {
            entry.stage = stage;
        }
    }

    /// Drop both the id entry and its user link
    pub fn remove(&mut self, id: &str) -> Option<IndexEntry> {
        let entry = self.by_id.remove(id)?;
        self.unlink_user(&entry.user, id);
        trace!(id, seq = entry.seq, "Unindexed message");
        Some(entry)
    }

    /// Outstanding ids for a case-folded username
    pub fn ids_for_user(&self, user: &str) -> Vec<String> {
        self.by_user
            .get(user)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of outstanding messages
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Number of users with at least one outstanding message
    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    /// Forget everything. Seq numbers keep increasing so old tombstones stay dead.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_user.clear();
    }

    fn unlink_user(&mut self, user: &str, id: &str) {
        if let Some(ids) = self.by_user.get_mut(user) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_user.remove(user);
            }
        }
    }
}
