use crate::domain::value_objects::QueueItemId;
use serde::{Deserialize, Serialize};

/// Per-pass tally returned by `SyncQueueManager::sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub delivered: usize,
    pub already_applied: usize,
    pub rejected: usize,
    pub retried: usize,
    pub exhausted: usize,
    pub aborted_offline: bool,
    /// Set when the pass did not run (offline or another pass in progress).
    pub skipped: bool,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> usize {
        self.delivered + self.already_applied
    }

    pub fn failed(&self) -> usize {
        self.rejected + self.exhausted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub processed: usize,
    pub total: usize,
    pub current: Option<QueueItemId>,
}

/// Snapshot published to UI listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    pub pending: usize,
}
