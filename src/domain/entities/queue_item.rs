use super::offline_file::FileReference;
use crate::domain::value_objects::{HttpMethod, QueueItemId, QueueStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub url: String,
    pub method: HttpMethod,
    pub headers: Headers,
    pub body: Option<String>,
    pub timestamp: i64,
    pub retries: u32,
    pub status: QueueStatus,
    pub last_error: Option<String>,
}

/// Partial update merged by `PersistentStore::update_queue_item`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueItemPatch {
    pub status: Option<QueueStatus>,
    pub retries: Option<u32>,
    pub last_error: Option<Option<String>>,
}

impl QueueItemPatch {
    pub fn status(status: QueueStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }
}

impl QueueItem {
    /// File-reference payload, if the body points at a staged file.
    pub fn file_reference(&self) -> Option<FileReference> {
        self.body.as_deref().and_then(FileReference::parse)
    }

    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retries >= max_retries
    }

    /// Merge `patch` into a copy of this item, enforcing the status table and
    /// the monotonic retry counter.
    pub fn apply_patch(&self, patch: &QueueItemPatch) -> Result<QueueItem, String> {
        let mut next = self.clone();

        if let Some(status) = patch.status {
            if !self.status.can_transition_to(status) {
                return Err(format!(
                    "{} -> {} is not allowed for item {}",
                    self.status, status, self.id
                ));
            }
            next.status = status;
        }

        if let Some(retries) = patch.retries {
            let is_reset = self.status == QueueStatus::Failed
                && next.status == QueueStatus::Pending
                && retries == 0;
            if retries < self.retries && !is_reset {
                return Err(format!(
                    "retries cannot decrease from {} to {} for item {}",
                    self.retries, retries, self.id
                ));
            }
            next.retries = retries;
        }

        if self.status == QueueStatus::Failed
            && next.status == QueueStatus::Pending
            && next.retries != 0
        {
            return Err(format!(
                "failed item {} can only return to pending with retries reset",
                self.id
            ));
        }

        if let Some(error) = &patch.last_error {
            next.last_error = error.clone();
        }

        Ok(next)
    }
}
