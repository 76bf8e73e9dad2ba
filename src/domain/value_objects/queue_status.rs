use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(format!("Unknown queue status: {other}")),
        }
    }

    /// Legal status edges. Removal is not a status and is always allowed.
    ///
    /// `Pending -> Failed` covers items whose retry budget was exhausted before
    /// the pass started; `Failed -> Pending` is only valid as an explicit reset
    /// (checked together with the retry counter by `QueueItem::apply_patch`).
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::Processing)
                | (QueueStatus::Pending, QueueStatus::Failed)
                | (QueueStatus::Processing, QueueStatus::Pending)
                | (QueueStatus::Processing, QueueStatus::Failed)
                | (QueueStatus::Failed, QueueStatus::Pending)
        ) || *self == next
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
