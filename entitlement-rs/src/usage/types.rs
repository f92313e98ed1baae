use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quota::ContentType;

/// One access to be consumed against a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub user_id: String,
    pub content_identifier: String,
    pub subject: Option<String>,
}

impl UsageRecord {
    pub fn new(user_id: impl Into<String>, content_identifier: impl Into<String>) -> Self {
        UsageRecord {
            user_id: user_id.into(),
            content_identifier: content_identifier.into(),
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Subject as stored; absent and empty are the same dedup key
    pub fn subject_key(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }
}

/// Append-only audit row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: String,
    pub user_id: String,
    pub content_type: ContentType,
    pub content_identifier: String,
    pub subject: Option<String>,
    /// UTC day for windowed rules
    pub window_key: Option<String>,
    pub accessed_at: DateTime<Utc>,
}

/// Result of an atomic check-and-record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// New unit consumed; `count` includes it
    Recorded { count: u32 },
    /// Dedup key already held; nothing consumed
    AlreadyOwned { count: u32 },
    /// Limit reached; nothing recorded
    Rejected { count: u32 },
}

impl ConsumeOutcome {
    pub fn count(&self) -> u32 {
        match *self {
            ConsumeOutcome::Recorded { count }
            | ConsumeOutcome::AlreadyOwned { count }
            | ConsumeOutcome::Rejected { count } => count,
        }
    }

    pub fn is_allowed(&self) -> bool {
        !matches!(self, ConsumeOutcome::Rejected { .. })
    }
}
