use serde::{Deserialize, Serialize};

use crate::quota::{ContentType, Window};
use crate::subscription::Subscription;

/// Longest accepted identifier or subject, in bytes
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Incoming access request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub user_id: String,
    pub content_type: String,
    #[serde(default)]
    pub content_identifier: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

impl AccessRequest {
    pub fn new(user_id: impl Into<String>, content_type: impl Into<String>) -> Self {
        AccessRequest {
            user_id: user_id.into(),
            content_type: content_type.into(),
            content_identifier: None,
            subject: None,
        }
    }

    pub fn chapter(
        user_id: impl Into<String>,
        subject: impl Into<String>,
        chapter: impl Into<String>,
    ) -> Self {
        AccessRequest {
            user_id: user_id.into(),
            content_type: ContentType::Chapter.as_str().to_string(),
            content_identifier: Some(chapter.into()),
            subject: Some(subject.into()),
        }
    }

    pub fn with_identifier(mut self, content_identifier: impl Into<String>) -> Self {
        self.content_identifier = Some(content_identifier.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Why a decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    PremiumSubscriber,
    FreeTier,
    WithinLimit,
    LimitExceeded,
    DailyLimitExceeded,
    UnknownContentType,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::PremiumSubscriber => "premium_subscriber",
            AccessReason::FreeTier => "free_tier",
            AccessReason::WithinLimit => "within_limit",
            AccessReason::LimitExceeded => "limit_exceeded",
            AccessReason::DailyLimitExceeded => "daily_limit_exceeded",
            AccessReason::UnknownContentType => "unknown_content_type",
        }
    }
}

impl std::fmt::Display for AccessReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of check-and-consume, in its wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: AccessReason,
    /// User-facing text, present only on denial
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    /// Advisory units left; for display only
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub remaining: Option<u32>,
}

impl AccessDecision {
    pub fn premium() -> Self {
        AccessDecision {
            allowed: true,
            reason: AccessReason::PremiumSubscriber,
            message: None,
            remaining: None,
        }
    }

    pub fn allowed(reason: AccessReason, remaining: u32) -> Self {
        AccessDecision {
            allowed: true,
            reason,
            message: None,
            remaining: Some(remaining),
        }
    }

    pub fn denied(reason: AccessReason, message: String, remaining: Option<u32>) -> Self {
        AccessDecision {
            allowed: false,
            reason,
            message: Some(message),
            remaining,
        }
    }

    pub fn unknown_content_type(content_type: &str) -> Self {
        Self::denied(
            AccessReason::UnknownContentType,
            format!("Unknown content type '{}'", content_type),
            None,
        )
    }
}

/// Free-tier consumption of one content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub content_type: ContentType,
    pub window: Window,
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
}

/// Read-only overview for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub user_id: String,
    pub premium: bool,
    pub subscription: Option<Subscription>,
    pub quotas: Vec<QuotaUsage>,
}

impl UsageSummary {
    pub fn quota(&self, content_type: ContentType) -> Option<&QuotaUsage> {
        self.quotas.iter().find(|q| q.content_type == content_type)
    }
}
