use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::window_key;

/// Metered content kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Chapter,
    Question,
    AiQuery,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [ContentType::Chapter, ContentType::Question, ContentType::AiQuery];

    /// Parse the wire name; unknown names are a client error handled by the caller
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chapter" => Some(ContentType::Chapter),
            "question" => Some(ContentType::Question),
            "ai_query" => Some(ContentType::AiQuery),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Chapter => "chapter",
            ContentType::Question => "question",
            ContentType::AiQuery => "ai_query",
        }
    }

    /// Limit row governing this content type
    pub fn limit_type(&self) -> LimitType {
        match self {
            ContentType::Chapter => LimitType::Chapters,
            ContentType::Question => LimitType::QuestionsPerDay,
            ContentType::AiQuery => LimitType::AiQueriesPerDay,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrator-configurable limit rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Chapters,
    QuestionsPerDay,
    AiQueriesPerDay,
}

impl LimitType {
    pub const ALL: [LimitType; 3] = [
        LimitType::Chapters,
        LimitType::QuestionsPerDay,
        LimitType::AiQueriesPerDay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Chapters => "chapters",
            LimitType::QuestionsPerDay => "questions_per_day",
            LimitType::AiQueriesPerDay => "ai_queries_per_day",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "chapters" => Some(LimitType::Chapters),
            "questions_per_day" => Some(LimitType::QuestionsPerDay),
            "ai_queries_per_day" => Some(LimitType::AiQueriesPerDay),
            _ => None,
        }
    }
}

impl std::fmt::Display for LimitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Span over which consumption accumulates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// Never resets
    Lifetime,
    /// Resets at UTC midnight
    UtcDay,
}

/// Identity deciding whether an access consumes a new unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    /// (subject, content_identifier); repeats are free
    SubjectAndIdentifier,
    /// Every event counts
    EveryEvent,
}

/// Effective rule for one content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaRule {
    pub content_type: ContentType,
    pub limit: u32,
    pub window: Window,
    pub dedup: DedupKey,
}

impl QuotaRule {
    pub fn new(content_type: ContentType, limit: u32) -> Self {
        let (window, dedup) = match content_type {
            ContentType::Chapter => (Window::Lifetime, DedupKey::SubjectAndIdentifier),
            ContentType::Question | ContentType::AiQuery => (Window::UtcDay, DedupKey::EveryEvent),
        };
        QuotaRule {
            content_type,
            limit,
            window,
            dedup,
        }
    }

    /// Counter key for the window containing `now`; `None` for lifetime rules
    pub fn window_key(&self, now: DateTime<Utc>) -> Option<String> {
        match self.window {
            Window::Lifetime => None,
            Window::UtcDay => Some(window_key(now)),
        }
    }

    /// Advisory remaining units, clamped at zero
    pub fn remaining(&self, count: u32) -> u32 {
        self.limit.saturating_sub(count)
    }
}

/// Hardcoded fallbacks for missing `quota_limits` rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultLimits {
    #[serde(default = "default_chapters")]
    pub chapters: u32,
    #[serde(default = "default_questions_per_day")]
    pub questions_per_day: u32,
    #[serde(default = "default_ai_queries_per_day")]
    pub ai_queries_per_day: u32,
}

fn default_chapters() -> u32 {
    5
}

fn default_questions_per_day() -> u32 {
    25
}

fn default_ai_queries_per_day() -> u32 {
    0
}

impl Default for DefaultLimits {
    fn default() -> Self {
        DefaultLimits {
            chapters: default_chapters(),
            questions_per_day: default_questions_per_day(),
            ai_queries_per_day: default_ai_queries_per_day(),
        }
    }
}

impl DefaultLimits {
    pub fn get(&self, limit_type: LimitType) -> u32 {
        match limit_type {
            LimitType::Chapters => self.chapters,
            LimitType::QuestionsPerDay => self.questions_per_day,
            LimitType::AiQueriesPerDay => self.ai_queries_per_day,
        }
    }
}

/// Where an effective limit value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitOrigin {
    Configured,
    Default,
}

/// Effective limit, as listed for administrators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveLimit {
    pub limit_type: LimitType,
    pub limit_value: u32,
    pub origin: LimitOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_content_type_parse() {
        assert_eq!(ContentType::parse("chapter"), Some(ContentType::Chapter));
        assert_eq!(ContentType::parse("question"), Some(ContentType::Question));
        assert_eq!(ContentType::parse("ai_query"), Some(ContentType::AiQuery));
        assert_eq!(ContentType::parse("Chapter"), None);
        assert_eq!(ContentType::parse("video"), None);
        assert_eq!(ContentType::parse(""), None);
    }

    #[test]
    fn test_limit_type_names_round_trip() {
        for limit_type in LimitType::ALL {
            assert_eq!(LimitType::from_db_string(limit_type.as_str()), Some(limit_type));
        }
    }

    #[test]
    fn test_rule_shapes() {
        let chapter = QuotaRule::new(ContentType::Chapter, 5);
        assert_eq!(chapter.window, Window::Lifetime);
        assert_eq!(chapter.dedup, DedupKey::SubjectAndIdentifier);

        let question = QuotaRule::new(ContentType::Question, 25);
        assert_eq!(question.window, Window::UtcDay);
        assert_eq!(question.dedup, DedupKey::EveryEvent);
    }

    #[test]
    fn test_rule_window_key() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 17, 30, 0).unwrap();
        assert_eq!(QuotaRule::new(ContentType::Chapter, 5).window_key(now), None);
        assert_eq!(
            QuotaRule::new(ContentType::AiQuery, 0).window_key(now),
            Some("2026-10-18".to_string())
        );
    }

    #[test]
    fn test_remaining_saturates() {
        let rule = QuotaRule::new(ContentType::Question, 25);
        assert_eq!(rule.remaining(0), 25);
        assert_eq!(rule.remaining(25), 0);
        assert_eq!(rule.remaining(40), 0);
    }

    #[test]
    fn test_default_limits() {
        let defaults = DefaultLimits::default();
        assert_eq!(defaults.get(LimitType::Chapters), 5);
        assert_eq!(defaults.get(LimitType::QuestionsPerDay), 25);
        assert_eq!(defaults.get(LimitType::AiQueriesPerDay), 0);
    }
}
