//! Integration tests for access decisions against SQLite

use chrono::{Duration, TimeZone, Utc};
use entitlement_rs::access::{AccessDecision, AccessEngine, AccessReason, AccessRequest};
use entitlement_rs::clock::{Clock, ManualClock};
use entitlement_rs::quota::{ContentType, DefaultLimits, LimitType, QuotaLimitStore, QuotaPolicy};
use entitlement_rs::subscription::{Subscription, SubscriptionStatus, SubscriptionStore};
use entitlement_rs::usage::SqliteUsageStore;
use entitlement_rs::EntitlementError;
use sqlx::SqlitePool;
use std::sync::Arc;

struct Harness {
    engine: AccessEngine,
    clock: Arc<ManualClock>,
    subscriptions: SubscriptionStore,
    limits: QuotaLimitStore,
    usage: SqliteUsageStore,
}

async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    entitlement_rs::db::init_schema(&pool).await.unwrap();
    pool
}

async fn setup() -> Harness {
    let pool = setup_test_db().await;
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap()));
    let subscriptions = SubscriptionStore::new(pool.clone());
    let limits = QuotaLimitStore::new(pool.clone());
    let usage = SqliteUsageStore::new(pool.clone());

    // Zero TTL so limit edits apply to the next decision
    let policy = Arc::new(QuotaPolicy::new(
        Arc::new(limits.clone()),
        DefaultLimits::default(),
        std::time::Duration::ZERO,
    ));
    let engine = AccessEngine::new(
        Arc::new(subscriptions.clone()),
        policy,
        Arc::new(usage.clone()),
        clock.clone(),
        std::time::Duration::from_secs(2),
    );

    Harness {
        engine,
        clock,
        subscriptions,
        limits,
        usage,
    }
}

async fn grant_premium(h: &Harness, user_id: &str, days: i64) {
    let now = h.clock.now();
    h.subscriptions
        .insert(&Subscription {
            id: format!("sub-{}", user_id),
            user_id: user_id.to_string(),
            plan_id: "monthly".to_string(),
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: now + Duration::days(days),
            amount: 49.0,
            payment_ref: Some("pay_test".to_string()),
            order_ref: None,
            created_at: now,
        })
        .await
        .unwrap();
}

async fn chapter(h: &Harness, user_id: &str, subject: &str, id: &str) -> AccessDecision {
    h.engine
        .check_and_consume(&AccessRequest::chapter(user_id, subject, id))
        .await
        .unwrap()
}

async fn question(h: &Harness, user_id: &str, n: u32) -> AccessDecision {
    h.engine
        .check_and_consume(
            &AccessRequest::new(user_id, "question").with_identifier(format!("q-{}", n)),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_premium_allowed_for_every_content_type() {
    let h = setup().await;
    grant_premium(&h, "premium-1", 30).await;

    for content_type in ["chapter", "question", "ai_query", "flashcard"] {
        for n in 0..10 {
            let request = AccessRequest::new("premium-1", content_type)
                .with_identifier(format!("item-{}", n))
                .with_subject("physics");
            let decision = h.engine.check_and_consume(&request).await.unwrap();
            assert_eq!(decision, AccessDecision::premium());
        }
    }

    let events = h.usage.events_for_user("premium-1", 100).await.unwrap();
    assert!(events.is_empty(), "premium use must not be recorded");
}

#[tokio::test]
async fn test_expired_premium_falls_back_to_free_tier() {
    let h = setup().await;
    grant_premium(&h, "lapsed", 30).await;

    h.clock.advance(Duration::days(31));

    let decision = chapter(&h, "lapsed", "physics", "ch-1").await;
    assert_eq!(decision.reason, AccessReason::FreeTier);
    assert_eq!(decision.remaining, Some(4));
}

#[tokio::test]
async fn test_five_free_chapters_then_denied() {
    let h = setup().await;

    for n in 1..=5u32 {
        let decision = chapter(&h, "free-1", "physics", &format!("ch-{}", n)).await;
        assert!(decision.allowed, "chapter {} should be allowed", n);
        assert_eq!(decision.reason, AccessReason::FreeTier);
        assert_eq!(decision.remaining, Some(5 - n));
    }

    let sixth = chapter(&h, "free-1", "physics", "ch-6").await;
    assert!(!sixth.allowed);
    assert_eq!(sixth.reason, AccessReason::LimitExceeded);
    assert_eq!(sixth.remaining, Some(0));
    assert_eq!(
        sixth.message.as_deref(),
        Some("You have used all 5 free chapters. Upgrade to premium for unlimited access.")
    );

    // Owned chapters stay accessible in any order, any number of times
    for n in [3, 1, 5, 5, 2, 4, 1] {
        let decision = chapter(&h, "free-1", "physics", &format!("ch-{}", n)).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, Some(0));
    }

    let summary = h.engine.usage_summary("free-1").await.unwrap();
    assert_eq!(summary.quota(ContentType::Chapter).unwrap().used, 5);
}

#[tokio::test]
async fn test_same_chapter_in_other_subject_is_distinct() {
    let h = setup().await;

    chapter(&h, "free-2", "physics", "ch-1").await;
    let decision = chapter(&h, "free-2", "chemistry", "ch-1").await;

    assert!(decision.allowed);
    assert_eq!(decision.remaining, Some(3));
}

#[tokio::test]
async fn test_repeat_chapter_is_idempotent() {
    let h = setup().await;

    let first = chapter(&h, "free-3", "maths", "ch-7").await;
    let second = chapter(&h, "free-3", "maths", "ch-7").await;
    let third = chapter(&h, "free-3", "maths", "ch-7").await;

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(first.remaining, Some(4));

    let summary = h.engine.usage_summary("free-3").await.unwrap();
    assert_eq!(summary.quota(ContentType::Chapter).unwrap().used, 1);
}

#[tokio::test]
async fn test_missing_subject_matches_empty_subject() {
    let h = setup().await;

    let request = AccessRequest::new("free-4", "chapter").with_identifier("ch-1");
    h.engine.check_and_consume(&request).await.unwrap();
    let again = h
        .engine
        .check_and_consume(&request.clone().with_subject(""))
        .await
        .unwrap();

    assert_eq!(again.remaining, Some(4));
}

#[tokio::test]
async fn test_daily_question_limit_resets_at_utc_midnight() {
    let h = setup().await;
    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 14, 23, 0, 0).unwrap());

    for n in 1..=25u32 {
        let decision = question(&h, "free-5", n).await;
        assert!(decision.allowed, "question {} should be allowed", n);
        assert_eq!(decision.reason, AccessReason::WithinLimit);
        assert_eq!(decision.remaining, Some(25 - n));
    }

    let denied = question(&h, "free-5", 26).await;
    assert!(!denied.allowed);
    assert_eq!(denied.reason, AccessReason::DailyLimitExceeded);
    assert_eq!(denied.remaining, Some(0));
    assert_eq!(
        denied.message.as_deref(),
        Some("Free daily limit of 25 questions reached. Upgrade to premium for unlimited access.")
    );

    // Still the same UTC day
    h.clock.advance(Duration::minutes(59));
    assert!(!question(&h, "free-5", 27).await.allowed);

    h.clock.advance(Duration::minutes(2));
    let next_day = question(&h, "free-5", 28).await;
    assert!(next_day.allowed);
    assert_eq!(next_day.remaining, Some(24));
}

#[tokio::test]
async fn test_ai_queries_denied_by_default() {
    let h = setup().await;

    for _ in 0..3 {
        let decision = h
            .engine
            .check_and_consume(&AccessRequest::new("free-6", "ai_query"))
            .await
            .unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.reason, AccessReason::DailyLimitExceeded);
        assert_eq!(decision.remaining, Some(0));
        assert!(decision.message.unwrap().contains("daily limit of 0 AI queries"));
    }
}

#[tokio::test]
async fn test_unknown_content_type() {
    let h = setup().await;

    let decision = h
        .engine
        .check_and_consume(&AccessRequest::new("free-7", "flashcard"))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, AccessReason::UnknownContentType);
    assert_eq!(decision.remaining, None);

    // Premium check still comes first
    grant_premium(&h, "free-7", 30).await;
    let decision = h
        .engine
        .check_and_consume(&AccessRequest::new("free-7", "flashcard"))
        .await
        .unwrap();
    assert_eq!(decision.reason, AccessReason::PremiumSubscriber);
}

#[tokio::test]
async fn test_configured_limits_override_defaults() {
    let h = setup().await;
    h.limits.set_limit(LimitType::QuestionsPerDay, 2).await.unwrap();
    h.limits.set_limit(LimitType::AiQueriesPerDay, 1).await.unwrap();

    assert!(question(&h, "free-8", 1).await.allowed);
    assert!(question(&h, "free-8", 2).await.allowed);
    assert!(!question(&h, "free-8", 3).await.allowed);

    let ai = AccessRequest::new("free-8", "ai_query");
    assert!(h.engine.check_and_consume(&ai).await.unwrap().allowed);
    assert!(!h.engine.check_and_consume(&ai).await.unwrap().allowed);

    // Chapters untouched by the partial configuration
    assert_eq!(chapter(&h, "free-8", "physics", "ch-1").await.remaining, Some(4));
}

#[tokio::test]
async fn test_lowered_chapter_limit_keeps_owned_chapters() {
    let h = setup().await;
    for n in 1..=4 {
        chapter(&h, "free-9", "biology", &format!("ch-{}", n)).await;
    }

    h.limits.set_limit(LimitType::Chapters, 2).await.unwrap();

    let owned = chapter(&h, "free-9", "biology", "ch-3").await;
    assert!(owned.allowed);
    assert_eq!(owned.remaining, Some(0));

    let new = chapter(&h, "free-9", "biology", "ch-9").await;
    assert!(!new.allowed);
    assert_eq!(new.reason, AccessReason::LimitExceeded);
}

#[tokio::test]
async fn test_users_do_not_share_quota() {
    let h = setup().await;
    h.limits.set_limit(LimitType::QuestionsPerDay, 1).await.unwrap();

    assert!(question(&h, "alice", 1).await.allowed);
    assert!(!question(&h, "alice", 2).await.allowed);
    assert!(question(&h, "bob", 1).await.allowed);
}

#[tokio::test]
async fn test_usage_summary_does_not_consume() {
    let h = setup().await;
    question(&h, "free-10", 1).await;

    for _ in 0..3 {
        let summary = h.engine.usage_summary("free-10").await.unwrap();
        let questions = summary.quota(ContentType::Question).unwrap();
        assert_eq!((questions.used, questions.remaining), (1, 24));
        assert!(!summary.premium);
    }
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let h = setup().await;

    let err = h
        .engine
        .check_and_consume(&AccessRequest::new("", "question"))
        .await
        .unwrap_err();
    assert!(matches!(err, EntitlementError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_chapter_without_identifier_is_denied() {
    let h = setup().await;
    h.engine
        .check_and_consume(&AccessRequest::chapter("free-12", "physics", "ch-1"))
        .await
        .unwrap();

    let decision = h
        .engine
        .check_and_consume(&AccessRequest::new("free-12", "chapter").with_subject("physics"))
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.reason, AccessReason::LimitExceeded);
    assert_eq!(decision.remaining, Some(4));
    assert_eq!(h.usage.events_for_user("free-12", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_closed_store_is_a_service_fault() {
    let h = setup().await;
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    pool.close().await;

    let engine = AccessEngine::new(
        Arc::new(SubscriptionStore::new(pool.clone())),
        Arc::new(QuotaPolicy::new(
            Arc::new(h.limits.clone()),
            DefaultLimits::default(),
            std::time::Duration::ZERO,
        )),
        Arc::new(h.usage.clone()),
        h.clock.clone(),
        std::time::Duration::from_secs(2),
    );

    let err = engine
        .check_and_consume(&AccessRequest::new("free-12", "question"))
        .await
        .unwrap_err();
    assert!(err.is_service_fault());
}
