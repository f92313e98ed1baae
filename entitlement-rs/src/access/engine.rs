//! Access decision engine
//!
//! Per request:
//! 1. premium check (short-circuits, no usage tracked)
//! 2. rule lookup (unknown content type is denied)
//! 3. atomic check-and-consume against the usage store
//!
//! Ledger and limit lookups are bounded here. The usage store bounds its
//! own write so that a timeout never hides a committed consumption.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::types::{
    AccessDecision, AccessReason, AccessRequest, QuotaUsage, UsageSummary, MAX_IDENTIFIER_LEN,
};
use crate::clock::Clock;
use crate::error::{EntitlementError, Result, Store};
use crate::quota::{ContentType, DedupKey, QuotaPolicy, QuotaRule};
use crate::subscription::SubscriptionLedger;
use crate::usage::{ConsumeOutcome, UsageRecord, UsageStore};

pub struct AccessEngine {
    ledger: Arc<dyn SubscriptionLedger>,
    policy: Arc<QuotaPolicy>,
    usage: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl AccessEngine {
    pub fn new(
        ledger: Arc<dyn SubscriptionLedger>,
        policy: Arc<QuotaPolicy>,
        usage: Arc<dyn UsageStore>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        AccessEngine {
            ledger,
            policy,
            usage,
            clock,
            store_timeout,
        }
    }

    pub fn policy(&self) -> &Arc<QuotaPolicy> {
        &self.policy
    }

    /// Decide whether the request is allowed and, if so, consume quota.
    ///
    /// Store faults and timeouts are returned as errors, never as a decision.
    pub async fn check_and_consume(&self, request: &AccessRequest) -> Result<AccessDecision> {
        validate(request)?;
        let now = self.clock.now();

        let subscription = self
            .bounded(
                Store::Subscriptions,
                self.ledger.active_subscription(&request.user_id, now),
            )
            .await?;
        if subscription.is_some() {
            debug!(user_id = %request.user_id, content_type = %request.content_type, "Premium access");
            return Ok(AccessDecision::premium());
        }

        let Some(content_type) = ContentType::parse(&request.content_type) else {
            debug!(user_id = %request.user_id, content_type = %request.content_type, "Unknown content type");
            return Ok(AccessDecision::unknown_content_type(&request.content_type));
        };

        let rule = self
            .bounded(Store::QuotaLimits, self.policy.rule_for(content_type))
            .await?;

        let content_identifier = request.content_identifier.clone().unwrap_or_default();
        if rule.dedup == DedupKey::SubjectAndIdentifier && content_identifier.is_empty() {
            let used = self
                .bounded(
                    Store::Usage,
                    self.usage.count_consumed(&request.user_id, &rule, now),
                )
                .await?;
            debug!(user_id = %request.user_id, content_type = %content_type, "Missing content identifier");
            return Ok(AccessDecision::denied(
                denial_reason(content_type),
                format!("A {} identifier is required.", content_type),
                Some(rule.remaining(used)),
            ));
        }

        let record = UsageRecord {
            user_id: request.user_id.clone(),
            content_identifier,
            subject: request.subject.clone(),
        };

        let outcome = self.usage.try_record(&record, &rule, now).await?;

        let decision = decide(&rule, outcome);
        debug!(
            user_id = %request.user_id,
            content_type = %content_type,
            allowed = decision.allowed,
            reason = %decision.reason,
            remaining = ?decision.remaining,
            "Access decided"
        );
        Ok(decision)
    }

    /// Current free-tier consumption per content type. Never mutates usage.
    pub async fn usage_summary(&self, user_id: &str) -> Result<UsageSummary> {
        if user_id.trim().is_empty() {
            return Err(EntitlementError::InvalidRequest("user_id is required".to_string()));
        }
        let now = self.clock.now();

        let subscription = self
            .bounded(Store::Subscriptions, self.ledger.active_subscription(user_id, now))
            .await?;

        let mut quotas = Vec::with_capacity(ContentType::ALL.len());
        for content_type in ContentType::ALL {
            let rule = self
                .bounded(Store::QuotaLimits, self.policy.rule_for(content_type))
                .await?;
            let used = self
                .bounded(Store::Usage, self.usage.count_consumed(user_id, &rule, now))
                .await?;

            quotas.push(QuotaUsage {
                content_type,
                window: rule.window,
                limit: rule.limit,
                used,
                remaining: rule.remaining(used),
            });
        }

        Ok(UsageSummary {
            user_id: user_id.to_string(),
            premium: subscription.is_some(),
            subscription,
            quotas,
        })
    }

    async fn bounded<T>(&self, store: Store, op: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, op).await {
            Ok(result) => result,
            Err(_) => {
                let after_ms = u64::try_from(self.store_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(store = %store, after_ms, "Store operation timed out");
                Err(EntitlementError::Timeout { store, after_ms })
            }
        }
    }
}

fn validate(request: &AccessRequest) -> Result<()> {
    if request.user_id.trim().is_empty() {
        return Err(EntitlementError::InvalidRequest("user_id is required".to_string()));
    }
    for (field, value) in [
        ("user_id", Some(&request.user_id)),
        ("content_identifier", request.content_identifier.as_ref()),
        ("subject", request.subject.as_ref()),
    ] {
        if value.is_some_and(|v| v.len() > MAX_IDENTIFIER_LEN) {
            return Err(EntitlementError::InvalidRequest(format!(
                "{} exceeds {} bytes",
                field, MAX_IDENTIFIER_LEN
            )));
        }
    }
    Ok(())
}

fn denial_reason(content_type: ContentType) -> AccessReason {
    match content_type {
        ContentType::Chapter => AccessReason::LimitExceeded,
        ContentType::Question | ContentType::AiQuery => AccessReason::DailyLimitExceeded,
    }
}

fn decide(rule: &QuotaRule, outcome: ConsumeOutcome) -> AccessDecision {
    let remaining = rule.remaining(outcome.count());

    match (rule.content_type, outcome) {
        (ContentType::Chapter, ConsumeOutcome::Rejected { .. }) => AccessDecision::denied(
            AccessReason::LimitExceeded,
            format!(
                "You have used all {} free chapters. Upgrade to premium for unlimited access.",
                rule.limit
            ),
            Some(remaining),
        ),
        (ContentType::Chapter, _) => AccessDecision::allowed(AccessReason::FreeTier, remaining),
        (content_type, ConsumeOutcome::Rejected { .. }) => {
            let noun = match content_type {
                ContentType::AiQuery => "AI queries",
                _ => "questions",
            };
            AccessDecision::denied(
                AccessReason::DailyLimitExceeded,
                format!(
                    "Free daily limit of {} {} reached. Upgrade to premium for unlimited access.",
                    rule.limit, noun
                ),
                Some(remaining),
            )
        }
        (_, _) => AccessDecision::allowed(AccessReason::WithinLimit, remaining),
    }
}
