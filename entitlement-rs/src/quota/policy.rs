use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use super::limits::QuotaLimitSource;
use super::types::{ContentType, DefaultLimits, EffectiveLimit, LimitOrigin, LimitType, QuotaRule};
use crate::error::Result;

struct CachedLimits {
    overrides: HashMap<LimitType, u32>,
    fetched_at: Instant,
}

/// Quota rules: built-in shapes, default limits and configured overrides.
///
/// Overrides are read through a TTL cache so that every service instance
/// converges on the stored configuration within `ttl`; writers call
/// [`QuotaPolicy::invalidate`] to make a change visible immediately.
pub struct QuotaPolicy {
    source: Arc<dyn QuotaLimitSource>,
    defaults: DefaultLimits,
    ttl: Duration,
    cache: RwLock<Option<CachedLimits>>,
}

impl QuotaPolicy {
    pub fn new(source: Arc<dyn QuotaLimitSource>, defaults: DefaultLimits, ttl: Duration) -> Self {
        QuotaPolicy {
            source,
            defaults,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Rule for a content type with the limit currently in effect
    pub async fn rule_for(&self, content_type: ContentType) -> Result<QuotaRule> {
        let limit_type = content_type.limit_type();
        let overrides = self.overrides().await?;
        let limit = overrides
            .get(&limit_type)
            .copied()
            .unwrap_or_else(|| self.defaults.get(limit_type));

        Ok(QuotaRule::new(content_type, limit))
    }

    /// Every limit type with its effective value and origin
    pub async fn effective_limits(&self) -> Result<Vec<EffectiveLimit>> {
        let overrides = self.overrides().await?;

        Ok(LimitType::ALL
            .iter()
            .map(|&limit_type| match overrides.get(&limit_type) {
                Some(&limit_value) => EffectiveLimit {
                    limit_type,
                    limit_value,
                    origin: LimitOrigin::Configured,
                },
                None => EffectiveLimit {
                    limit_type,
                    limit_value: self.defaults.get(limit_type),
                    origin: LimitOrigin::Default,
                },
            })
            .collect())
    }

    /// Drop cached overrides; the next lookup reads the source
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
        debug!("Quota limit cache invalidated");
    }

    async fn overrides(&self) -> Result<HashMap<LimitType, u32>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.overrides.clone());
                }
            }
        }

        let overrides = self.source.quota_limits().await?;
        debug!(configured = overrides.len(), "Quota limits refreshed");

        let mut cache = self.cache.write().await;
        *cache = Some(CachedLimits {
            overrides: overrides.clone(),
            fetched_at: Instant::now(),
        });

        Ok(overrides)
    }
}
