/// Quota policy for free-tier users
///
/// This module provides the limit rules for:
/// - Distinct chapters over a user's lifetime
/// - Practice questions per UTC day
/// - AI queries per UTC day

pub mod limits;
pub mod policy;
pub mod types;

pub use limits::{QuotaLimitSource, QuotaLimitStore};
pub use policy::QuotaPolicy;
pub use types::{
    ContentType, DedupKey, DefaultLimits, EffectiveLimit, LimitOrigin, LimitType, QuotaRule, Window,
};
