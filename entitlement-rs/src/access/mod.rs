//! Access decisions
//!
//! Combines the subscription ledger, quota policy and usage store into a
//! single allow/deny answer per request.

pub mod engine;
pub mod types;

pub use engine::AccessEngine;
pub use types::{
    AccessDecision, AccessReason, AccessRequest, QuotaUsage, UsageSummary, MAX_IDENTIFIER_LEN,
};
