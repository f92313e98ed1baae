//! Usage store
//!
//! Append-only record of consumption. Chapters dedup on
//! (subject, identifier) over a user's lifetime; questions and AI queries
//! count every event within the current UTC day.

pub mod store;
pub mod types;

pub use store::{SqliteUsageStore, UsageStore};
pub use types::{ConsumeOutcome, UsageEvent, UsageRecord};
