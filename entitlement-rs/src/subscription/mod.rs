//! Subscription ledger
//!
//! Authoritative record of paying subscribers. A user is premium iff a
//! subscription exists with `status = active` and `end_date >= now`.

pub mod ledger;
pub mod types;

pub use ledger::{SubscriptionLedger, SubscriptionStore};
pub use types::{Subscription, SubscriptionStatus};
