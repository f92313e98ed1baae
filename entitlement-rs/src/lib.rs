//! entitlement-rs: Entitlement and usage-quota engine
//!
//! Decides whether a user may consume a unit of metered study content and
//! records the consumption atomically with that decision.
//!
//! # Features
//!
//! - **Premium**: Active, unexpired subscriptions bypass every quota
//! - **Chapters**: Lifetime limit on distinct (subject, chapter) pairs
//! - **Daily limits**: Questions and AI queries per UTC day
//! - **Atomic**: Check and record happen in one SQLite write transaction
//! - **Fail closed**: Store faults and timeouts surface as errors, never as allow
//!
//! # Example
//!
//! ```no_run
//! use entitlement_rs::api::{ApiServer, AppState};
//! use entitlement_rs::clock::SystemClock;
//! use entitlement_rs::config::Config;
//! use entitlement_rs::db;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let pool = db::connect(&config.storage).await?;
//!     db::init_schema(&pool).await?;
//!
//!     let state = Arc::new(AppState::new(pool, &config, Arc::new(SystemClock)));
//!     let server = ApiServer::new(state, config.server.listen_addr.clone());
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`access`]: Check-and-consume decisions
//! - [`subscription`]: Premium subscription ledger
//! - [`quota`]: Limit rules, defaults and overrides
//! - [`usage`]: Usage events and day counters
//! - [`payments`]: Mock order and verification flow
//! - [`api`]: HTTP endpoints

pub mod access;
pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod payments;
pub mod quota;
pub mod subscription;
pub mod usage;

pub use access::{AccessDecision, AccessEngine, AccessReason, AccessRequest};
pub use config::Config;
pub use error::{EntitlementError, Result};
