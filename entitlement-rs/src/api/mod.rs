//! REST API module for entitlement-rs
//!
//! HTTP endpoints for access decisions, subscriptions and quota limits

pub mod admin;
pub mod handlers;
pub mod server;

pub use server::{ApiServer, AppState};
