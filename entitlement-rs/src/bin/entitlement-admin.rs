//! CLI tool for operating the entitlement database
//!
//! # Usage
//!
//! ```bash
//! # Show effective quota limits
//! entitlement-admin limits list
//!
//! # Allow 20 practice questions per day
//! entitlement-admin limits set questions_per_day 20
//!
//! # Run one access decision (consumes quota like the API does)
//! entitlement-admin check student-1 chapter --id ch-3 --subject physics
//!
//! # Activate a monthly plan through the mock payment flow
//! entitlement-admin grant student-1 monthly
//!
//! # Quota usage plus the last 20 recorded accesses
//! entitlement-admin usage student-1 --events 20
//!
//! # Drop day counters older than a date
//! entitlement-admin prune --before 2026-01-01
//! ```

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use entitlement_rs::access::{AccessEngine, AccessRequest};
use entitlement_rs::api::AppState;
use entitlement_rs::clock::SystemClock;
use entitlement_rs::config::{Config, StorageConfig};
use entitlement_rs::db;
use entitlement_rs::quota::{LimitOrigin, LimitType};
use entitlement_rs::usage::SqliteUsageStore;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "entitlement-admin")]
#[command(about = "Manage quota limits, subscriptions and usage", long_about = None)]
struct Cli {
    /// Database URL (e.g., sqlite://entitlements.db?mode=rwc)
    #[arg(short, long, default_value = "sqlite://entitlements.db?mode=rwc")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or change quota limits
    Limits {
        #[command(subcommand)]
        command: LimitsCommand,
    },
    /// Run an access decision for a user
    Check {
        user_id: String,
        /// chapter, question or ai_query
        content_type: String,
        /// Chapter or question identifier
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Show a user's subscription and quota usage
    Usage {
        user_id: String,
        /// Also list the most recent N audit events
        #[arg(long, value_name = "N")]
        events: Option<u32>,
    },
    /// Grant a plan through a mock order and verification
    Grant { user_id: String, plan_id: String },
    /// Delete day counters before a date (events are kept)
    Prune {
        /// First day to keep, YYYY-MM-DD
        #[arg(long)]
        before: NaiveDate,
    },
}

#[derive(Subcommand)]
enum LimitsCommand {
    /// List effective limits
    List,
    /// Set a limit override
    Set { limit_type: String, value: u32 },
    /// Remove an override so the default applies
    Remove { limit_type: String },
}

fn parse_limit_type(raw: &str) -> Result<LimitType, String> {
    LimitType::from_db_string(raw).ok_or_else(|| {
        let known: Vec<&str> = LimitType::ALL.iter().map(|l| l.as_str()).collect();
        format!("unknown limit type '{}' (expected one of: {})", raw, known.join(", "))
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config {
        storage: StorageConfig {
            database_url: cli.db.clone(),
            ..StorageConfig::default()
        },
        ..Config::default()
    };
    let pool = db::connect(&config.storage).await?;
    db::init_schema(&pool).await?;

    let state = AppState::new(pool.clone(), &config, Arc::new(SystemClock));
    let engine: &AccessEngine = &state.engine;

    match cli.command {
        Commands::Limits { command } => match command {
            LimitsCommand::List => {
                println!("{:<22} {:>8}  {}", "Limit", "Value", "Origin");
                println!("{:-<42}", "");
                for limit in engine.policy().effective_limits().await? {
                    let origin = match limit.origin {
                        LimitOrigin::Configured => "configured",
                        LimitOrigin::Default => "default",
                    };
                    println!(
                        "{:<22} {:>8}  {}",
                        limit.limit_type.as_str(),
                        limit.limit_value,
                        origin
                    );
                }
            }
            LimitsCommand::Set { limit_type, value } => {
                let limit_type = parse_limit_type(&limit_type)?;
                state.limits.set_limit(limit_type, value).await?;
                println!("✓ {} set to {}", limit_type, value);
                println!("  Running servers pick this up within their cache TTL.");
            }
            LimitsCommand::Remove { limit_type } => {
                let limit_type = parse_limit_type(&limit_type)?;
                if state.limits.remove_limit(limit_type).await? {
                    println!("✓ {} override removed, default applies", limit_type);
                } else {
                    println!("No override configured for {}", limit_type);
                }
            }
        },
        Commands::Check {
            user_id,
            content_type,
            id,
            subject,
        } => {
            let request = AccessRequest {
                user_id,
                content_type,
                content_identifier: id,
                subject,
            };
            let decision = engine.check_and_consume(&request).await?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
            if !decision.allowed {
                std::process::exit(1);
            }
        }
        Commands::Usage { user_id, events } => {
            let summary = engine.usage_summary(&user_id).await?;

            match &summary.subscription {
                Some(sub) => println!(
                    "{}: premium ({} plan until {})",
                    user_id,
                    sub.plan_id,
                    sub.end_date.format("%Y-%m-%d %H:%M UTC")
                ),
                None => println!("{}: free tier", user_id),
            }
            println!();
            println!("{:<10} {:>6} {:>6} {:>10}", "Content", "Used", "Limit", "Remaining");
            println!("{:-<36}", "");
            for quota in &summary.quotas {
                println!(
                    "{:<10} {:>6} {:>6} {:>10}",
                    quota.content_type.as_str(),
                    quota.used,
                    quota.limit,
                    quota.remaining
                );
            }

            if let Some(limit) = events {
                let usage = SqliteUsageStore::new(pool.clone());
                println!();
                println!("{:<28} {:<10} {:<12} {:<20}", "Accessed", "Content", "Window", "Identifier");
                println!("{:-<72}", "");
                for event in usage.events_for_user(&user_id, limit).await? {
                    let identifier = match &event.subject {
                        Some(subject) => format!("{}/{}", subject, event.content_identifier),
                        None => event.content_identifier.clone(),
                    };
                    println!(
                        "{:<28} {:<10} {:<12} {:<20}",
                        event.accessed_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                        event.content_type.as_str(),
                        event.window_key.as_deref().unwrap_or("lifetime"),
                        identifier
                    );
                }
            }
        }
        Commands::Grant { user_id, plan_id } => {
            let subscription = state.payments.grant(&user_id, &plan_id).await?;
            println!(
                "✓ {} granted to {} until {}",
                plan_id,
                user_id,
                subscription.end_date.format("%Y-%m-%d")
            );
            println!("  Subscription: {}", subscription.id);
        }
        Commands::Prune { before } => {
            let window_key = before.format("%Y-%m-%d").to_string();
            let removed = SqliteUsageStore::new(pool).prune_counters_before(&window_key).await?;
            println!("✓ Removed {} day counter(s) before {}", removed, window_key);
        }
    }

    Ok(())
}
