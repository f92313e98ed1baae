//! API Server - HTTP server for REST API

use axum::{
    routing::{get, post, put},
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::access::AccessEngine;
use crate::api::{admin, handlers};
use crate::clock::Clock;
use crate::config::Config;
use crate::payments::PaymentService;
use crate::quota::{QuotaLimitStore, QuotaPolicy};
use crate::subscription::SubscriptionStore;
use crate::usage::SqliteUsageStore;

/// Shared application state
pub struct AppState {
    pub db: SqlitePool,
    pub engine: AccessEngine,
    pub payments: PaymentService,
    pub limits: QuotaLimitStore,
}

impl AppState {
    /// Wire every store onto one pool
    pub fn new(db: SqlitePool, config: &Config, clock: Arc<dyn Clock>) -> Self {
        let subscriptions = SubscriptionStore::new(db.clone());
        let limits = QuotaLimitStore::new(db.clone());

        let policy = Arc::new(QuotaPolicy::new(
            Arc::new(limits.clone()),
            config.quota.defaults,
            config.cache_ttl(),
        ));
        let engine = AccessEngine::new(
            Arc::new(subscriptions.clone()),
            policy,
            Arc::new(SqliteUsageStore::new(db.clone()).with_timeout(config.store_timeout())),
            clock.clone(),
            config.store_timeout(),
        );
        let payments = PaymentService::new(db.clone(), subscriptions, clock);

        Self {
            db,
            engine,
            payments,
            limits,
        }
    }
}

/// API Server configuration
pub struct ApiServer {
    state: Arc<AppState>,
    addr: String,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>, addr: String) -> Self {
        Self { state, addr }
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let access_routes = Router::new()
            .route("/check", post(handlers::check_access))
            .route("/usage/:user_id", get(handlers::usage_summary));

        let subscription_routes = Router::new()
            .route("/create-order", post(handlers::create_order))
            .route("/verify-payment", post(handlers::verify_payment))
            .route("/user/:user_id", get(handlers::user_subscriptions))
            .route("/check/:user_id", get(handlers::check_subscription));

        let admin_routes = Router::new()
            .route("/limits", get(admin::list_limits))
            .route("/limits/invalidate", post(admin::invalidate_limits))
            .route(
                "/limits/:limit_type",
                put(admin::set_limit).delete(admin::remove_limit),
            );

        Router::new()
            .route("/health", get(handlers::health))
            .nest("/api/access", access_routes)
            .nest("/api/subscriptions", subscription_routes)
            .nest("/api/admin", admin_routes)
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Bind `addr` and serve until Ctrl-C
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let router = self.router();

        info!("Starting API server on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
