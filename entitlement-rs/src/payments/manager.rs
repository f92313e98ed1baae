use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{
    CreateOrderRequest, OrderStatus, PaymentOrder, Plan, SubscriptionCheck, VerifyPaymentRequest,
    CURRENCY,
};
use crate::clock::{from_db_timestamp, to_db_timestamp, Clock};
use crate::error::{EntitlementError, Result, Store};
use crate::subscription::{Subscription, SubscriptionLedger, SubscriptionStatus, SubscriptionStore};

/// Mock payment flow that turns settled orders into subscriptions
pub struct PaymentService {
    db: SqlitePool,
    subscriptions: SubscriptionStore,
    clock: Arc<dyn Clock>,
}

impl PaymentService {
    pub fn new(db: SqlitePool, subscriptions: SubscriptionStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            subscriptions,
            clock,
        }
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS payment_orders (
                order_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                amount REAL NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                payment_ref TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn create_order(&self, request: &CreateOrderRequest) -> Result<PaymentOrder> {
        let plan = parse_plan(&request.plan_id)?;
        if request.user_id.trim().is_empty() {
            return Err(EntitlementError::InvalidRequest("user_id is required".to_string()));
        }
        if request.amount <= 0.0 || !request.amount.is_finite() {
            return Err(EntitlementError::InvalidRequest(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }

        let simple = Uuid::new_v4().simple().to_string();
        let order = PaymentOrder {
            order_id: format!("order_mock_{}", &simple[..16]),
            user_id: request.user_id.clone(),
            plan_id: plan.as_str().to_string(),
            amount: request.amount,
            currency: CURRENCY.to_string(),
            status: OrderStatus::Created,
            payment_ref: None,
            created_at: self.clock.now(),
            completed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO payment_orders
                (order_id, user_id, plan_id, amount, currency, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.user_id)
        .bind(&order.plan_id)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(to_db_timestamp(order.created_at))
        .execute(&self.db)
        .await
        .map_err(unavailable)?;

        info!(
            order_id = %order.order_id,
            user_id = %order.user_id,
            plan_id = %order.plan_id,
            amount = order.amount,
            "Payment order created"
        );

        Ok(order)
    }

    /// Settle an order and activate its subscription.
    ///
    /// Verifying an order that is already completed returns the
    /// subscription it produced.
    pub async fn verify_payment(&self, request: &VerifyPaymentRequest) -> Result<Subscription> {
        let plan = parse_plan(&request.plan_id)?;
        let now = self.clock.now();

        let mut tx = self.db.begin().await.map_err(unavailable)?;

        // Claiming the order is the first statement, so the tx holds the write lock from here on
        let claimed = sqlx::query(
            r#"
            UPDATE payment_orders
            SET status = ?, payment_ref = ?, completed_at = ?
            WHERE order_id = ? AND user_id = ? AND plan_id = ? AND status = ?
            "#,
        )
        .bind(OrderStatus::Completed.as_str())
        .bind(&request.payment_id)
        .bind(to_db_timestamp(now))
        .bind(&request.order_id)
        .bind(&request.user_id)
        .bind(plan.as_str())
        .bind(OrderStatus::Created.as_str())
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?
        .rows_affected();

        if claimed == 0 {
            drop(tx);
            return self.settled_subscription(request, plan).await;
        }

        let amount: f64 = sqlx::query_scalar("SELECT amount FROM payment_orders WHERE order_id = ?")
            .bind(&request.order_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(unavailable)?;

        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            plan_id: plan.as_str().to_string(),
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: now + plan.duration(),
            amount,
            payment_ref: Some(request.payment_id.clone()),
            order_ref: Some(request.order_id.clone()),
            created_at: now,
        };
        SubscriptionStore::insert_with(&mut *tx, &subscription).await?;

        tx.commit().await.map_err(unavailable)?;

        info!(
            order_id = %request.order_id,
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            "Payment verified, subscription activated"
        );

        Ok(subscription)
    }

    /// Settle a list-price order on the user's behalf (support tooling)
    pub async fn grant(&self, user_id: &str, plan_id: &str) -> Result<Subscription> {
        let plan = parse_plan(plan_id)?;
        let order = self
            .create_order(&CreateOrderRequest {
                user_id: user_id.to_string(),
                plan_id: plan.as_str().to_string(),
                amount: plan.price(),
            })
            .await?;

        self.verify_payment(&VerifyPaymentRequest {
            payment_id: format!("pay_grant_{}", &order.order_id["order_mock_".len()..]),
            order_id: order.order_id,
            signature: String::new(),
            user_id: user_id.to_string(),
            plan_id: plan.as_str().to_string(),
        })
        .await
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<PaymentOrder>> {
        let row = sqlx::query("SELECT * FROM payment_orders WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.db)
            .await
            .map_err(unavailable)?;

        row.map(row_to_order).transpose()
    }

    pub async fn user_subscriptions(&self, user_id: &str) -> Result<Vec<Subscription>> {
        self.subscriptions.list_for_user(user_id).await
    }

    pub async fn check_subscription(&self, user_id: &str) -> Result<SubscriptionCheck> {
        let subscription = self
            .subscriptions
            .active_subscription(user_id, self.clock.now())
            .await?;

        Ok(SubscriptionCheck {
            has_active_subscription: subscription.is_some(),
            subscription,
        })
    }

    /// Explain why an order could not be claimed
    async fn settled_subscription(
        &self,
        request: &VerifyPaymentRequest,
        plan: Plan,
    ) -> Result<Subscription> {
        let order = self
            .get_order(&request.order_id)
            .await?
            .ok_or_else(|| EntitlementError::NotFound(format!("order {}", request.order_id)))?;

        if order.user_id != request.user_id {
            warn!(order_id = %order.order_id, user_id = %request.user_id, "Order belongs to another user");
            return Err(EntitlementError::InvalidRequest(
                "order does not belong to this user".to_string(),
            ));
        }
        if order.plan_id != plan.as_str() {
            return Err(EntitlementError::InvalidRequest(format!(
                "order was created for plan {}",
                order.plan_id
            )));
        }

        match order.status {
            OrderStatus::Completed => self
                .subscriptions
                .find_by_order(&order.order_id)
                .await?
                .ok_or_else(|| {
                    EntitlementError::NotFound(format!("subscription for order {}", order.order_id))
                }),
            OrderStatus::Created => Err(EntitlementError::unavailable(
                Store::Payments,
                format!("order {} changed during verification", order.order_id),
            )),
        }
    }
}

fn parse_plan(plan_id: &str) -> Result<Plan> {
    Plan::parse(plan_id).ok_or_else(|| EntitlementError::InvalidPlan(plan_id.to_string()))
}

fn unavailable(err: sqlx::Error) -> EntitlementError {
    EntitlementError::unavailable(Store::Payments, err)
}

fn row_to_order(row: SqliteRow) -> Result<PaymentOrder> {
    use sqlx::Row;

    let status: String = row.try_get("status").map_err(unavailable)?;
    let status = OrderStatus::from_db_string(&status).ok_or_else(|| {
        EntitlementError::unavailable(Store::Payments, format!("unknown order status: {}", status))
    })?;

    let timestamp = |raw: String| -> Result<DateTime<Utc>> {
        from_db_timestamp(&raw).ok_or_else(|| {
            EntitlementError::unavailable(Store::Payments, format!("invalid timestamp: {}", raw))
        })
    };

    let completed_at: Option<String> = row.try_get("completed_at").map_err(unavailable)?;

    Ok(PaymentOrder {
        order_id: row.try_get("order_id").map_err(unavailable)?,
        user_id: row.try_get("user_id").map_err(unavailable)?,
        plan_id: row.try_get("plan_id").map_err(unavailable)?,
        amount: row.try_get("amount").map_err(unavailable)?,
        currency: row.try_get("currency").map_err(unavailable)?,
        status,
        payment_ref: row.try_get("payment_ref").map_err(unavailable)?,
        created_at: timestamp(row.try_get("created_at").map_err(unavailable)?)?,
        completed_at: completed_at.map(timestamp).transpose()?,
    })
}
