use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::subscription::Subscription;

pub const CURRENCY: &str = "INR";

/// Purchasable subscription plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Monthly,
    Quarterly,
    Yearly,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Monthly, Plan::Quarterly, Plan::Yearly];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(Plan::Monthly),
            "quarterly" => Some(Plan::Quarterly),
            "yearly" => Some(Plan::Yearly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Monthly => "monthly",
            Plan::Quarterly => "quarterly",
            Plan::Yearly => "yearly",
        }
    }

    /// List price in rupees
    pub fn price(&self) -> f64 {
        match self {
            Plan::Monthly => 49.0,
            Plan::Quarterly => 129.0,
            Plan::Yearly => 499.0,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Plan::Monthly => Duration::days(30),
            Plan::Quarterly => Duration::days(90),
            Plan::Yearly => Duration::days(365),
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Completed => "completed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "created" => Some(OrderStatus::Created),
            "completed" => Some(OrderStatus::Completed),
            _ => None,
        }
    }
}

/// Pending or settled payment order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub order_id: String,
    pub user_id: String,
    pub plan_id: String,
    pub amount: f64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub plan_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub amount: f64,
    pub currency: String,
}

impl From<&PaymentOrder> for CreateOrderResponse {
    fn from(order: &PaymentOrder) -> Self {
        CreateOrderResponse {
            order_id: order.order_id.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
        }
    }
}

/// Gateway callback. Field names follow the Razorpay checkout payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPaymentRequest {
    #[serde(alias = "razorpay_order_id")]
    pub order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    pub payment_id: String,
    #[serde(alias = "razorpay_signature", default)]
    pub signature: String,
    pub user_id: String,
    pub plan_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPaymentResponse {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subscription_id: Option<String>,
    pub message: String,
}

impl From<&Subscription> for VerifyPaymentResponse {
    fn from(subscription: &Subscription) -> Self {
        VerifyPaymentResponse {
            verified: true,
            subscription_id: Some(subscription.id.clone()),
            message: "Payment verified successfully. Subscription activated!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionCheck {
    pub has_active_subscription: bool,
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSubscriptions {
    pub user_id: String,
    pub subscriptions: Vec<Subscription>,
}
