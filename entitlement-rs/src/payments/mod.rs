//! Mock payment gateway
//!
//! Orders are created against a plan and settled by a verification
//! callback, which activates the subscription. No real gateway is called.

pub mod manager;
pub mod types;

pub use manager::PaymentService;
pub use types::{
    CreateOrderRequest, CreateOrderResponse, OrderStatus, PaymentOrder, Plan, SubscriptionCheck,
    UserSubscriptions, VerifyPaymentRequest, VerifyPaymentResponse, CURRENCY,
};
