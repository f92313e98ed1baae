use reqwest::StatusCode;
use serde_json::{json, Value};

pub struct ApiTestClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiTestClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, Value), String> {
        let response = request
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| format!("Invalid JSON response: {}", e))?;
        Ok((status, body))
    }

    async fn post(&self, path: &str, body: Value) -> Result<(StatusCode, Value), String> {
        self.send(self.client.post(format!("{}{}", self.base_url, path)).json(&body))
            .await
    }

    async fn get(&self, path: &str) -> Result<(StatusCode, Value), String> {
        self.send(self.client.get(format!("{}{}", self.base_url, path))).await
    }

    /// POST /api/access/check, expecting a decision body
    pub async fn check(
        &self,
        user_id: &str,
        content_type: &str,
        content_identifier: Option<&str>,
        subject: Option<&str>,
    ) -> Result<Value, String> {
        let (status, body) = self
            .post(
                "/api/access/check",
                json!({
                    "user_id": user_id,
                    "content_type": content_type,
                    "content_identifier": content_identifier,
                    "subject": subject,
                }),
            )
            .await?;

        if status != StatusCode::OK {
            return Err(format!("Access check returned {}: {}", status, body));
        }
        Ok(body)
    }

    pub async fn chapter(&self, user_id: &str, subject: &str, chapter: &str) -> Result<Value, String> {
        self.check(user_id, "chapter", Some(chapter), Some(subject)).await
    }

    pub async fn usage(&self, user_id: &str) -> Result<Value, String> {
        let (status, body) = self.get(&format!("/api/access/usage/{}", user_id)).await?;
        if status != StatusCode::OK {
            return Err(format!("Usage returned {}: {}", status, body));
        }
        Ok(body)
    }

    /// Create an order and verify it, returning the verification body
    pub async fn subscribe(&self, user_id: &str, plan_id: &str, amount: f64) -> Result<Value, String> {
        let (status, order) = self
            .post(
                "/api/subscriptions/create-order",
                json!({"user_id": user_id, "plan_id": plan_id, "amount": amount}),
            )
            .await?;
        if status != StatusCode::OK {
            return Err(format!("Create order returned {}: {}", status, order));
        }

        let order_id = order["order_id"]
            .as_str()
            .ok_or_else(|| format!("Order without id: {}", order))?;
        self.verify_payment(user_id, plan_id, order_id).await
    }

    pub async fn verify_payment(&self, user_id: &str, plan_id: &str, order_id: &str) -> Result<Value, String> {
        let (status, body) = self
            .post(
                "/api/subscriptions/verify-payment",
                json!({
                    "razorpay_order_id": order_id,
                    "razorpay_payment_id": format!("pay_{}", user_id),
                    "razorpay_signature": "e2e",
                    "user_id": user_id,
                    "plan_id": plan_id,
                }),
            )
            .await?;
        if status != StatusCode::OK {
            return Err(format!("Verify payment returned {}: {}", status, body));
        }
        Ok(body)
    }

    pub async fn subscription_status(&self, user_id: &str) -> Result<Value, String> {
        let (_, body) = self.get(&format!("/api/subscriptions/check/{}", user_id)).await?;
        Ok(body)
    }

    pub async fn set_limit(&self, limit_type: &str, value: i64) -> Result<(StatusCode, Value), String> {
        self.send(
            self.client
                .put(format!("{}/api/admin/limits/{}", self.base_url, limit_type))
                .json(&json!({"limit_value": value})),
        )
        .await
    }

    pub async fn remove_limit(&self, limit_type: &str) -> Result<(StatusCode, Value), String> {
        self.send(
            self.client
                .delete(format!("{}/api/admin/limits/{}", self.base_url, limit_type)),
        )
        .await
    }

    pub async fn limits(&self) -> Result<Value, String> {
        let (_, body) = self.get("/api/admin/limits").await?;
        Ok(body)
    }
}
