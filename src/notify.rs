//! Outbound WhatsApp notifications.
//!
//! Delivery goes through a Fonnte-style HTTP gateway: POST with an
//! `Authorization` token and a `{target, message, countryCode}` body.
//! Sends are best-effort; failures are logged and never surfaced to the
//! caller, and nothing here ever runs inside a database transaction.

use async_trait::async_trait;

/// Country code the gateway prefixes to bare phone numbers.
const COUNTRY_CODE: &str = "62";

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort delivery of one message to one phone number.
    async fn send(&self, phone: &str, message: &str);
}

pub struct WhatsAppNotifier {
    client: reqwest::Client,
    gateway_url: Option<String>,
    token: Option<String>,
}

impl WhatsAppNotifier {
    pub fn new(gateway_url: Option<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            gateway_url,
            token,
        }
    }
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    async fn send(&self, phone: &str, message: &str) {
        let (url, token) = match (&self.gateway_url, &self.token) {
            (Some(url), Some(token)) => (url, token),
            _ => {
                tracing::debug!("whatsapp gateway not configured, skipping send");
                return;
            }
        };

        let body = serde_json::json!({
            "target": phone,
            "message": message,
            "countryCode": COUNTRY_CODE,
        });

        match self
            .client
            .post(url)
            .header("Authorization", token)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(target = phone, "whatsapp message handed to gateway");
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "whatsapp gateway rejected message");
            }
            Err(e) => {
                tracing::warn!("whatsapp gateway unreachable: {}", e);
            }
        }
    }
}
