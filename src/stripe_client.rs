use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

// $9.99/month in cents
const PREMIUM_PRICE_CENTS: u32 = 999;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Stripe API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid webhook signature")]
    InvalidSignature,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Parsed webhook event. Only `checkout.session.completed` carries
/// anything the service acts on.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, BillingError> {
        serde_json::from_slice(payload).map_err(|e| BillingError::InvalidPayload(e.to_string()))
    }

    /// The user id we planted in the checkout session's metadata.
    pub fn metadata_user_id(&self) -> Option<i32> {
        self.data.object["metadata"]["user_id"]
            .as_str()
            .and_then(|id| id.parse().ok())
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.data.object["customer"].as_str()
    }
}

/// Verify a `Stripe-Signature` header against the raw request body.
/// The header carries a timestamp and one or more `v1` HMAC-SHA256
/// signatures over `"{t}.{payload}"`; comparison is constant time via
/// the Mac verifier.
pub fn verify_webhook_signature(
    payload: &[u8],
    sig_header: &str,
    secret: &str,
) -> Result<(), BillingError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in sig_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::InvalidSignature)?;
    if candidates.is_empty() {
        return Err(BillingError::InvalidSignature);
    }

    for candidate in candidates {
        let Ok(candidate_bytes) = hex::decode(candidate) else {
            continue;
        };

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| BillingError::InvalidSignature)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);

        if mac.verify_slice(&candidate_bytes).is_ok() {
            return Ok(());
        }
    }

    Err(BillingError::InvalidSignature)
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            base_url: "https://api.stripe.com/v1".to_string(),
        }
    }

    /// Creates a hosted checkout session for the premium subscription and
    /// returns the redirect URL. The user id travels in session metadata
    /// so the completion webhook can find the account to upgrade.
    pub async fn create_checkout_session(
        &self,
        user_id: i32,
        email: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, BillingError> {
        let price = PREMIUM_PRICE_CENTS.to_string();
        let user_id = user_id.to_string();
        let params: Vec<(&str, &str)> = vec![
            ("payment_method_types[0]", "card"),
            ("line_items[0][price_data][currency]", "usd"),
            (
                "line_items[0][price_data][product_data][name]",
                "Premium Subscription",
            ),
            (
                "line_items[0][price_data][product_data][description]",
                "Unlimited messages, priority support, and advanced features",
            ),
            ("line_items[0][price_data][unit_amount]", &price),
            ("line_items[0][price_data][recurring][interval]", "month"),
            ("line_items[0][quantity]", "1"),
            ("mode", "subscription"),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
            ("customer_email", email),
            ("metadata[user_id]", &user_id),
        ];

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .timeout(Duration::from_secs(30))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(BillingError::Api {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| BillingError::InvalidPayload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], timestamp: &str, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let sig = sign(payload, "1693000000", "whsec_test");
        let header = format!("t=1693000000,v1={}", sig);

        assert!(verify_webhook_signature(payload, &header, "whsec_test").is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let sig = sign(payload, "1693000000", "whsec_test");
        let header = format!("t=1693000000,v1={}", sig);

        assert!(verify_webhook_signature(b"{}", &header, "whsec_test").is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let sig = sign(payload, "1693000000", "whsec_test");
        let header = format!("t=1693000000,v1={}", sig);

        assert!(verify_webhook_signature(payload, &header, "whsec_other").is_err());
    }

    #[test]
    fn test_missing_parts_rejected() {
        let payload = b"{}";
        assert!(verify_webhook_signature(payload, "v1=deadbeef", "s").is_err());
        assert!(verify_webhook_signature(payload, "t=1693000000", "s").is_err());
        assert!(verify_webhook_signature(payload, "", "s").is_err());
    }

    #[test]
    fn test_second_v1_candidate_accepted() {
        // Stripe sends multiple v1 entries during secret rotation
        let payload = br#"{"id":"evt_1"}"#;
        let sig = sign(payload, "1693000000", "whsec_test");
        let header = format!("t=1693000000,v1={},v1={}", "00".repeat(32), sig);

        assert!(verify_webhook_signature(payload, &header, "whsec_test").is_ok());
    }

    #[test]
    fn test_webhook_event_parsing() {
        let payload = br#"{
            "id": "evt_123",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_123",
                    "customer": "cus_456",
                    "metadata": {"user_id": "42"}
                }
            }
        }"#;

        let event = WebhookEvent::parse(payload).unwrap();
        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(event.metadata_user_id(), Some(42));
        assert_eq!(event.customer_id(), Some("cus_456"));
    }

    #[test]
    fn test_webhook_event_without_metadata() {
        let payload = br#"{"type":"invoice.paid","data":{"object":{}}}"#;
        let event = WebhookEvent::parse(payload).unwrap();
        assert_eq!(event.metadata_user_id(), None);
    }
}
