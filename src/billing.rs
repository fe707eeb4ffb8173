//! Subscription billing: checkout session creation and webhook handling.
//!
//! Webhook authenticity uses the payment provider's signature scheme: the
//! `Stripe-Signature` header carries `t=<unix>,v1=<hex hmac>` pairs, the
//! HMAC-SHA256 is computed over `"{t}.{payload}"` with the endpoint
//! secret, and the timestamp must fall inside a tolerance window to stop
//! replays. The comparison goes through `Mac::verify_slice`, which is
//! constant-time.
//!
//! Event handling is idempotent by value: every branch writes an absolute
//! subscription state, so redelivered events settle on the same row.

use anyhow::{bail, Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::store::{MenuStore, SubscriptionUpdate};

type HmacSha256 = Hmac<Sha256>;

/// Verify a webhook signature header against the raw request payload.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse().context("Malformed timestamp in signature")?)
            }
            Some(("v1", value)) => {
                candidates.push(hex::decode(value).context("Malformed v1 signature")?)
            }
            _ => {}
        }
    }

    let timestamp = timestamp.context("Signature header missing timestamp")?;
    if candidates.is_empty() {
        bail!("Signature header missing v1 signature");
    }
    if (now_unix - timestamp).abs() > tolerance_secs {
        bail!("Signature timestamp outside tolerance window");
    }

    let mut signed = timestamp.to_string().into_bytes();
    signed.push(b'.');
    signed.extend_from_slice(payload);

    for candidate in &candidates {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .context("Invalid webhook secret")?;
        mac.update(&signed);
        if mac.verify_slice(candidate).is_ok() {
            return Ok(());
        }
    }
    bail!("Webhook signature mismatch")
}

/// Apply one verified webhook event to the store.
pub async fn handle_event(store: &dyn MenuStore, event: &serde_json::Value) -> Result<()> {
    let event_type = event["type"].as_str().unwrap_or_default();
    let object = &event["data"]["object"];
    tracing::info!(event_type, "Handling billing event");

    match event_type {
        "checkout.session.completed" => {
            let user_id: Uuid = object["client_reference_id"]
                .as_str()
                .context("Checkout session missing client_reference_id")?
                .parse()
                .context("client_reference_id is not a user id")?;
            store
                .update_subscription(
                    user_id,
                    SubscriptionUpdate {
                        customer_id: object["customer"].as_str().map(str::to_string),
                        subscription_id: object["subscription"].as_str().map(str::to_string),
                        status: "active".to_string(),
                        plan: object["metadata"]["plan"].as_str().map(str::to_string),
                    },
                )
                .await?;
        }
        "invoice.paid" => {
            let customer = object["customer"]
                .as_str()
                .context("Invoice missing customer")?;
            store
                .update_subscription_status_by_customer(customer, "active")
                .await?;
        }
        "invoice.payment_failed" => {
            let customer = object["customer"]
                .as_str()
                .context("Invoice missing customer")?;
            store
                .update_subscription_status_by_customer(customer, "past_due")
                .await?;
        }
        "customer.subscription.deleted" => {
            let customer = object["customer"]
                .as_str()
                .context("Subscription missing customer")?;
            store
                .update_subscription_status_by_customer(customer, "canceled")
                .await?;
        }
        "customer.subscription.updated" => {
            let customer = object["customer"]
                .as_str()
                .context("Subscription missing customer")?;
            let status = object["status"].as_str().unwrap_or("active");
            store
                .update_subscription_status_by_customer(customer, status)
                .await?;
        }
        other => {
            tracing::debug!(event_type = other, "Ignoring unhandled billing event");
        }
    }
    Ok(())
}

/// Payment API client for creating checkout sessions.
pub struct StripeClient {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    /// Requires `STRIPE_SECRET_KEY`.
    pub fn new() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| anyhow::anyhow!("STRIPE_SECRET_KEY environment variable not set"))?;
        Ok(Self {
            client: reqwest::Client::new(),
            secret_key,
            base_url: "https://api.stripe.com/v1".to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Create a subscription checkout session and return its URL.
    pub async fn create_checkout_session(
        &self,
        config: &BillingConfig,
        user_id: Uuid,
        plan: &str,
    ) -> Result<String> {
        let price_id = price_for_plan(config, plan)?;
        let user = user_id.to_string();

        let form: Vec<(&str, &str)> = vec![
            ("mode", "subscription"),
            ("line_items[0][price]", price_id),
            ("line_items[0][quantity]", "1"),
            ("success_url", &config.checkout_success_url),
            ("cancel_url", &config.checkout_cancel_url),
            ("client_reference_id", &user),
            ("metadata[plan]", plan),
        ];

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .context("Checkout session request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Payment API returned {}: {}", status, body);
        }

        let session: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse checkout session response")?;
        session["url"]
            .as_str()
            .map(str::to_string)
            .context("Checkout session response missing url")
    }
}

fn price_for_plan<'a>(config: &'a BillingConfig, plan: &str) -> Result<&'a str> {
    let price = match plan {
        "weekly" => config.weekly_price_id.as_deref(),
        "annual" => config.annual_price_id.as_deref(),
        other => bail!("Unknown plan: {}", other),
    };
    price.with_context(|| format!("No price configured for the {} plan", plan))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_a_valid_signature() {
        let payload = br#"{"type":"invoice.paid"}"#;
        let header = sign(payload, 1_700_000_000);
        assert!(verify_signature(payload, &header, SECRET, 300, 1_700_000_100).is_ok());
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let header = sign(br#"{"amount":10}"#, 1_700_000_000);
        let err = verify_signature(br#"{"amount":9999}"#, &header, SECRET, 300, 1_700_000_100);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let payload = b"{}";
        let header = sign(payload, 1_700_000_000);
        assert!(verify_signature(payload, &header, SECRET, 300, 1_700_000_301).is_err());
    }

    #[test]
    fn rejects_a_wrong_secret() {
        let payload = b"{}";
        let header = sign(payload, 1_700_000_000);
        assert!(verify_signature(payload, &header, "whsec_other", 300, 1_700_000_000).is_err());
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(verify_signature(b"{}", "v1=deadbeef", SECRET, 300, 0).is_err());
        assert!(verify_signature(b"{}", "t=100", SECRET, 300, 100).is_err());
        assert!(verify_signature(b"{}", "t=abc,v1=deadbeef", SECRET, 300, 0).is_err());
    }

    #[test]
    fn plan_to_price_mapping() {
        let config = BillingConfig {
            weekly_price_id: Some("price_w".to_string()),
            annual_price_id: None,
            checkout_success_url: String::new(),
            checkout_cancel_url: String::new(),
            signature_tolerance_secs: 300,
        };
        assert_eq!(price_for_plan(&config, "weekly").unwrap(), "price_w");
        assert!(price_for_plan(&config, "annual").is_err());
        assert!(price_for_plan(&config, "monthly").is_err());
    }
}
