//! Stripe integration: checkout sessions, payment intents and webhook verification.
//!
//! Calls go through the [`PaymentGateway`] trait so handlers can be tested against
//! [`MockPaymentGateway`]. The real client talks to the Stripe REST API with
//! form-encoded requests authenticated by the secret key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::auth::bytes_to_hex;
use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age (and clock skew) of a signed webhook, in seconds.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// CheckoutRequest
///
/// Everything the provider needs to charge for one course.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub payment_id: Uuid,
    pub course_id: Uuid,
    pub course_title: String,
    /// Amount in minor units.
    pub amount: i64,
    pub currency: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// PaymentRef
///
/// How a webhook event points back at a local payment: the provider object id, plus
/// our own payment id when it was round-tripped through metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRef {
    pub provider_id: String,
    pub payment_id: Option<Uuid>,
    pub intent_id: Option<String>,
}

/// WebhookEvent
///
/// The subset of Stripe events the platform acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    PaymentSucceeded(PaymentRef),
    PaymentFailed(PaymentRef),
    /// Any other event type; acknowledged and ignored.
    Ignored(String),
}

/// PaymentGateway
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, req: &CheckoutRequest) -> AppResult<CheckoutSession>;
    async fn create_payment_intent(&self, req: &CheckoutRequest) -> AppResult<PaymentIntent>;
    /// Checks the `Stripe-Signature` header against the raw body and parses the event.
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> AppResult<WebhookEvent>;
}

pub type PaymentsState = Arc<dyn PaymentGateway>;

// --- Signature verification ---

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let bytes = s.as_bytes();
    (0..s.len())
        .step_by(2)
        .map(|i| {
            let hi = (bytes[i] as char).to_digit(16)?;
            let lo = (bytes[i + 1] as char).to_digit(16)?;
            Some(((hi << 4) | lo) as u8)
        })
        .collect()
}

fn signed_mac(secret: &str, timestamp: &str, payload: &[u8]) -> AppResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::internal("invalid webhook secret"))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// verify_signature
///
/// Stripe scheme: header `t=<unix>,v1=<hex>[,v1=<hex>...]`, signature is
/// HMAC-SHA256(secret, "<t>.<payload>"). The timestamp must be within `tolerance`
/// seconds of `now`. Comparison is constant-time.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance: i64,
) -> AppResult<()> {
    let invalid = || AppError::bad_request("Invalid webhook signature");

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(invalid)?;
    let ts: i64 = timestamp.parse().map_err(|_| invalid())?;
    if (now - ts).abs() > tolerance {
        return Err(AppError::bad_request("Webhook timestamp outside tolerance"));
    }

    for signature in signatures {
        let Some(expected) = hex_decode(signature) else {
            continue;
        };
        if signed_mac(secret, timestamp, payload)?
            .verify_slice(&expected)
            .is_ok()
        {
            return Ok(());
        }
    }
    Err(invalid())
}

/// Builds a valid `Stripe-Signature` header value for `payload`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> AppResult<String> {
    let ts = timestamp.to_string();
    let digest = signed_mac(secret, &ts, payload)?.finalize().into_bytes();
    Ok(format!("t={ts},v1={}", bytes_to_hex(&digest)))
}

// --- Event parsing ---

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: RawObject,
}

#[derive(Deserialize)]
struct RawObject {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}

impl RawObject {
    fn into_ref(self) -> PaymentRef {
        let payment_id = self
            .metadata
            .get("payment_id")
            .cloned()
            .or(self.client_reference_id)
            .and_then(|raw| Uuid::parse_str(&raw).ok());
        PaymentRef {
            provider_id: self.id,
            payment_id,
            intent_id: self.payment_intent,
        }
    }
}

/// Maps a verified event body onto [`WebhookEvent`].
pub fn parse_event(payload: &[u8]) -> AppResult<WebhookEvent> {
    let event: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| AppError::bad_request(format!("Malformed webhook payload: {e}")))?;
    let object = event.data.object;

    Ok(match event.event_type.as_str() {
        "checkout.session.completed" => {
            // Delayed payment methods complete the session before the money arrives.
            if object.payment_status.as_deref().is_some_and(|s| s != "paid") {
                WebhookEvent::Ignored(event.event_type)
            } else {
                WebhookEvent::PaymentSucceeded(object.into_ref())
            }
        }
        "checkout.session.async_payment_succeeded" | "payment_intent.succeeded" => {
            WebhookEvent::PaymentSucceeded(object.into_ref())
        }
        "checkout.session.async_payment_failed"
        | "checkout.session.expired"
        | "payment_intent.payment_failed" => WebhookEvent::PaymentFailed(object.into_ref()),
        _ => WebhookEvent::Ignored(event.event_type),
    })
}

// --- Stripe client ---

#[derive(Deserialize)]
struct StripeSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct StripeIntentResponse {
    id: String,
    client_secret: Option<String>,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

/// StripeClient
///
/// Thin REST client over `reqwest`. Only the two creation endpoints are used; event
/// delivery comes back through the webhook.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: &str, webhook_secret: &str) -> Self {
        Self::with_base_url(secret_key, webhook_secret, STRIPE_API_BASE)
    }

    /// Points the client at another host (stripe-mock, tests).
    pub fn with_base_url(secret_key: &str, webhook_secret: &str, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: secret_key.to_string(),
            webhook_secret: webhook_secret.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> AppResult<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("stripe request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| status.to_string());
            tracing::error!(%status, path, "stripe error: {message}");
            return Err(AppError::Upstream(format!("stripe: {message}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Upstream(format!("unexpected stripe response: {e}")))
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(&self, req: &CheckoutRequest) -> AppResult<CheckoutSession> {
        let payment_id = req.payment_id.to_string();
        let form = [
            ("mode", "payment".to_string()),
            ("success_url", req.success_url.clone()),
            ("cancel_url", req.cancel_url.clone()),
            ("client_reference_id", payment_id.clone()),
            ("customer_email", req.customer_email.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", req.currency.clone()),
            ("line_items[0][price_data][unit_amount]", req.amount.to_string()),
            ("line_items[0][price_data][product_data][name]", req.course_title.clone()),
            ("metadata[payment_id]", payment_id.clone()),
            ("metadata[course_id]", req.course_id.to_string()),
            ("payment_intent_data[metadata][payment_id]", payment_id),
        ];

        let session: StripeSessionResponse = self.post_form("/v1/checkout/sessions", &form).await?;
        let url = session
            .url
            .ok_or_else(|| AppError::Upstream("stripe session without url".to_string()))?;
        Ok(CheckoutSession { id: session.id, url })
    }

    async fn create_payment_intent(&self, req: &CheckoutRequest) -> AppResult<PaymentIntent> {
        let form = [
            ("amount", req.amount.to_string()),
            ("currency", req.currency.clone()),
            ("receipt_email", req.customer_email.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[payment_id]", req.payment_id.to_string()),
            ("metadata[course_id]", req.course_id.to_string()),
        ];

        let intent: StripeIntentResponse = self.post_form("/v1/payment_intents", &form).await?;
        let client_secret = intent
            .client_secret
            .ok_or_else(|| AppError::Upstream("stripe intent without client secret".to_string()))?;
        Ok(PaymentIntent {
            id: intent.id,
            client_secret,
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> AppResult<WebhookEvent> {
        verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            Utc::now().timestamp(),
            WEBHOOK_TOLERANCE_SECS,
        )?;
        parse_event(payload)
    }
}

/// MockPaymentGateway
///
/// Deterministic provider ids derived from the payment id. Webhooks are verified for
/// real against `webhook_secret`, so tests sign payloads with [`sign_payload`].
#[derive(Clone)]
pub struct MockPaymentGateway {
    pub webhook_secret: String,
    pub should_fail: bool,
    requests: Arc<Mutex<Vec<CheckoutRequest>>>,
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self {
            webhook_secret: "whsec_test".to_string(),
            should_fail: false,
            requests: Arc::default(),
        }
    }
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, req: &CheckoutRequest) -> AppResult<()> {
        if self.should_fail {
            return Err(AppError::Upstream("mock payment gateway failure".to_string()));
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(req.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_checkout_session(&self, req: &CheckoutRequest) -> AppResult<CheckoutSession> {
        self.record(req)?;
        let id = format!("cs_test_{}", req.payment_id.simple());
        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.test/pay/{id}"),
            id,
        })
    }

    async fn create_payment_intent(&self, req: &CheckoutRequest) -> AppResult<PaymentIntent> {
        self.record(req)?;
        let id = format!("pi_test_{}", req.payment_id.simple());
        Ok(PaymentIntent {
            client_secret: format!("{id}_secret_test"),
            id,
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> AppResult<WebhookEvent> {
        verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            Utc::now().timestamp(),
            WEBHOOK_TOLERANCE_SECS,
        )?;
        parse_event(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_unit";

    #[test]
    fn signed_payload_verifies() {
        let body = br#"{"type":"ping","data":{"object":{"id":"x"}}}"#;
        let now = 1_700_000_000;
        let header = sign_payload(body, SECRET, now).unwrap();
        assert!(verify_signature(body, &header, SECRET, now + 10, WEBHOOK_TOLERANCE_SECS).is_ok());
    }

    #[test]
    fn tampered_body_or_wrong_secret_fails() {
        let body = br#"{"amount":100}"#;
        let now = 1_700_000_000;
        let header = sign_payload(body, SECRET, now).unwrap();
        assert!(verify_signature(br#"{"amount":1}"#, &header, SECRET, now, 300).is_err());
        assert!(verify_signature(body, &header, "whsec_other", now, 300).is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let body = b"{}";
        let header = sign_payload(body, SECRET, 1_000).unwrap();
        assert!(verify_signature(body, &header, SECRET, 1_000 + 301, 300).is_err());
        assert!(verify_signature(body, &header, SECRET, 1_000 + 300, 300).is_ok());
    }

    #[test]
    fn any_matching_v1_signature_is_enough() {
        let body = b"{}";
        let good = sign_payload(body, SECRET, 50).unwrap();
        let v1 = good.split_once(",v1=").map(|(_, sig)| sig).unwrap();
        let header = format!("t=50,v1=deadbeef,v0=ignored,v1={v1}");
        assert!(verify_signature(body, &header, SECRET, 50, 300).is_ok());
        assert!(verify_signature(body, "garbage", SECRET, 50, 300).is_err());
    }

    #[test]
    fn checkout_completed_maps_to_success_with_metadata_id() {
        let payment_id = Uuid::new_v4();
        let body = format!(
            r#"{{"type":"checkout.session.completed","data":{{"object":{{
                "id":"cs_1","payment_status":"paid","payment_intent":"pi_1",
                "metadata":{{"payment_id":"{payment_id}"}}}}}}}}"#
        );
        let event = parse_event(body.as_bytes()).unwrap();
        assert_eq!(
            event,
            WebhookEvent::PaymentSucceeded(PaymentRef {
                provider_id: "cs_1".into(),
                payment_id: Some(payment_id),
                intent_id: Some("pi_1".into()),
            })
        );
    }

    #[test]
    fn unpaid_session_and_unknown_events_are_ignored() {
        let unpaid = br#"{"type":"checkout.session.completed","data":{"object":{"id":"cs","payment_status":"unpaid"}}}"#;
        assert!(matches!(parse_event(unpaid).unwrap(), WebhookEvent::Ignored(_)));

        let other = br#"{"type":"customer.created","data":{"object":{"id":"cus"}}}"#;
        assert_eq!(
            parse_event(other).unwrap(),
            WebhookEvent::Ignored("customer.created".into())
        );
    }

    #[test]
    fn failed_intent_maps_to_failure() {
        let body = br#"{"type":"payment_intent.payment_failed","data":{"object":{"id":"pi_9"}}}"#;
        match parse_event(body).unwrap() {
            WebhookEvent::PaymentFailed(r) => {
                assert_eq!(r.provider_id, "pi_9");
                assert!(r.payment_id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
