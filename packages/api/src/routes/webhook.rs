use crate::{
    entity::{donation, sea_orm_active_enums::DonationStatus},
    error::ApiError,
    realtime::channel::ChannelMessage,
    state::AppState,
};
use archive_os_types::anyhow;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, SqlErr};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use stripe::{EventObject, EventType, Webhook};

type HmacSha256 = Hmac<Sha256>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/coffee", post(coffee_webhook))
        .route("/stripe", post(stripe_webhook))
}

fn get_coffee_webhook_secret() -> Option<String> {
    std::env::var("COFFEE_WEBHOOK_SECRET").ok()
}

fn get_stripe_webhook_secret() -> Option<String> {
    std::env::var("STRIPE_WEBHOOK_SECRET").ok()
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebhookResponse {
    fn success() -> Self {
        Self {
            status: "success",
            message: None,
        }
    }

    fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: "skipped",
            message: Some(message.into()),
        }
    }
}

/// Unit price as sent by the provider: a decimal string ("5.00") or a bare number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UnitPrice {
    Number(f64),
    Text(String),
}

impl UnitPrice {
    fn as_f64(&self) -> Result<f64, ApiError> {
        match self {
            UnitPrice::Number(n) => Ok(*n),
            UnitPrice::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| ApiError::bad_request(format!("Invalid unit price: {}", s))),
        }
    }
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct CoffeeWebhookPayload {
    #[serde(default)]
    pub support_id: Option<String>,
    #[serde(default)]
    pub supporter_name: Option<String>,
    #[serde(default)]
    pub support_coffee_price: Option<UnitPrice>,
    #[serde(default = "default_quantity")]
    pub support_coffees: i64,
    #[serde(default)]
    pub support_note: Option<String>,
    /// Provider-declared currency; falls back to the configured default
    #[serde(default)]
    pub currency: Option<String>,
}

/// Provider semantics: the product is truncated, never rounded.
fn compute_amount(unit_price: f64, quantity: i64) -> i64 {
    (unit_price * quantity as f64).floor() as i64
}

/// A blank idempotency key means the payload cannot be processed safely.
fn require_transaction_id(raw: Option<&str>) -> Result<String, ApiError> {
    match raw.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => {
            tracing::warn!("Coffee webhook without support_id");
            Err(ApiError::bad_request("Missing support_id".to_string()))
        }
    }
}

fn normalize_donor(name: Option<String>) -> String {
    name.map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Anonymous".to_string())
}

/// Constant-time check of the hex HMAC-SHA256 header against the raw body.
fn verify_signature(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

#[tracing::instrument(name = "POST /webhook/coffee", skip(state, headers, payload))]
pub async fn coffee_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let secret =
        get_coffee_webhook_secret().ok_or(anyhow!("Coffee webhook secret not configured"))?;

    let signature = headers
        .get("x-signature-sha256")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing X-Signature-Sha256 header".to_string()))?;

    // Verified against the exact body bytes, before any parsing. The expected
    // value is never echoed back or logged.
    if !verify_signature(&secret, &payload, signature) {
        return Err(ApiError::unauthorized("Invalid webhook signature".to_string()));
    }

    let payload: CoffeeWebhookPayload = serde_json::from_slice(&payload)
        .map_err(|e| ApiError::bad_request(format!("Unparsable webhook payload: {}", e)))?;

    let transaction_id = require_transaction_id(payload.support_id.as_deref())?;

    if payload.support_coffees <= 0 {
        return Err(ApiError::bad_request(format!(
            "Invalid quantity: {}",
            payload.support_coffees
        )));
    }

    let unit_price = match &payload.support_coffee_price {
        Some(price) => price.as_f64()?,
        None => 0.0,
    };
    let amount = compute_amount(unit_price, payload.support_coffees);

    let new_donation = NewDonation {
        transaction_id: Some(transaction_id),
        amount,
        currency: payload
            .currency
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| state.settings.default_currency.clone()),
        donor_name: normalize_donor(payload.supporter_name),
        message: payload.support_note.filter(|m| !m.trim().is_empty()),
    };

    finish_recording(&state, new_donation).await
}

#[tracing::instrument(name = "POST /webhook/stripe", skip(state, headers, payload))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let webhook_secret =
        get_stripe_webhook_secret().ok_or(anyhow!("Stripe webhook secret not configured"))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing stripe-signature header".to_string()))?;

    let payload_str = std::str::from_utf8(&payload)
        .map_err(|_| ApiError::bad_request("Invalid UTF-8 in payload".to_string()))?;

    let event = Webhook::construct_event(payload_str, signature, &webhook_secret)
        .map_err(|_| ApiError::unauthorized("Invalid webhook signature".to_string()))?;

    match event.type_ {
        EventType::CheckoutSessionCompleted => {
            if let EventObject::CheckoutSession(session) = &event.data.object {
                handle_checkout_completed(&state, session).await
            } else {
                Err(ApiError::bad_request("Malformed checkout event".to_string()))
            }
        }
        other => {
            tracing::debug!(event_type = %other, "Unhandled event type");
            Ok(Json(WebhookResponse::skipped("Event type not handled")))
        }
    }
}

async fn handle_checkout_completed(
    state: &AppState,
    session: &stripe::CheckoutSession,
) -> Result<Json<WebhookResponse>, ApiError> {
    let metadata = session.metadata.clone().unwrap_or_default();
    if metadata.get("type").map(String::as_str) != Some("donation") {
        tracing::debug!(session_id = %session.id, "Checkout session is not a donation, ignoring");
        return Ok(Json(WebhookResponse::skipped("Not a donation checkout")));
    }

    // The card flow keys idempotency on the payment intent, falling back to
    // the session id for sessions that never expose one.
    let transaction_id = session
        .payment_intent
        .as_ref()
        .map(|pi| pi.id().to_string())
        .unwrap_or_else(|| session.id.to_string());

    let amount = session.amount_total.unwrap_or(0);
    if amount <= 0 {
        return Err(ApiError::bad_request("Checkout session has no amount".to_string()));
    }

    let currency = session
        .currency
        .map(|c| c.to_string().to_uppercase())
        .unwrap_or_else(|| state.settings.default_currency.clone());

    let new_donation = NewDonation {
        transaction_id: Some(transaction_id),
        amount,
        currency,
        donor_name: normalize_donor(metadata.get("donor_name").cloned()),
        message: metadata
            .get("message")
            .cloned()
            .filter(|m| !m.trim().is_empty()),
    };

    finish_recording(state, new_donation).await
}

pub(crate) struct NewDonation {
    pub transaction_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub donor_name: String,
    pub message: Option<String>,
}

pub(crate) enum RecordOutcome {
    Created(donation::Model),
    Duplicate,
}

/// Dedupe-check, insert, and classify. The existence check keeps the common
/// duplicate path cheap; the unique index on `transaction_id` closes the gap
/// between check and insert under concurrent duplicate deliveries.
pub(crate) async fn record_donation(
    state: &AppState,
    new: NewDonation,
) -> Result<RecordOutcome, ApiError> {
    if let Some(transaction_id) = &new.transaction_id {
        let existing = donation::Entity::find()
            .filter(donation::Column::TransactionId.eq(transaction_id))
            .one(&state.db)
            .await?;
        if existing.is_some() {
            tracing::info!(transaction_id = %transaction_id, "Duplicate donation delivery, skipping");
            return Ok(RecordOutcome::Duplicate);
        }
    }

    let now = chrono::Utc::now().naive_utc();
    let model = donation::ActiveModel {
        id: Set(archive_os_types::create_id()),
        transaction_id: Set(new.transaction_id.clone()),
        amount: Set(new.amount),
        currency: Set(new.currency),
        status: Set(DonationStatus::Succeeded),
        donor_name: Set(new.donor_name),
        message: Set(new.message),
        created_at: Set(now),
        updated_at: Set(now),
    };

    match model.insert(&state.db).await {
        Ok(donation) => Ok(RecordOutcome::Created(donation)),
        Err(err) => {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                tracing::info!(
                    transaction_id = ?new.transaction_id,
                    "Concurrent duplicate insert, skipping"
                );
                Ok(RecordOutcome::Duplicate)
            } else {
                Err(err.into())
            }
        }
    }
}

/// Shared tail of both ingestion paths: persist, then announce to
/// subscribers. The announcement happens strictly after the insert committed,
/// so a failed write can never produce a broadcast.
async fn finish_recording(
    state: &AppState,
    new: NewDonation,
) -> Result<Json<WebhookResponse>, ApiError> {
    match record_donation(state, new).await? {
        RecordOutcome::Created(donation) => {
            tracing::info!(
                donation_id = %donation.id,
                amount = donation.amount,
                "Recorded donation"
            );
            state.channel.publish(donation_message(&donation));
            Ok(Json(WebhookResponse::success()))
        }
        RecordOutcome::Duplicate => Ok(Json(WebhookResponse::skipped(
            "Transaction already processed",
        ))),
    }
}

fn donation_message(donation: &donation::Model) -> ChannelMessage {
    ChannelMessage::Donation {
        amount: donation.amount,
        donor_name: donation.donor_name.clone(),
        message: donation.message.clone(),
        timestamp: DateTime::<Utc>::from_naive_utc_and_offset(donation.created_at, Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    fn sign(payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"support_id":"tx_1","support_coffee_price":"5.00"}"#;
        assert!(verify_signature(SECRET, payload, &sign(payload)));
    }

    #[test]
    fn rejects_signature_over_different_body() {
        let original = br#"{"support_id":"tx_1","support_coffee_price":"5.00"}"#;
        let tampered = br#"{"support_id":"tx_1","support_coffee_price":"500.00"}"#;
        assert!(!verify_signature(SECRET, tampered, &sign(original)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = br#"{"support_id":"tx_1"}"#;
        let mut mac = HmacSha256::new_from_slice(b"other_secret").unwrap();
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());
        assert!(!verify_signature(SECRET, payload, &signature));
    }

    #[test]
    fn rejects_malformed_signature() {
        let payload = br#"{"support_id":"tx_1"}"#;
        assert!(!verify_signature(SECRET, payload, "not-hex"));
        assert!(!verify_signature(SECRET, payload, ""));
    }

    #[test]
    fn amount_truncates_instead_of_rounding() {
        assert_eq!(compute_amount(5.0, 3), 15);
        // floor(3.98) = 3, not 4
        assert_eq!(compute_amount(1.99, 2), 3);
        assert_eq!(compute_amount(0.0, 1), 0);
    }

    #[test]
    fn unit_price_decodes_from_string_or_number() {
        let from_string: UnitPrice = serde_json::from_str(r#""5.00""#).unwrap();
        assert_eq!(from_string.as_f64().unwrap(), 5.0);

        let from_number: UnitPrice = serde_json::from_str("1.99").unwrap();
        assert_eq!(from_number.as_f64().unwrap(), 1.99);

        let junk: UnitPrice = serde_json::from_str(r#""lots""#).unwrap();
        assert!(junk.as_f64().is_err());
    }

    #[test]
    fn payload_defaults_are_applied() {
        let payload: CoffeeWebhookPayload =
            serde_json::from_str(r#"{"support_id":"tx_9"}"#).unwrap();
        assert_eq!(payload.support_id.as_deref(), Some("tx_9"));
        assert_eq!(payload.support_coffees, 1);
        assert!(payload.supporter_name.is_none());
        assert!(payload.support_note.is_none());
        assert!(payload.currency.is_none());
    }

    #[test]
    fn blank_transaction_ids_are_rejected() {
        assert!(require_transaction_id(None).is_err());
        assert!(require_transaction_id(Some("")).is_err());
        assert!(require_transaction_id(Some("   ")).is_err());
        assert_eq!(require_transaction_id(Some("tx_1")).unwrap(), "tx_1");
    }

    #[test]
    fn donor_name_defaults_to_anonymous() {
        assert_eq!(normalize_donor(None), "Anonymous");
        assert_eq!(normalize_donor(Some("   ".to_string())), "Anonymous");
        assert_eq!(normalize_donor(Some("Jo".to_string())), "Jo");
    }

    #[test]
    fn responses_serialize_to_the_wire_shape() {
        let success = serde_json::to_value(WebhookResponse::success()).unwrap();
        assert_eq!(success, serde_json::json!({"status": "success"}));

        let skipped =
            serde_json::to_value(WebhookResponse::skipped("Transaction already processed"))
                .unwrap();
        assert_eq!(skipped["status"], "skipped");
        assert_eq!(skipped["message"], "Transaction already processed");
    }
}
