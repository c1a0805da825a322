use crate::{
    entity::{donation, sea_orm_active_enums::DonationStatus},
    error::ApiError,
    state::AppState,
};
use archive_os_types::anyhow;
use axum::{
    Json, Router,
    extract::State,
    routing::get,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(index).post(create))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DonationEntry {
    pub id: String,
    pub amount: i64,
    pub donor_name: String,
    pub message: Option<String>,
    pub created_at: chrono::NaiveDateTime,
}

impl From<donation::Model> for DonationEntry {
    fn from(model: donation::Model) -> Self {
        Self {
            id: model.id,
            amount: model.amount,
            donor_name: model.donor_name,
            message: model.message,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DonationStats {
    pub total_amount: i64,
    pub total_count: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DonationsOverview {
    pub recent: Vec<DonationEntry>,
    pub top: Vec<DonationEntry>,
    pub stats: DonationStats,
}

#[utoipa::path(
    get,
    path = "/donations",
    tag = "donations",
    responses(
        (status = 200, description = "Recent and top donations plus aggregate stats", body = DonationsOverview)
    )
)]
#[tracing::instrument(name = "GET /donations", skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Json<DonationsOverview>, ApiError> {
    let recent = donation::Entity::find()
        .filter(donation::Column::Status.eq(DonationStatus::Succeeded))
        .order_by_desc(donation::Column::CreatedAt)
        .limit(10)
        .all(&state.db)
        .await?;

    let top = donation::Entity::find()
        .filter(donation::Column::Status.eq(DonationStatus::Succeeded))
        .order_by_desc(donation::Column::Amount)
        .limit(5)
        .all(&state.db)
        .await?;

    let amounts: Vec<i64> = donation::Entity::find()
        .filter(donation::Column::Status.eq(DonationStatus::Succeeded))
        .select_only()
        .column(donation::Column::Amount)
        .into_tuple()
        .all(&state.db)
        .await?;

    Ok(Json(DonationsOverview {
        recent: recent.into_iter().map(DonationEntry::from).collect(),
        top: top.into_iter().map(DonationEntry::from).collect(),
        stats: DonationStats {
            total_count: amounts.len() as u64,
            total_amount: amounts.iter().sum(),
        },
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDonationParams {
    /// Smallest currency unit of the configured currency
    pub amount: i64,
    pub donor_name: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateDonationResponse {
    pub checkout_url: String,
}

/// Minimum the payment processor accepts for the default currency
const MIN_AMOUNT: i64 = 50;

#[utoipa::path(
    post,
    path = "/donations",
    tag = "donations",
    request_body = CreateDonationParams,
    responses(
        (status = 200, description = "Checkout session created", body = CreateDonationResponse),
        (status = 400, description = "Invalid amount"),
        (status = 503, description = "Checkout not configured")
    )
)]
#[tracing::instrument(name = "POST /donations", skip(state, params))]
pub async fn create(
    State(state): State<AppState>,
    Json(params): Json<CreateDonationParams>,
) -> Result<Json<CreateDonationResponse>, ApiError> {
    if params.amount < MIN_AMOUNT {
        return Err(ApiError::bad_request(format!(
            "Amount must be at least {}",
            MIN_AMOUNT
        )));
    }

    let stripe_client = state
        .stripe_client
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Checkout is not configured".to_string()))?;

    let currency = stripe_currency(&state.settings.default_currency)?;

    let success_url = format!("{}/donate?status=success", state.settings.frontend_url);
    let cancel_url = format!("{}/donate?status=canceled", state.settings.frontend_url);

    // Metadata travels back on the webhook and becomes the donation record
    let mut metadata = HashMap::new();
    metadata.insert("type".to_string(), "donation".to_string());
    if let Some(donor_name) = &params.donor_name {
        metadata.insert("donor_name".to_string(), donor_name.clone());
    }
    if let Some(message) = &params.message {
        metadata.insert("message".to_string(), message.clone());
    }

    let mut session_params = stripe::CreateCheckoutSession::new();
    session_params.success_url = Some(&success_url);
    session_params.cancel_url = Some(&cancel_url);
    session_params.mode = Some(stripe::CheckoutSessionMode::Payment);

    let line_item = stripe::CreateCheckoutSessionLineItems {
        price_data: Some(stripe::CreateCheckoutSessionLineItemsPriceData {
            currency,
            product_data: Some(stripe::CreateCheckoutSessionLineItemsPriceDataProductData {
                name: "Donation".to_string(),
                description: Some("Support the archive".to_string()),
                ..Default::default()
            }),
            unit_amount: Some(params.amount),
            ..Default::default()
        }),
        quantity: Some(1),
        ..Default::default()
    };
    session_params.line_items = Some(vec![line_item]);
    session_params.metadata = Some(metadata);

    let session = stripe::CheckoutSession::create(stripe_client, session_params)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create checkout session");
            anyhow!("Failed to create checkout session: {}", e)
        })?;

    let checkout_url = session
        .url
        .ok_or(anyhow!("Checkout session has no redirect URL"))?;

    tracing::info!(session_id = %session.id, amount = params.amount, "Created donation checkout session");

    Ok(Json(CreateDonationResponse { checkout_url }))
}

fn stripe_currency(code: &str) -> Result<stripe::Currency, ApiError> {
    serde_json::from_value(archive_os_types::Value::String(code.to_lowercase()))
        .map_err(|_| ApiError::internal(format!("Unsupported checkout currency: {}", code)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_currency_codes_resolve() {
        assert_eq!(stripe_currency("JPY").unwrap(), stripe::Currency::JPY);
        assert_eq!(stripe_currency("usd").unwrap(), stripe::Currency::USD);
        assert!(stripe_currency("doubloons").is_err());
    }
}
