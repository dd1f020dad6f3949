//! HTTP Handlers

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use presence_payments::{EntitlementStore, PaymentError, PaymentGateway};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body of `POST /create-payment-intent`.
///
/// `amount` stays a raw JSON value so a missing or non-numeric amount maps
/// to this service's validation error (and never reaches the processor)
/// instead of a deserializer rejection.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentIntentRequest {
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentIntentCreated {
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSubscriptionRequest {
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionCreated {
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    #[serde(rename = "subscriptionId")]
    pub subscription_id: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Deserialize)]
pub struct PremiumStatusQuery {
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PremiumStatusResponse {
    pub premium: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps the core error taxonomy onto the HTTP surface: caller mistakes and
/// signature failures are 400s, processor and storage trouble are 500s.
pub struct ApiError(PaymentError);

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PaymentError::Validation(_) | PaymentError::Authentication(_) => {
                StatusCode::BAD_REQUEST
            }
            PaymentError::Upstream(_) | PaymentError::Storage(_) | PaymentError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Liveness probe
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

/// Create a one-time charge and hand back its client secret.
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Json(req): Json<CreatePaymentIntentRequest>,
) -> Result<Json<PaymentIntentCreated>, ApiError> {
    let amount = req
        .amount
        .as_ref()
        .and_then(serde_json::Value::as_i64)
        .filter(|amount| *amount > 0)
        .ok_or_else(|| PaymentError::validation("invalid amount"))?;

    let currency = req.currency.as_deref().unwrap_or("usd");
    let phone = req.phone.as_deref().filter(|p| !p.is_empty());

    let issued = state
        .gateway
        .create_payment_intent(amount, currency, phone)
        .await?;

    Ok(Json(PaymentIntentCreated {
        client_secret: issued.client_secret,
        id: issued.intent_id,
    }))
}

/// Create an incomplete subscription and hand back the secret for its
/// first invoice's payment.
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<Json<SubscriptionCreated>, ApiError> {
    let phone = req.phone.as_deref().filter(|p| !p.is_empty());

    let issued = state.gateway.create_subscription(phone).await?;

    Ok(Json(SubscriptionCreated {
        client_secret: issued.client_secret,
        subscription_id: issued.subscription_id,
    }))
}

/// Processor webhook intake.
///
/// Takes the raw body bytes: signature verification runs over exactly what
/// was received, so no JSON extractor may touch this route. Acknowledges
/// every verified delivery regardless of resolution outcome.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PaymentError::Authentication("missing stripe-signature header".into()))?;

    state.reconciler.process(&body, signature).await?;

    Ok(Json(WebhookAck { received: true }))
}

/// Server-confirmed premium flag for a subscriber.
pub async fn premium_status(
    State(state): State<AppState>,
    Query(query): Query<PremiumStatusQuery>,
) -> Result<Json<PremiumStatusResponse>, ApiError> {
    let phone = query
        .phone
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| PaymentError::validation("missing phone"))?;

    Ok(Json(PremiumStatusResponse {
        premium: state.store.is_premium(phone),
    }))
}
