//! Backend API Bindings
//!
//! Typed wrapper over the presence backend's HTTP surface. Field names in
//! the DTOs are the wire contract and must not drift from the server.

use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{ClientError, Result};

/// Default request timeout for backend calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct CreatePaymentIntentRequest<'a> {
    amount: i64,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
}

/// A created one-time charge.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentCreated {
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    pub id: String,
}

#[derive(Debug, Serialize)]
struct CreateSubscriptionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
}

/// A created subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionCreated {
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    #[serde(rename = "subscriptionId")]
    pub subscription_id: String,
}

#[derive(Debug, Deserialize)]
struct PremiumStatusResponse {
    premium: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the presence backend.
pub struct BackendApi {
    http: reqwest::Client,
    base_url: String,
}

impl BackendApi {
    /// Build a client for the backend at `base_url` (no trailing slash
    /// required) with the default request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `POST /create-payment-intent` with the amount in minor units, `usd`.
    pub async fn create_payment_intent(
        &self,
        amount_minor: i64,
        phone: Option<&str>,
    ) -> Result<PaymentIntentCreated> {
        self.post(
            "create-payment-intent",
            &CreatePaymentIntentRequest {
                amount: amount_minor,
                currency: "usd",
                phone,
            },
        )
        .await
    }

    /// `POST /create-subscription`.
    pub async fn create_subscription(&self, phone: Option<&str>) -> Result<SubscriptionCreated> {
        self.post("create-subscription", &CreateSubscriptionRequest { phone })
            .await
    }

    /// `GET /premium-status`, the server-confirmed entitlement flag.
    pub async fn premium_status(&self, phone: &str) -> Result<bool> {
        let url = format!("{}/premium-status", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("phone", phone)])
            .send()
            .await?;

        let status: PremiumStatusResponse = Self::decode(response).await?;
        Ok(status.premium)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.base_url);
        let response = self.http.post(&url).json(body).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        tracing::warn!(status = status.as_u16(), message = %message, "backend call failed");

        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
