//! Payment Processor Gateway
//!
//! Facade over the card-payment processor: issuing one-time charges and
//! subscriptions, and the dereference lookups the reconciler needs. The
//! trait seam keeps the reconciler and the HTTP handlers testable without
//! processor credentials.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use stripe::{
    CreateCustomer, CreatePaymentIntent, CreatePaymentIntentAutomaticPaymentMethods,
    CreateSubscription, CreateSubscriptionItems, CreateSubscriptionPaymentSettings,
    CreateSubscriptionPaymentSettingsSaveDefaultPaymentMethod, Currency, Customer, CustomerId,
    Expandable, PaymentIntent, PaymentIntentId, Subscription, SubscriptionPaymentBehavior,
    UpdatePaymentIntent,
};

use crate::error::{PaymentError, Result};

/// Metadata key carrying the subscriber phone number on processor objects.
pub const METADATA_PHONE: &str = "phone";

/// A created one-time charge, ready for client-side confirmation.
#[derive(Clone, Debug)]
pub struct IssuedIntent {
    pub client_secret: String,
    pub intent_id: String,
}

/// A created subscription with the secret for its first invoice's payment.
#[derive(Clone, Debug)]
pub struct IssuedSubscription {
    pub client_secret: String,
    pub subscription_id: String,
}

/// Payment-intent fields the reconciler dereferences.
#[derive(Clone, Debug, Default)]
pub struct IntentDetails {
    pub metadata: HashMap<String, String>,
}

/// Customer fields the reconciler falls back to.
#[derive(Clone, Debug, Default)]
pub struct CustomerDetails {
    pub phone: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Outbound processor operations.
///
/// Implementations surface every failure as [`PaymentError::Upstream`] with
/// the processor's message attached and never retry; retry policy belongs to
/// the caller (or, for webhooks, to the processor's own redelivery).
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a one-time charge of `amount_minor` (already validated as a
    /// positive integer) in `currency`, tagging the subscriber into the
    /// intent's metadata so the webhook can resolve it without a lookup.
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        subscriber: Option<&str>,
    ) -> Result<IssuedIntent>;

    /// Create a customer plus an incomplete subscription against the
    /// configured recurring price. The subscriber is tagged onto the
    /// customer AND onto the first invoice's payment intent, so the
    /// reconciler's primary path works without the customer fallback.
    async fn create_subscription(&self, subscriber: Option<&str>) -> Result<IssuedSubscription>;

    /// Dereference a payment intent for its metadata.
    async fn fetch_payment_intent(&self, intent_id: &str) -> Result<IntentDetails>;

    /// Dereference a customer for its phone and metadata.
    async fn fetch_customer(&self, customer_id: &str) -> Result<CustomerDetails>;
}

/// Production gateway backed by the Stripe API.
pub struct StripeGateway {
    client: stripe::Client,
    price_id: String,
    timeout: Duration,
}

impl StripeGateway {
    pub fn new(secret_key: &str, price_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: stripe::Client::new(secret_key),
            price_id: price_id.into(),
            timeout,
        }
    }

    /// Run a processor call under the configured timeout. An upstream hang
    /// must not stall request handling indefinitely.
    async fn bounded<T>(&self, op: &str, fut: stripe::Response<T>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(PaymentError::Upstream(format!("{op}: {e}"))),
            Err(_) => Err(PaymentError::Upstream(format!(
                "{op}: timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

fn phone_metadata(phone: &str) -> HashMap<String, String> {
    HashMap::from([(METADATA_PHONE.to_string(), phone.to_string())])
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        subscriber: Option<&str>,
    ) -> Result<IssuedIntent> {
        let currency = currency
            .parse::<Currency>()
            .map_err(|_| PaymentError::Validation(format!("unsupported currency: {currency}")))?;

        let mut params = CreatePaymentIntent::new(amount_minor, currency);
        params.automatic_payment_methods = Some(CreatePaymentIntentAutomaticPaymentMethods {
            allow_redirects: None,
            enabled: true,
        });
        if let Some(phone) = subscriber {
            params.metadata = Some(phone_metadata(phone));
        }

        let intent = self
            .bounded(
                "create payment intent",
                PaymentIntent::create(&self.client, params),
            )
            .await?;

        tracing::info!(intent_id = %intent.id, amount = amount_minor, "created payment intent");

        Ok(IssuedIntent {
            client_secret: intent.client_secret.ok_or_else(|| {
                PaymentError::Upstream("payment intent missing client secret".into())
            })?,
            intent_id: intent.id.to_string(),
        })
    }

    async fn create_subscription(&self, subscriber: Option<&str>) -> Result<IssuedSubscription> {
        let mut params = CreateCustomer::new();
        let metadata = subscriber.map(phone_metadata);
        if let Some(phone) = subscriber {
            params.phone = Some(phone);
            params.metadata = metadata.clone();
        }

        let customer = self
            .bounded("create customer", Customer::create(&self.client, params))
            .await?;

        let mut params = CreateSubscription::new(customer.id.clone());
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(self.price_id.clone()),
            ..Default::default()
        }]);
        params.payment_behavior = Some(SubscriptionPaymentBehavior::DefaultIncomplete);
        params.payment_settings = Some(CreateSubscriptionPaymentSettings {
            save_default_payment_method: Some(
                CreateSubscriptionPaymentSettingsSaveDefaultPaymentMethod::OnSubscription,
            ),
            ..Default::default()
        });
        params.expand = &["latest_invoice.payment_intent"];

        let subscription = self
            .bounded(
                "create subscription",
                Subscription::create(&self.client, params),
            )
            .await?;

        let intent = subscription
            .latest_invoice
            .as_ref()
            .and_then(|invoice| match invoice {
                Expandable::Object(invoice) => invoice.payment_intent.as_ref(),
                Expandable::Id(_) => None,
            })
            .and_then(|intent| match intent {
                Expandable::Object(intent) => Some(&**intent),
                Expandable::Id(_) => None,
            })
            .ok_or_else(|| {
                PaymentError::Upstream("subscription has no expanded payment intent".into())
            })?;

        // The customer tag alone would force the reconciler onto its
        // fallback path; tag the intent itself so metadata wins.
        if let Some(metadata) = metadata {
            let mut update = UpdatePaymentIntent::new();
            update.metadata = Some(metadata);
            self.bounded(
                "tag payment intent",
                PaymentIntent::update(&self.client, &intent.id, update),
            )
            .await?;
        }

        tracing::info!(
            subscription_id = %subscription.id,
            customer_id = %customer.id,
            "created subscription"
        );

        Ok(IssuedSubscription {
            client_secret: intent.client_secret.clone().ok_or_else(|| {
                PaymentError::Upstream("subscription invoice missing client secret".into())
            })?,
            subscription_id: subscription.id.to_string(),
        })
    }

    async fn fetch_payment_intent(&self, intent_id: &str) -> Result<IntentDetails> {
        let id = intent_id.parse::<PaymentIntentId>().map_err(|_| {
            PaymentError::Upstream(format!("invalid payment intent id: {intent_id}"))
        })?;

        let intent = self
            .bounded(
                "fetch payment intent",
                PaymentIntent::retrieve(&self.client, &id, &[]),
            )
            .await?;

        Ok(IntentDetails {
            metadata: intent.metadata,
        })
    }

    async fn fetch_customer(&self, customer_id: &str) -> Result<CustomerDetails> {
        let id = customer_id
            .parse::<CustomerId>()
            .map_err(|_| PaymentError::Upstream(format!("invalid customer id: {customer_id}")))?;

        let customer = self
            .bounded("fetch customer", Customer::retrieve(&self.client, &id, &[]))
            .await?;

        Ok(CustomerDetails {
            phone: customer.phone,
            metadata: customer.metadata.unwrap_or_default(),
        })
    }
}

/// In-memory gateway for tests and credential-less development.
///
/// Issues deterministic ids (`pi_mock_1`, `cus_mock_1`, ...) and records
/// call counts so tests can assert which resolution path ran.
pub struct MockGateway {
    intents: RwLock<HashMap<String, IntentDetails>>,
    customers: RwLock<HashMap<String, CustomerDetails>>,
    next_id: AtomicUsize,
    create_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            intents: RwLock::new(HashMap::new()),
            customers: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            create_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
        }
    }

    /// Seed a payment intent visible to `fetch_payment_intent`.
    pub fn insert_intent(&self, intent_id: &str, metadata: HashMap<String, String>) {
        self.intents
            .write()
            .unwrap()
            .insert(intent_id.to_string(), IntentDetails { metadata });
    }

    /// Seed a customer visible to `fetch_customer`.
    pub fn insert_customer(
        &self,
        customer_id: &str,
        phone: Option<&str>,
        metadata: HashMap<String, String>,
    ) {
        self.customers.write().unwrap().insert(
            customer_id.to_string(),
            CustomerDetails {
                phone: phone.map(str::to_string),
                metadata,
            },
        );
    }

    /// Number of issuing calls made (intents + subscriptions).
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of dereference lookups made (intents + customers).
    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment_intent(
        &self,
        _amount_minor: i64,
        _currency: &str,
        subscriber: Option<&str>,
    ) -> Result<IssuedIntent> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let n = self.next();
        let intent_id = format!("pi_mock_{n}");

        let metadata = subscriber.map(phone_metadata).unwrap_or_default();
        self.insert_intent(&intent_id, metadata);

        Ok(IssuedIntent {
            client_secret: format!("{intent_id}_secret"),
            intent_id,
        })
    }

    async fn create_subscription(&self, subscriber: Option<&str>) -> Result<IssuedSubscription> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let n = self.next();
        let intent_id = format!("pi_mock_{n}");
        let customer_id = format!("cus_mock_{n}");

        self.insert_customer(
            &customer_id,
            subscriber,
            subscriber.map(phone_metadata).unwrap_or_default(),
        );
        // Mirrors the production gateway: the intent carries the tag too.
        self.insert_intent(
            &intent_id,
            subscriber.map(phone_metadata).unwrap_or_default(),
        );

        Ok(IssuedSubscription {
            client_secret: format!("{intent_id}_secret"),
            subscription_id: format!("sub_mock_{n}"),
        })
    }

    async fn fetch_payment_intent(&self, intent_id: &str) -> Result<IntentDetails> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.intents
            .read()
            .unwrap()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| PaymentError::Upstream(format!("no such payment intent: {intent_id}")))
    }

    async fn fetch_customer(&self, customer_id: &str) -> Result<CustomerDetails> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.customers
            .read()
            .unwrap()
            .get(customer_id)
            .cloned()
            .ok_or_else(|| PaymentError::Upstream(format!("no such customer: {customer_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway_tags_intent_metadata() {
        let gateway = MockGateway::new();

        let issued = gateway
            .create_payment_intent(500, "usd", Some("5551234567"))
            .await
            .unwrap();

        let details = gateway.fetch_payment_intent(&issued.intent_id).await.unwrap();
        assert_eq!(
            details.metadata.get(METADATA_PHONE).map(String::as_str),
            Some("5551234567")
        );
    }

    #[tokio::test]
    async fn test_mock_gateway_subscription_seeds_customer_and_intent() {
        let gateway = MockGateway::new();

        let issued = gateway.create_subscription(Some("5550001111")).await.unwrap();
        assert!(issued.subscription_id.starts_with("sub_mock_"));

        let customer = gateway.fetch_customer("cus_mock_1").await.unwrap();
        assert_eq!(customer.phone.as_deref(), Some("5550001111"));

        let intent = gateway.fetch_payment_intent("pi_mock_1").await.unwrap();
        assert_eq!(
            intent.metadata.get(METADATA_PHONE).map(String::as_str),
            Some("5550001111")
        );
    }

    #[tokio::test]
    async fn test_mock_gateway_unknown_ids_are_upstream_errors() {
        let gateway = MockGateway::new();
        assert!(gateway.fetch_payment_intent("pi_none").await.is_err());
        assert!(gateway.fetch_customer("cus_none").await.is_err());
        assert_eq!(gateway.lookup_calls(), 2);
    }
}
