//! Webhook Reconciliation
//!
//! Turns verified processor events into entitlement grants. The contract
//! with the processor is asymmetric on purpose: a bad signature is a hard
//! 4xx (nothing was mutated, redelivery is harmless), but once the
//! signature checks out the delivery is acknowledged even when the
//! subscriber cannot be resolved, since repeated 4xx/5xx answers trigger
//! redelivery storms that are worse than one dropped entitlement, which
//! support channels and client polling can recover. The single exception
//! is an entitlement-store write failure, which is surfaced so the
//! processor redelivers a grant we failed to persist.

use std::sync::Arc;

use crate::entitlements::EntitlementStore;
use crate::error::Result;
use crate::event::{PaymentEvent, WebhookVerifier};
use crate::gateway::{METADATA_PHONE, PaymentGateway};

/// What a verified delivery amounted to. Every variant is acknowledged
/// with a success status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Entitlement recorded for this subscriber.
    Marked { subscriber: String },

    /// Meaningful event, but no subscriber identifier could be resolved.
    Unresolved,

    /// Event type this service does not consume.
    Ignored,
}

/// Consumes processor webhook deliveries and updates the entitlement store.
pub struct WebhookReconciler {
    store: Arc<dyn EntitlementStore>,
    gateway: Arc<dyn PaymentGateway>,
    verifier: WebhookVerifier,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        gateway: Arc<dyn PaymentGateway>,
        verifier: WebhookVerifier,
    ) -> Self {
        Self {
            store,
            gateway,
            verifier,
        }
    }

    /// Verify and apply one delivery.
    ///
    /// `payload` must be the exact raw request body; the MAC is computed
    /// over those bytes. Errors are only returned for signature failures
    /// (authentication) and store write failures (storage); everything
    /// else resolves to an acknowledged [`ReconcileOutcome`]. Redelivering
    /// the same event reconverges to the same store state.
    pub async fn process(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ReconcileOutcome> {
        self.verifier.verify(payload, signature_header)?;

        let event = match PaymentEvent::from_raw(payload) {
            Ok(event) => event,
            Err(e) => {
                // Signed but unparseable: acknowledge so the processor
                // stops redelivering a payload we will never understand.
                tracing::warn!(error = %e, "discarding unparseable verified event");
                return Ok(ReconcileOutcome::Ignored);
            }
        };

        match event {
            PaymentEvent::ChargeSucceeded {
                intent_id,
                subscriber,
            } => match subscriber {
                Some(subscriber) => self.grant(&subscriber, "charge metadata"),
                None => {
                    tracing::warn!(
                        intent_id = %intent_id,
                        "charge succeeded without subscriber metadata, nothing to grant"
                    );
                    Ok(ReconcileOutcome::Unresolved)
                }
            },

            PaymentEvent::InvoicePaid {
                invoice_id,
                payment_intent,
                customer,
            } => {
                match self.resolve_invoice_subscriber(payment_intent, customer).await {
                    Some((subscriber, path)) => self.grant(&subscriber, path),
                    None => {
                        tracing::warn!(
                            invoice_id = %invoice_id,
                            "invoice paid but no subscriber resolved, leaving store unchanged"
                        );
                        Ok(ReconcileOutcome::Unresolved)
                    }
                }
            }

            PaymentEvent::Ignored { event_type } => {
                tracing::debug!(event_type = %event_type, "ignoring unhandled event type");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    fn grant(&self, subscriber: &str, path: &str) -> Result<ReconcileOutcome> {
        self.store.mark_premium(subscriber)?;
        tracing::info!(subscriber = %subscriber, resolved_via = path, "marked premium");
        Ok(ReconcileOutcome::Marked {
            subscriber: subscriber.to_string(),
        })
    }

    /// Invoice events reference the subscriber indirectly: first the
    /// payment intent's metadata (populated at issue time), then the
    /// customer's phone field, then the customer's metadata. Lookup
    /// failures are warnings, not errors; the delivery still gets
    /// acknowledged.
    async fn resolve_invoice_subscriber(
        &self,
        payment_intent: Option<String>,
        customer: Option<String>,
    ) -> Option<(String, &'static str)> {
        if let Some(intent_id) = payment_intent {
            match self.gateway.fetch_payment_intent(&intent_id).await {
                Ok(details) => {
                    if let Some(phone) = details.metadata.get(METADATA_PHONE) {
                        if !phone.is_empty() {
                            return Some((phone.clone(), "intent metadata"));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        intent_id = %intent_id,
                        error = %e,
                        "payment intent lookup failed, trying customer fallback"
                    );
                }
            }
        }

        if let Some(customer_id) = customer {
            match self.gateway.fetch_customer(&customer_id).await {
                Ok(details) => {
                    if let Some(phone) = details.phone.filter(|p| !p.is_empty()) {
                        return Some((phone, "customer phone"));
                    }
                    if let Some(phone) = details.metadata.get(METADATA_PHONE) {
                        if !phone.is_empty() {
                            return Some((phone.clone(), "customer metadata"));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        customer_id = %customer_id,
                        error = %e,
                        "customer lookup failed"
                    );
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::MemoryEntitlementStore;
    use crate::error::PaymentError;
    use crate::gateway::MockGateway;
    use std::collections::HashMap;

    const SECRET: &str = "whsec_test_secret";

    struct Fixture {
        store: Arc<MemoryEntitlementStore>,
        gateway: Arc<MockGateway>,
        reconciler: WebhookReconciler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryEntitlementStore::new());
        let gateway = Arc::new(MockGateway::new());
        let reconciler = WebhookReconciler::new(
            store.clone(),
            gateway.clone(),
            WebhookVerifier::new(SECRET),
        );
        Fixture {
            store,
            gateway,
            reconciler,
        }
    }

    fn signed(payload: &serde_json::Value) -> (Vec<u8>, String) {
        let bytes = payload.to_string().into_bytes();
        let header = WebhookVerifier::new(SECRET)
            .signature_header(chrono::Utc::now().timestamp(), &bytes);
        (bytes, header)
    }

    fn charge_event(phone: Option<&str>) -> serde_json::Value {
        let mut object = serde_json::json!({"id": "pi_123", "amount": 500});
        if let Some(phone) = phone {
            object["metadata"] = serde_json::json!({"phone": phone});
        }
        serde_json::json!({
            "id": "evt_charge",
            "type": "payment_intent.succeeded",
            "data": {"object": object}
        })
    }

    fn invoice_event(payment_intent: Option<&str>, customer: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "id": "evt_invoice",
            "type": "invoice.payment_succeeded",
            "data": {"object": {
                "id": "in_42",
                "payment_intent": payment_intent,
                "customer": customer
            }}
        })
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_without_store_mutation() {
        let f = fixture();
        let payload = charge_event(Some("5551234567")).to_string().into_bytes();

        let result = f.reconciler.process(&payload, "t=0,v1=00ff").await;

        assert!(matches!(result, Err(PaymentError::Authentication(_))));
        assert!(!f.store.is_premium("5551234567"));
    }

    #[tokio::test]
    async fn test_charge_metadata_resolves_without_lookups() {
        let f = fixture();
        let (payload, header) = signed(&charge_event(Some("5551234567")));

        let outcome = f.reconciler.process(&payload, &header).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Marked {
                subscriber: "5551234567".into()
            }
        );
        assert!(f.store.is_premium("5551234567"));
        assert_eq!(f.gateway.lookup_calls(), 0);
    }

    #[tokio::test]
    async fn test_charge_without_metadata_is_acknowledged_unresolved() {
        let f = fixture();
        let (payload, header) = signed(&charge_event(None));

        let outcome = f.reconciler.process(&payload, &header).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unresolved);
        assert!(!f.store.is_premium("5551234567"));
    }

    #[tokio::test]
    async fn test_invoice_resolves_via_intent_metadata_first() {
        let f = fixture();
        f.gateway.insert_intent(
            "pi_777",
            HashMap::from([("phone".to_string(), "5550001111".to_string())]),
        );
        f.gateway.insert_customer("cus_9", Some("5559999999"), HashMap::new());
        let (payload, header) = signed(&invoice_event(Some("pi_777"), Some("cus_9")));

        let outcome = f.reconciler.process(&payload, &header).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Marked {
                subscriber: "5550001111".into()
            }
        );
        // The customer was never dereferenced.
        assert_eq!(f.gateway.lookup_calls(), 1);
    }

    #[tokio::test]
    async fn test_invoice_falls_back_to_customer_phone() {
        let f = fixture();
        f.gateway.insert_intent("pi_777", HashMap::new());
        f.gateway
            .insert_customer("cus_9", Some("5559876543"), HashMap::new());
        let (payload, header) = signed(&invoice_event(Some("pi_777"), Some("cus_9")));

        let outcome = f.reconciler.process(&payload, &header).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Marked {
                subscriber: "5559876543".into()
            }
        );
        assert!(f.store.is_premium("5559876543"));
        assert_eq!(f.gateway.lookup_calls(), 2);
    }

    #[tokio::test]
    async fn test_invoice_falls_back_to_customer_metadata() {
        let f = fixture();
        f.gateway.insert_customer(
            "cus_9",
            None,
            HashMap::from([("phone".to_string(), "5553334444".to_string())]),
        );
        let (payload, header) = signed(&invoice_event(None, Some("cus_9")));

        let outcome = f.reconciler.process(&payload, &header).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Marked {
                subscriber: "5553334444".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unresolvable_invoice_leaves_store_unchanged() {
        let f = fixture();
        f.gateway.insert_intent("pi_777", HashMap::new());
        f.gateway.insert_customer("cus_9", None, HashMap::new());
        let (payload, header) = signed(&invoice_event(Some("pi_777"), Some("cus_9")));

        let outcome = f.reconciler.process(&payload, &header).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unresolved);
        assert!(!f.store.is_premium("5551234567"));
    }

    #[tokio::test]
    async fn test_failed_lookups_still_acknowledge() {
        let f = fixture();
        // Neither id is seeded, so both lookups fail upstream.
        let (payload, header) = signed(&invoice_event(Some("pi_nope"), Some("cus_nope")));

        let outcome = f.reconciler.process(&payload, &header).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unresolved);
        assert_eq!(f.gateway.lookup_calls(), 2);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let f = fixture();
        let (payload, header) = signed(&charge_event(Some("5551234567")));

        let first = f.reconciler.process(&payload, &header).await.unwrap();
        let second = f.reconciler.process(&payload, &header).await.unwrap();

        assert_eq!(first, second);
        assert!(f.store.is_premium("5551234567"));
    }

    #[tokio::test]
    async fn test_premium_is_monotonic_across_events() {
        let f = fixture();
        let (payload, header) = signed(&charge_event(Some("5551234567")));
        f.reconciler.process(&payload, &header).await.unwrap();
        assert!(f.store.is_premium("5551234567"));

        // Later unresolvable and unrelated traffic never clears the flag.
        let (payload, header) = signed(&invoice_event(None, None));
        f.reconciler.process(&payload, &header).await.unwrap();
        let (payload, header) = signed(&serde_json::json!({
            "id": "evt_y",
            "type": "charge.refunded",
            "data": {"object": {"id": "ch_1"}}
        }));
        f.reconciler.process(&payload, &header).await.unwrap();

        assert!(f.store.is_premium("5551234567"));
    }

    #[tokio::test]
    async fn test_unrelated_event_is_ignored() {
        let f = fixture();
        let payload = serde_json::json!({
            "id": "evt_x",
            "type": "customer.subscription.deleted",
            "data": {"object": {"id": "sub_1"}}
        });
        let (payload, header) = signed(&payload);

        let outcome = f.reconciler.process(&payload, &header).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_signed_garbage_is_acknowledged() {
        let f = fixture();
        let payload = b"not even json".to_vec();
        let header = WebhookVerifier::new(SECRET)
            .signature_header(chrono::Utc::now().timestamp(), &payload);

        let outcome = f.reconciler.process(&payload, &header).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_happy_path_subscription_end_to_end() {
        let f = fixture();

        let issued = f
            .gateway
            .create_subscription(Some("5550001111"))
            .await
            .unwrap();
        assert!(!issued.client_secret.is_empty());

        // The processor later reports the first invoice as paid.
        let (payload, header) = signed(&invoice_event(Some("pi_mock_1"), Some("cus_mock_1")));
        let outcome = f.reconciler.process(&payload, &header).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Marked {
                subscriber: "5550001111".into()
            }
        );
        assert!(f.store.is_premium("5550001111"));
    }
}
