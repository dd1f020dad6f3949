//! Application State

use std::sync::Arc;

use presence_payments::{EntitlementStore, PaymentGateway, WebhookReconciler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Durable premium map, read by the status endpoint.
    pub store: Arc<dyn EntitlementStore>,

    /// Processor facade used by the issuing endpoints.
    pub gateway: Arc<dyn PaymentGateway>,

    /// Webhook consumer; shares the store and gateway above.
    pub reconciler: Arc<WebhookReconciler>,
}
