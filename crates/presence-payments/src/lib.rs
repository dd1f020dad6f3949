//! # presence-payments
//!
//! Premium-entitlement core for the presence backend: issuing payments
//! against the card processor, verifying and reconciling its asynchronous
//! webhook events, and persisting who is premium.
//!
//! ## Flow
//!
//! ```text
//! ┌────────┐  create intent /   ┌─────────────┐   signed webhook   ┌────────────┐
//! │ Client │ ─ subscription ──▶ │  Processor  │ ─────────────────▶ │ Reconciler │
//! └────────┘                    └─────────────┘                    └─────┬──────┘
//!      │                                                                │ mark
//!      │              GET premium-status                          ┌─────▼──────┐
//!      └────────────────────────────────────────────────────────▶ │   Store    │
//!                                                                 └────────────┘
//! ```
//!
//! The client pays through the processor's hosted UI; this crate never sees
//! card data. Entitlement truth lives in the [`EntitlementStore`], mutated
//! only by the [`WebhookReconciler`] from verified events. The store is
//! monotonic: a premium flag, once set, is never cleared by any path here.

mod entitlements;
mod error;
mod event;
mod gateway;
mod reconciler;

pub use entitlements::{EntitlementStore, JsonFileEntitlementStore, MemoryEntitlementStore};
pub use error::{PaymentError, Result};
pub use event::{PaymentEvent, WebhookVerifier};
pub use gateway::{
    CustomerDetails, IntentDetails, IssuedIntent, IssuedSubscription, METADATA_PHONE,
    MockGateway, PaymentGateway, StripeGateway,
};
pub use reconciler::{ReconcileOutcome, WebhookReconciler};
