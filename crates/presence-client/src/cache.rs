//! Client Entitlement Cache
//!
//! On-device mirror of the subscriber's premium flag. Two fields are kept
//! deliberately separate: `local_optimistic_premium` flips the moment the
//! hosted payment UI reports success, so the app can unlock immediately,
//! while `server_confirmed_premium` only ever records what the backend's
//! query service answered. The backend is the source of truth; how to
//! present a disagreement between the two (payment succeeded locally but
//! the server still says false) is the embedding UI's policy, not decided
//! here.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api::BackendApi;
use crate::error::Result;

/// Where confirmed entitlement answers come from. Implemented by
/// [`BackendApi`]; tests substitute their own.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn premium_status(&self, subscriber: &str) -> Result<bool>;
}

#[async_trait]
impl StatusSource for BackendApi {
    async fn premium_status(&self, subscriber: &str) -> Result<bool> {
        BackendApi::premium_status(self, subscriber).await
    }
}

/// Both cache fields at one point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntitlementSnapshot {
    pub local_optimistic_premium: bool,
    pub server_confirmed_premium: bool,
}

/// Premium-flag mirror for a single subscriber.
pub struct EntitlementCache {
    subscriber: String,
    source: Arc<dyn StatusSource>,
    local_optimistic_premium: bool,
    server_confirmed_premium: bool,
}

impl EntitlementCache {
    pub fn new(subscriber: impl Into<String>, source: Arc<dyn StatusSource>) -> Self {
        Self {
            subscriber: subscriber.into(),
            source,
            local_optimistic_premium: false,
            server_confirmed_premium: false,
        }
    }

    /// The hosted payment UI reported success. Unlocks optimistically;
    /// call [`refresh`](Self::refresh) afterwards to reconcile against the
    /// backend once its webhook has landed.
    pub fn on_local_payment_success(&mut self) {
        self.local_optimistic_premium = true;
        tracing::debug!(subscriber = %self.subscriber, "optimistic premium set");
    }

    /// Ask the backend for the confirmed flag and record the answer.
    ///
    /// A `false` answer does NOT clear the optimistic flag: the webhook
    /// may simply not have been reconciled yet, and the conflict is the
    /// caller's to surface.
    pub async fn refresh(&mut self) -> Result<EntitlementSnapshot> {
        let confirmed = self.source.premium_status(&self.subscriber).await?;
        self.server_confirmed_premium = confirmed;

        if self.local_optimistic_premium && !confirmed {
            tracing::warn!(
                subscriber = %self.subscriber,
                "local payment succeeded but server has not confirmed premium yet"
            );
        }

        Ok(self.snapshot())
    }

    pub fn snapshot(&self) -> EntitlementSnapshot {
        EntitlementSnapshot {
            local_optimistic_premium: self.local_optimistic_premium,
            server_confirmed_premium: self.server_confirmed_premium,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeSource {
        answer: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn answering(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                answer: AtomicBool::new(answer),
                calls: AtomicUsize::new(0),
            })
        }

        fn set_answer(&self, answer: bool) {
            self.answer.store(answer, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StatusSource for FakeSource {
        async fn premium_status(&self, _subscriber: &str) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.load(Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn test_starts_with_both_flags_clear() {
        let cache = EntitlementCache::new("5551234567", FakeSource::answering(false));
        assert_eq!(
            cache.snapshot(),
            EntitlementSnapshot {
                local_optimistic_premium: false,
                server_confirmed_premium: false,
            }
        );
    }

    #[tokio::test]
    async fn test_local_success_is_optimistic_only() {
        let source = FakeSource::answering(false);
        let mut cache = EntitlementCache::new("5551234567", source.clone());

        cache.on_local_payment_success();

        let snapshot = cache.snapshot();
        assert!(snapshot.local_optimistic_premium);
        assert!(!snapshot.server_confirmed_premium);
        // No network call happens until refresh.
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_records_confirmation() {
        let source = FakeSource::answering(true);
        let mut cache = EntitlementCache::new("5551234567", source.clone());
        cache.on_local_payment_success();

        let snapshot = cache.refresh().await.unwrap();

        assert!(snapshot.local_optimistic_premium);
        assert!(snapshot.server_confirmed_premium);
    }

    #[tokio::test]
    async fn test_false_answer_keeps_optimistic_flag() {
        let source = FakeSource::answering(false);
        let mut cache = EntitlementCache::new("5551234567", source.clone());
        cache.on_local_payment_success();

        let snapshot = cache.refresh().await.unwrap();

        assert!(snapshot.local_optimistic_premium);
        assert!(!snapshot.server_confirmed_premium);
    }

    #[tokio::test]
    async fn test_later_confirmation_lands() {
        let source = FakeSource::answering(false);
        let mut cache = EntitlementCache::new("5551234567", source.clone());
        cache.on_local_payment_success();

        cache.refresh().await.unwrap();
        source.set_answer(true);
        let snapshot = cache.refresh().await.unwrap();

        assert!(snapshot.server_confirmed_premium);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
