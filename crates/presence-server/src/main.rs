//! presence HTTP Server
//!
//! Axum-based server for the premium-entitlement API: payment issuing,
//! webhook reconciliation, and entitlement queries.

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use presence_payments::{
    JsonFileEntitlementStore, StripeGateway, WebhookReconciler, WebhookVerifier,
};

use crate::config::Config;
use crate::handlers::{
    create_payment_intent, create_subscription, health_check, premium_status, webhook,
};
use crate::state::AppState;

fn app(state: AppState) -> Router {
    // The webhook route reads raw bytes itself; no body-parsing layer may
    // sit in front of it.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/create-payment-intent", post(create_payment_intent))
        .route("/create-subscription", post(create_subscription))
        .route("/webhook", post(webhook))
        .route("/premium-status", get(premium_status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // Durable entitlement map
    let store = Arc::new(JsonFileEntitlementStore::open(
        config.data_dir.join("premium.json"),
    )?);

    // Processor facade and webhook consumer
    let gateway = Arc::new(StripeGateway::new(
        &config.stripe_secret_key,
        config.price_id.clone(),
        config.upstream_timeout,
    ));
    let reconciler = Arc::new(WebhookReconciler::new(
        store.clone(),
        gateway.clone(),
        WebhookVerifier::new(config.webhook_secret.clone()),
    ));

    let state = AppState {
        store,
        gateway,
        reconciler,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("presence server listening on http://{}", config.bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                 - Liveness probe");
    tracing::info!("  POST /create-payment-intent  - Issue a one-time charge");
    tracing::info!("  POST /create-subscription    - Issue a subscription");
    tracing::info!("  POST /webhook                - Processor event intake");
    tracing::info!("  GET  /premium-status         - Entitlement query");

    axum::serve(listener, app(state)).await?;

    Ok(())
}
