//! Server Configuration
//!
//! All processor credentials are required up front; a deployment that
//! cannot verify webhooks or create subscriptions should refuse to start
//! rather than fail on the first request.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    /// Processor API secret key (`sk_live_...` / `sk_test_...`).
    pub stripe_secret_key: String,

    /// Webhook signing secret (`whsec_...`).
    pub webhook_secret: String,

    /// Recurring price id for subscriptions (`price_...`).
    pub price_id: String,

    /// Listen address.
    pub bind_addr: String,

    /// Directory holding the entitlement file.
    pub data_dir: PathBuf,

    /// Timeout applied to every outbound processor call.
    pub upstream_timeout: Duration,
}

impl Config {
    /// Load from the environment, reporting every missing required key at
    /// once so a misconfigured deployment can be fixed in one pass.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut missing = Vec::new();

        let stripe_secret_key = require("STRIPE_SECRET_KEY", &mut missing);
        let webhook_secret = require("STRIPE_WEBHOOK_SECRET", &mut missing);
        let price_id = require("STRIPE_PRICE_ID", &mut missing);

        if !missing.is_empty() {
            anyhow::bail!(
                "missing required environment variables: {}",
                missing.join(", ")
            );
        }

        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:4242".into());
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        let upstream_timeout = std::env::var("UPSTREAM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Ok(Self {
            stripe_secret_key,
            webhook_secret,
            price_id,
            bind_addr,
            data_dir,
            upstream_timeout,
        })
    }
}

/// Read a required variable; empty counts as missing.
fn require(key: &'static str, missing: &mut Vec<&'static str>) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => {
            missing.push(key);
            String::new()
        }
    }
}
