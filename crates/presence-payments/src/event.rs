//! Webhook Signature Verification and Event Model
//!
//! The processor signs each delivery with `t=<unix>,v1=<hex hmac>` over
//! `"{t}.{raw body}"`. Verification MUST run over the exact bytes received;
//! re-serializing the parsed JSON is not byte-stable and silently breaks the
//! MAC. Once verified, the payload is parsed exactly once into the
//! [`PaymentEvent`] tagged union; nothing downstream dispatches on raw
//! type strings.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted event age, matching the processor's replay window.
const MAX_EVENT_AGE_SECS: i64 = 300;

/// Clock-skew tolerance for timestamps slightly in the future.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Event type carrying the subscriber directly in intent metadata.
const TYPE_CHARGE_SUCCEEDED: &str = "payment_intent.succeeded";

/// Event type whose subscriber must be recovered via follow-up lookups.
const TYPE_INVOICE_PAID: &str = "invoice.payment_succeeded";

/// Parsed components of the signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SignatureHeader {
    timestamp: i64,
    v1_signature: Vec<u8>,
}

impl SignatureHeader {
    /// Parse a `t=<timestamp>,v1=<hex>` header. Unknown fields (`v0`,
    /// future schemes) are ignored.
    fn parse(header: &str) -> Result<Self> {
        let mut timestamp = None;
        let mut v1_signature = None;

        for part in header.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                return Err(PaymentError::Authentication(
                    "malformed signature header".into(),
                ));
            };
            match key.trim() {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        PaymentError::Authentication("invalid signature timestamp".into())
                    })?);
                }
                "v1" => {
                    v1_signature = Some(hex::decode(value).map_err(|_| {
                        PaymentError::Authentication("invalid signature hex".into())
                    })?);
                }
                _ => {}
            }
        }

        Ok(Self {
            timestamp: timestamp.ok_or_else(|| {
                PaymentError::Authentication("signature header missing timestamp".into())
            })?,
            v1_signature: v1_signature.ok_or_else(|| {
                PaymentError::Authentication("signature header missing v1 signature".into())
            })?,
        })
    }
}

/// Verifies webhook deliveries against the pre-shared signing secret.
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify `signature_header` against the raw `payload` bytes.
    ///
    /// Rejects stale timestamps (replay window) and compares MACs in
    /// constant time. Returns [`PaymentError::Authentication`] on any
    /// mismatch; the caller must not have touched any state yet.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        let header = SignatureHeader::parse(signature_header)?;

        let now = chrono::Utc::now().timestamp();
        let age = now - header.timestamp;
        if age > MAX_EVENT_AGE_SECS {
            return Err(PaymentError::Authentication(format!(
                "event too old ({age} seconds)"
            )));
        }
        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(PaymentError::Authentication(
                "event timestamp in the future".into(),
            ));
        }

        let expected = self.mac(header.timestamp, payload);
        if expected.len() != header.v1_signature.len()
            || expected.ct_eq(&header.v1_signature).unwrap_u8() != 1
        {
            return Err(PaymentError::Authentication("signature mismatch".into()));
        }

        Ok(())
    }

    /// Produce a full `t=..,v1=..` header for `payload` at `timestamp`.
    ///
    /// This is the signing half of [`verify`](Self::verify); it exists so
    /// tests and local tooling can fabricate deliveries.
    pub fn signature_header(&self, timestamp: i64, payload: &[u8]) -> String {
        format!("t={timestamp},v1={}", hex::encode(self.mac(timestamp, payload)))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

/// A verified payment notification, reduced to the two shapes this service
/// consumes plus a catch-all for everything else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentEvent {
    /// One-time charge succeeded; the subscriber rides along in the
    /// intent's metadata when it was attached at creation time.
    ChargeSucceeded {
        intent_id: String,
        subscriber: Option<String>,
    },

    /// Subscription invoice paid; the subscriber must be recovered through
    /// the referenced payment intent or, failing that, the customer record.
    InvoicePaid {
        invoice_id: String,
        payment_intent: Option<String>,
        customer: Option<String>,
    },

    /// Any other event type; acknowledged and dropped.
    Ignored { event_type: String },
}

#[derive(Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct IntentObject {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct InvoiceObject {
    id: String,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    customer: Option<String>,
}

impl PaymentEvent {
    /// Parse a verified raw payload into the event union.
    ///
    /// Only the fields this service consumes are read; the rest of the
    /// processor's payload is ignored. An unrecognized event type parses to
    /// [`PaymentEvent::Ignored`] rather than an error, since the processor
    /// must still be acknowledged for it.
    pub fn from_raw(payload: &[u8]) -> Result<Self> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::Validation(format!("unparseable event payload: {e}")))?;

        match envelope.event_type.as_str() {
            TYPE_CHARGE_SUCCEEDED => {
                let intent: IntentObject = serde_json::from_value(envelope.data.object)
                    .map_err(|e| {
                        PaymentError::Validation(format!(
                            "event {} has no payment intent object: {e}",
                            envelope.id
                        ))
                    })?;
                Ok(PaymentEvent::ChargeSucceeded {
                    intent_id: intent.id,
                    subscriber: non_empty(intent.metadata.get(crate::gateway::METADATA_PHONE)),
                })
            }
            TYPE_INVOICE_PAID => {
                let invoice: InvoiceObject = serde_json::from_value(envelope.data.object)
                    .map_err(|e| {
                        PaymentError::Validation(format!(
                            "event {} has no invoice object: {e}",
                            envelope.id
                        ))
                    })?;
                Ok(PaymentEvent::InvoicePaid {
                    invoice_id: invoice.id,
                    payment_intent: invoice.payment_intent.filter(|s| !s.is_empty()),
                    customer: invoice.customer.filter(|s| !s.is_empty()),
                })
            }
            _ => Ok(PaymentEvent::Ignored {
                event_type: envelope.event_type,
            }),
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|s| !s.is_empty()).cloned()
}
