/// Payment provider webhooks
///
/// `Stripe-Signature` is `t=<unix>,v1=<hex hmac>[,v1=...]`, where the MAC is
/// HMAC-SHA256 over `"{t}.{raw body}"` keyed with the endpoint secret.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::BillingError;

/// Largest accepted clock difference between signing and receipt
pub const SIGNATURE_TOLERANCE_SECONDS: i64 = 300;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

type HmacSha256 = Hmac<Sha256>;

/// Splits the header into its timestamp and `v1` signatures
pub fn parse_signature_header(header: &str) -> Result<(i64, Vec<&str>), BillingError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| BillingError::InvalidSignature("invalid timestamp"))?,
                );
            }
            Some(("v1", value)) if !value.is_empty() => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::InvalidSignature("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(BillingError::InvalidSignature("missing v1 signature"));
    }

    Ok((timestamp, signatures))
}

/// Hex HMAC of `"{timestamp}.{payload}"`
pub fn compute_signature(payload: &[u8], timestamp: i64, secret: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks the signature header against the raw body at time `now` (unix)
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> Result<(), BillingError> {
    let (timestamp, signatures) = parse_signature_header(header)?;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECONDS {
        return Err(BillingError::InvalidSignature("timestamp outside tolerance"));
    }

    let expected = compute_signature(payload, timestamp, secret);
    let matched = signatures
        .iter()
        .any(|candidate| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(BillingError::InvalidSignature("signature mismatch"))
    }
}

/// What a webhook means for the account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    CheckoutCompleted {
        customer_id: String,
        subscription_id: Option<String>,
        user_id: Option<Uuid>,
    },
    SubscriptionUpdated {
        customer_id: String,
        subscription_id: String,
        status: String,
        current_period_end: Option<DateTime<Utc>>,
    },
    SubscriptionDeleted {
        customer_id: String,
    },
    PaymentFailed {
        customer_id: String,
    },
    /// Any other event type, acknowledged without action
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub event: BillingEvent,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct CheckoutObject {
    customer: Option<String>,
    subscription: Option<String>,
    client_reference_id: Option<String>,
}

#[derive(Deserialize)]
struct SubscriptionObject {
    id: String,
    customer: String,
    status: String,
    current_period_end: Option<i64>,
}

#[derive(Deserialize)]
struct CustomerRef {
    customer: Option<String>,
}

fn object<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, BillingError> {
    serde_json::from_value(value).map_err(|e| BillingError::MalformedEvent(e.to_string()))
}

fn require_customer(customer: Option<String>) -> Result<String, BillingError> {
    customer.ok_or_else(|| BillingError::MalformedEvent("event has no customer".to_string()))
}

/// Parses a verified webhook body
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, BillingError> {
    let raw: RawEvent =
        serde_json::from_slice(payload).map_err(|e| BillingError::MalformedEvent(e.to_string()))?;

    let event = match raw.event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutObject = object(raw.data.object)?;
            BillingEvent::CheckoutCompleted {
                customer_id: require_customer(session.customer)?,
                subscription_id: session.subscription,
                user_id: session
                    .client_reference_id
                    .as_deref()
                    .and_then(|id| Uuid::parse_str(id).ok()),
            }
        }
        "customer.subscription.updated" | "customer.subscription.created" => {
            let sub: SubscriptionObject = object(raw.data.object)?;
            BillingEvent::SubscriptionUpdated {
                customer_id: sub.customer,
                subscription_id: sub.id,
                status: sub.status,
                current_period_end: sub
                    .current_period_end
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            }
        }
        "customer.subscription.deleted" => {
            let sub: CustomerRef = object(raw.data.object)?;
            BillingEvent::SubscriptionDeleted {
                customer_id: require_customer(sub.customer)?,
            }
        }
        "invoice.payment_failed" => {
            let invoice: CustomerRef = object(raw.data.object)?;
            BillingEvent::PaymentFailed {
                customer_id: require_customer(invoice.customer)?,
            }
        }
        _ => BillingEvent::Ignored,
    };

    Ok(WebhookEvent {
        id: raw.id,
        event_type: raw.event_type,
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;

    fn signed_header(payload: &[u8], timestamp: i64) -> String {
        format!("t={},v1={}", timestamp, compute_signature(payload, timestamp, SECRET))
    }

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = signed_header(payload, NOW - 10);
        assert!(verify_signature(payload, &header, SECRET, NOW).is_ok());
    }

    #[test]
    fn test_any_v1_may_match() {
        let payload = br#"{"id":"evt_1"}"#;
        let good = compute_signature(payload, NOW, SECRET);
        let header = format!("t={},v1=deadbeef,v1={}", NOW, good);
        assert!(verify_signature(payload, &header, SECRET, NOW).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = signed_header(br#"{"amount":100}"#, NOW);
        let result = verify_signature(br#"{"amount":999}"#, &header, SECRET, NOW);
        assert!(matches!(result, Err(BillingError::InvalidSignature("signature mismatch"))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"{}";
        let header = format!("t={},v1={}", NOW, compute_signature(payload, NOW, "other"));
        assert!(verify_signature(payload, &header, SECRET, NOW).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = b"{}";
        let header = signed_header(payload, NOW - SIGNATURE_TOLERANCE_SECONDS - 1);
        let result = verify_signature(payload, &header, SECRET, NOW);
        assert!(matches!(result, Err(BillingError::InvalidSignature("timestamp outside tolerance"))));

        let header = signed_header(payload, NOW - SIGNATURE_TOLERANCE_SECONDS);
        assert!(verify_signature(payload, &header, SECRET, NOW).is_ok());
    }

    #[test]
    fn test_malformed_header() {
        assert!(parse_signature_header("garbage").is_err());
        assert!(parse_signature_header("t=abc,v1=00").is_err());
        assert!(parse_signature_header("t=1").is_err());
        assert!(parse_signature_header("v1=00").is_err());
    }

    #[test]
    fn test_parse_checkout_completed() {
        let user_id = Uuid::new_v4();
        let payload = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "customer": "cus_1",
                "subscription": "sub_1",
                "client_reference_id": user_id.to_string()
            }}
        });

        let event = parse_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(
            event.event,
            BillingEvent::CheckoutCompleted {
                customer_id: "cus_1".to_string(),
                subscription_id: Some("sub_1".to_string()),
                user_id: Some(user_id),
            }
        );
    }

    #[test]
    fn test_parse_subscription_updated() {
        let payload = json!({
            "id": "evt_2",
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_1",
                "customer": "cus_1",
                "status": "past_due",
                "current_period_end": 1_700_086_400
            }}
        });

        let event = parse_event(payload.to_string().as_bytes()).unwrap();
        match event.event {
            BillingEvent::SubscriptionUpdated { status, current_period_end, .. } => {
                assert_eq!(status, "past_due");
                assert_eq!(current_period_end.unwrap().timestamp(), 1_700_086_400);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_event_is_ignored() {
        let payload = json!({ "id": "evt_3", "type": "charge.refunded", "data": { "object": {} } });
        let event = parse_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.event, BillingEvent::Ignored);
        assert_eq!(event.event_type, "charge.refunded");
    }

    #[test]
    fn test_parse_rejects_missing_customer() {
        let payload = json!({ "id": "evt_4", "type": "invoice.payment_failed", "data": { "object": {} } });
        assert!(matches!(
            parse_event(payload.to_string().as_bytes()),
            Err(BillingError::MalformedEvent(_))
        ));
    }
}
