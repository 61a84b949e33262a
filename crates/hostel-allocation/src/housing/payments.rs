//! Payment gateway seam and webhook authentication.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha512;
use subtle::ConstantTimeEq;

use super::error::HousingError;
use super::settings::normalize_date_setting;

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Request sent to the gateway to start a card checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    /// Minor units (kobo).
    pub amount: u64,
    pub reference: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
    pub demo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeOutcome {
    Success,
    Failed,
    Pending,
}

/// Gateway answer to a verification query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub outcome: ChargeOutcome,
    pub paid_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
    pub message: Option<String>,
}

pub trait PaymentGateway: Send + Sync {
    fn initialize(&self, request: &InitializeRequest) -> Result<Authorization, GatewayError>;

    fn verify(&self, reference: &str) -> Result<Verification, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
    #[error("payment gateway rejected the request: {0}")]
    Rejected(String),
}

/// Gateway used when no live secret key is configured. Checkout links point at
/// the frontend's demo page and every verification succeeds.
#[derive(Debug, Clone)]
pub struct DemoGateway {
    frontend_url: String,
}

impl DemoGateway {
    pub fn new(frontend_url: impl Into<String>) -> Self {
        Self {
            frontend_url: frontend_url.into(),
        }
    }
}

impl PaymentGateway for DemoGateway {
    fn initialize(&self, request: &InitializeRequest) -> Result<Authorization, GatewayError> {
        Ok(Authorization {
            authorization_url: format!(
                "{}/dashboard/payments/demo?reference={}&amount={}",
                self.frontend_url.trim_end_matches('/'),
                request.reference,
                request.amount
            ),
            access_code: "DEMO_ACCESS_CODE".to_string(),
            reference: request.reference.clone(),
            demo: true,
        })
    }

    fn verify(&self, reference: &str) -> Result<Verification, GatewayError> {
        Ok(Verification {
            outcome: ChargeOutcome::Success,
            paid_at: None,
            transaction_id: Some(format!("DEMO-{reference}")),
            message: Some("Approved (demo)".to_string()),
        })
    }
}

/// Hex HMAC-SHA512 of `body` keyed with `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, HousingError> {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).map_err(|_| HousingError::Signature)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a webhook signature header against the raw body in constant time.
/// A blank secret authenticates nothing: anyone can compute HMAC with an empty key.
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), HousingError> {
    if secret.trim().is_empty() {
        return Err(HousingError::Signature);
    }
    let provided = signature
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(HousingError::Signature)?;
    let provided = hex::decode(provided.to_ascii_lowercase()).map_err(|_| HousingError::Signature)?;
    let expected = hex::decode(sign_payload(secret, body)?).map_err(|_| HousingError::Signature)?;

    if provided.len() != expected.len() {
        return Err(HousingError::Signature);
    }
    if bool::from(expected.ct_eq(provided.as_slice())) {
        Ok(())
    } else {
        Err(HousingError::Signature)
    }
}

/// Charge details carried by `charge.*` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeEvent {
    pub reference: String,
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    ChargeSuccess(ChargeEvent),
    ChargeFailed(ChargeEvent),
    Unhandled(String),
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl WebhookEvent {
    /// Parse an already-authenticated webhook body.
    pub fn parse(body: &[u8]) -> Result<Self, HousingError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|err| HousingError::validation(format!("malformed webhook body: {err}")))?;

        match envelope.event.as_str() {
            "charge.success" => Ok(Self::ChargeSuccess(charge_event(&envelope.data)?)),
            "charge.failed" => Ok(Self::ChargeFailed(charge_event(&envelope.data)?)),
            _ => Ok(Self::Unhandled(envelope.event)),
        }
    }
}

fn charge_event(data: &Value) -> Result<ChargeEvent, HousingError> {
    let reference = data
        .get("reference")
        .and_then(Value::as_str)
        .filter(|reference| !reference.is_empty())
        .ok_or_else(|| HousingError::validation("webhook charge is missing a reference"))?;

    let transaction_id = match data.get("id") {
        Some(Value::Number(id)) => Some(id.to_string()),
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        _ => None,
    };

    let message = ["message", "gateway_response"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .map(str::to_string);

    Ok(ChargeEvent {
        reference: reference.to_string(),
        transaction_id,
        paid_at: data.get("paid_at").and_then(normalize_date_setting),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signatures_round_trip_and_reject_tampering() {
        let body = br#"{"event":"charge.success","data":{"reference":"HSTL-1"}}"#;
        let signature = sign_payload("sk_test_secret", body).expect("signs");
        assert_eq!(signature.len(), 128);

        assert!(verify_signature("sk_test_secret", body, Some(&signature)).is_ok());
        assert!(verify_signature("sk_test_secret", body, Some(&signature.to_uppercase())).is_ok());
        assert!(matches!(
            verify_signature("other", body, Some(&signature)),
            Err(HousingError::Signature)
        ));
        assert!(matches!(
            verify_signature("sk_test_secret", b"{}", Some(&signature)),
            Err(HousingError::Signature)
        ));
    }

    #[test]
    fn blank_secret_rejects_even_matching_signatures() {
        let body = br#"{"event":"charge.success","data":{"reference":"HSTL-1"}}"#;
        for secret in ["", "   "] {
            let forged = sign_payload(secret, body).expect("hmac accepts any key length");
            assert!(matches!(
                verify_signature(secret, body, Some(&forged)),
                Err(HousingError::Signature)
            ));
        }
    }

    #[test]
    fn missing_or_malformed_signatures_are_rejected() {
        assert!(verify_signature("secret", b"{}", None).is_err());
        assert!(verify_signature("secret", b"{}", Some("  ")).is_err());
        assert!(verify_signature("secret", b"{}", Some("not-hex")).is_err());
        assert!(verify_signature("secret", b"{}", Some("abcd")).is_err());
    }

    #[test]
    fn charge_events_are_parsed() {
        let body = json!({
            "event": "charge.success",
            "data": {
                "id": 302961,
                "reference": "HSTL-1",
                "paid_at": "2025-10-12T00:50:00.000Z",
                "gateway_response": "Approved"
            }
        });
        let event = WebhookEvent::parse(body.to_string().as_bytes()).expect("parses");
        let WebhookEvent::ChargeSuccess(charge) = event else {
            panic!("expected charge.success");
        };
        assert_eq!(charge.reference, "HSTL-1");
        assert_eq!(charge.transaction_id.as_deref(), Some("302961"));
        assert_eq!(charge.message.as_deref(), Some("Approved"));
        assert!(charge.paid_at.is_some());
    }

    #[test]
    fn other_events_are_unhandled_and_bad_bodies_fail() {
        let body = json!({ "event": "transfer.success", "data": {} });
        assert_eq!(
            WebhookEvent::parse(body.to_string().as_bytes()).expect("parses"),
            WebhookEvent::Unhandled("transfer.success".to_string())
        );
        assert!(WebhookEvent::parse(b"not json").is_err());

        let missing_reference = json!({ "event": "charge.failed", "data": {} });
        assert!(WebhookEvent::parse(missing_reference.to_string().as_bytes()).is_err());
    }

    #[test]
    fn demo_gateway_links_to_frontend() {
        let gateway = DemoGateway::new("http://localhost:5173/");
        let authorization = gateway
            .initialize(&InitializeRequest {
                email: "ada@example.edu".to_string(),
                amount: 5_000_000,
                reference: "HSTL-1-1".to_string(),
                metadata: BTreeMap::new(),
            })
            .expect("demo initialize");
        assert_eq!(
            authorization.authorization_url,
            "http://localhost:5173/dashboard/payments/demo?reference=HSTL-1-1&amount=5000000"
        );
        assert!(authorization.demo);

        let verification = gateway.verify("HSTL-1-1").expect("demo verify");
        assert_eq!(verification.outcome, ChargeOutcome::Success);
    }
}
