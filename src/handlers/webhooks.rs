use crate::{errors::ServiceError, AppState};
use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
struct WebhookEventData {
    object: Value,
}

/// POST /api/v1/webhooks/stripe
///
/// Deliveries are verified, size-bounded and deduplicated before any side
/// effect. A replayed event id is acknowledged with `200` without touching
/// any order, so the provider stops retrying.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    request_body = String,
    responses(
        (status = 200, description = "Event accepted (or already processed)"),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse),
        (status = 413, description = "Payload exceeds the size bound", body = crate::errors::ErrorResponse),
        (status = 500, description = "Webhook secret not configured", body = crate::errors::ErrorResponse),
    ),
    tag = "Webhooks"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Fails closed: without a secret no delivery can be authenticated.
    let secret = state
        .config
        .stripe_webhook_secret
        .clone()
        .ok_or_else(|| {
            ServiceError::ConfigurationError("Webhook secret is not configured".to_string())
        })?;

    let max = state.config.webhook_max_payload_bytes;
    if body.len() > max {
        return Err(ServiceError::PayloadTooLarge {
            size: body.len(),
            max,
        });
    }

    verify_stripe_signature(
        &headers,
        &body,
        &secret,
        state.config.webhook_tolerance_secs,
    )?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::InvalidInput(format!("Malformed webhook payload: {e}")))?;

    if state.webhook_ledger.is_event_processed(&event.id).await? {
        info!(event_id = %event.id, "Webhook event already processed");
        return Ok(Json(json!({
            "received": true,
            "status": "already_processed",
        })));
    }

    let metadata = apply_event(&state, &event).await?;
    state
        .webhook_ledger
        .mark_event_processed(&event.id, &event.event_type, metadata)
        .await?;

    Ok(Json(json!({ "received": true })))
}

/// Applies the event's business effect. Returns metadata to store alongside
/// the ledger row. Unrecognized event types are acknowledged and recorded so
/// the provider does not retry them forever.
async fn apply_event(
    state: &AppState,
    event: &WebhookEvent,
) -> Result<Option<Value>, ServiceError> {
    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let object = &event.data.object;
            let payment_id = object
                .get("payment_intent")
                .and_then(Value::as_str)
                .map(str::to_string);
            let order_id = object
                .get("metadata")
                .and_then(|m| m.get("order_id"))
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok());

            match order_id {
                Some(order_id) => {
                    let transitioned = state
                        .orders
                        .mark_order_paid(order_id, payment_id.clone())
                        .await?;
                    Ok(Some(json!({
                        "order_id": order_id,
                        "payment_id": payment_id,
                        "transitioned": transitioned,
                    })))
                }
                None => {
                    warn!(event_id = %event.id, "Completed session without an order_id in metadata");
                    Ok(Some(json!({ "missing_order_id": true })))
                }
            }
        }
        other => {
            info!(event_id = %event.id, event_type = %other, "Unhandled webhook event type");
            Ok(None)
        }
    }
}

/// Verifies a `Stripe-Signature` header: `t=<unix ts>,v1=<hex hmac>`, where
/// the HMAC-SHA256 is computed over `"{t}.{raw body}"`. Timestamps outside
/// the tolerance window are rejected to blunt replay.
fn verify_stripe_signature(
    headers: &HeaderMap,
    payload: &Bytes,
    secret: &str,
    tolerance_secs: u64,
) -> Result<(), ServiceError> {
    let header = headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
        .ok_or(ServiceError::SignatureInvalid)?;

    let mut ts = "";
    let mut v1 = "";
    for part in header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(val)) => ts = val,
            (Some("v1"), Some(val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return Err(ServiceError::SignatureInvalid);
    }

    let ts_i: i64 = ts.parse().map_err(|_| ServiceError::SignatureInvalid)?;
    let now = chrono::Utc::now().timestamp();
    if (now - ts_i).unsigned_abs() > tolerance_secs {
        warn!(timestamp = ts_i, "Webhook timestamp outside tolerance");
        return Err(ServiceError::SignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::SignatureInvalid)?;
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    if constant_time_eq(&expected, v1) {
        Ok(())
    } else {
        Err(ServiceError::SignatureInvalid)
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, ts: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{ts}.").as_bytes());
        mac.update(payload);
        format!("t={ts},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn headers_with(sig: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", sig.parse().unwrap());
        headers
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = Bytes::from_static(b"{\"id\":\"evt_1\"}");
        let now = chrono::Utc::now().timestamp();
        let headers = headers_with(&sign("whsec_test", now, &payload));
        assert!(verify_stripe_signature(&headers, &payload, "whsec_test", 300).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = Bytes::from_static(b"{}");
        let now = chrono::Utc::now().timestamp();
        let headers = headers_with(&sign("whsec_other", now, &payload));
        assert!(matches!(
            verify_stripe_signature(&headers, &payload, "whsec_test", 300),
            Err(ServiceError::SignatureInvalid)
        ));
    }

    #[test]
    fn rejects_tampered_payload() {
        let payload = Bytes::from_static(b"{\"total\":10}");
        let now = chrono::Utc::now().timestamp();
        let headers = headers_with(&sign("whsec_test", now, &payload));
        let tampered = Bytes::from_static(b"{\"total\":99}");
        assert!(verify_stripe_signature(&headers, &tampered, "whsec_test", 300).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = Bytes::from_static(b"{}");
        let stale = chrono::Utc::now().timestamp() - 3600;
        let headers = headers_with(&sign("whsec_test", stale, &payload));
        assert!(verify_stripe_signature(&headers, &payload, "whsec_test", 300).is_err());
    }

    #[test]
    fn rejects_missing_header_parts() {
        let payload = Bytes::from_static(b"{}");
        assert!(verify_stripe_signature(&HeaderMap::new(), &payload, "s", 300).is_err());
        let headers = headers_with("t=123");
        assert!(verify_stripe_signature(&headers, &payload, "s", 300).is_err());
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
