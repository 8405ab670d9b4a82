use crate::errors::ServiceError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use tracing::{instrument, warn};

/// Countries checkout can ship to.
pub const ALLOWED_SHIPPING_COUNTRIES: [&str; 5] = ["FR", "BE", "CH", "LU", "MC"];

/// A line as sent to the payment provider: label, unit amount in minor
/// currency units (cents) and quantity.
#[derive(Debug, Clone)]
pub struct SessionLineItem {
    pub name: String,
    pub image: Option<String>,
    pub unit_amount: i64,
    pub quantity: i64,
}

/// Parameters for a hosted checkout session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub line_items: Vec<SessionLineItem>,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Opaque key/value pairs echoed back on webhook events
    pub metadata: Vec<(String, String)>,
    /// Whether the free-shipping option should be offered
    pub free_shipping: bool,
}

/// Subset of the session object we consume.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

/// Thin client for the payment provider's REST API. Requests are
/// form-encoded with bracketed array keys, authenticated with the secret key
/// as HTTP basic username.
pub struct StripeClient {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

/// Converts a decimal price in major units to integer cents, rounding
/// half-away-from-zero.
pub fn to_minor_units(price: Decimal) -> Result<i64, ServiceError> {
    (price * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError(format!("Price {price} out of range for minor units"))
        })
}

impl StripeClient {
    pub fn new(secret_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Creates a hosted checkout session and returns its id and redirect URL.
    #[instrument(skip(self, params), fields(lines = params.line_items.len()))]
    pub async fn create_checkout_session(
        &self,
        params: &SessionParams,
    ) -> Result<CheckoutSession, ServiceError> {
        let form = build_session_form(params);
        let url = format!("{}/v1/checkout/sessions", self.base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.secret_key, Some(""))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("Payment provider unreachable: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.message.or(b.error.error_type))
                .unwrap_or_else(|| "no error detail".to_string());
            warn!(%status, %detail, "Checkout session creation rejected");
            return Err(ServiceError::ExternalServiceError(format!(
                "Payment provider returned {status}"
            )));
        }

        response
            .json::<CheckoutSession>()
            .await
            .map_err(|e| ServiceError::SerializationError(format!("Malformed session: {e}")))
    }
}

/// Flattens session parameters into the provider's bracketed form encoding.
fn build_session_form(params: &SessionParams) -> Vec<(String, String)> {
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("payment_method_types[0]".into(), "card".into()),
        ("customer_email".into(), params.customer_email.clone()),
        ("success_url".into(), params.success_url.clone()),
        ("cancel_url".into(), params.cancel_url.clone()),
    ];

    for (i, item) in params.line_items.iter().enumerate() {
        let p = format!("line_items[{i}]");
        form.push((format!("{p}[price_data][currency]"), "eur".into()));
        form.push((
            format!("{p}[price_data][product_data][name]"),
            item.name.clone(),
        ));
        if let Some(image) = &item.image {
            form.push((
                format!("{p}[price_data][product_data][images][0]"),
                image.clone(),
            ));
        }
        form.push((
            format!("{p}[price_data][unit_amount]"),
            item.unit_amount.to_string(),
        ));
        form.push((format!("{p}[quantity]"), item.quantity.to_string()));
    }

    for (i, country) in ALLOWED_SHIPPING_COUNTRIES.iter().enumerate() {
        form.push((
            format!("shipping_address_collection[allowed_countries][{i}]"),
            (*country).into(),
        ));
    }

    // Standard (4.99), express (9.99) and, when earned, free shipping.
    let mut rates: Vec<(&str, i64)> = vec![("Livraison standard", 499), ("Livraison express", 999)];
    if params.free_shipping {
        rates.insert(0, ("Livraison offerte", 0));
    }
    for (i, (label, amount)) in rates.iter().enumerate() {
        let p = format!("shipping_options[{i}][shipping_rate_data]");
        form.push((format!("{p}[type]"), "fixed_amount".into()));
        form.push((format!("{p}[fixed_amount][amount]"), amount.to_string()));
        form.push((format!("{p}[fixed_amount][currency]"), "eur".into()));
        form.push((format!("{p}[display_name]"), (*label).into()));
    }

    for (key, value) in &params.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }

    form
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> SessionParams {
        SessionParams {
            line_items: vec![SessionLineItem {
                name: "Vase en céramique".into(),
                image: Some("https://cdn.example.com/vase.jpg".into()),
                unit_amount: 2000,
                quantity: 2,
            }],
            customer_email: "claire@example.com".into(),
            success_url: "https://shop.example.com/checkout/success?session_id={CHECKOUT_SESSION_ID}"
                .into(),
            cancel_url: "https://shop.example.com/panier".into(),
            metadata: vec![("user_id".into(), "user-1".into())],
            free_shipping: false,
        }
    }

    fn get<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn minor_units_conversion() {
        assert_eq!(to_minor_units(dec!(20.00)).unwrap(), 2000);
        assert_eq!(to_minor_units(dec!(12.99)).unwrap(), 1299);
        assert_eq!(to_minor_units(dec!(4.995)).unwrap(), 500);
    }

    #[test]
    fn form_encodes_line_items_with_bracket_keys() {
        let form = build_session_form(&params());
        assert_eq!(get(&form, "mode"), Some("payment"));
        assert_eq!(
            get(&form, "line_items[0][price_data][currency]"),
            Some("eur")
        );
        assert_eq!(
            get(&form, "line_items[0][price_data][product_data][name]"),
            Some("Vase en céramique")
        );
        assert_eq!(
            get(&form, "line_items[0][price_data][unit_amount]"),
            Some("2000")
        );
        assert_eq!(get(&form, "line_items[0][quantity]"), Some("2"));
        assert_eq!(get(&form, "metadata[user_id]"), Some("user-1"));
    }

    #[test]
    fn form_lists_allowed_shipping_countries() {
        let form = build_session_form(&params());
        for (i, country) in ALLOWED_SHIPPING_COUNTRIES.iter().enumerate() {
            assert_eq!(
                get(
                    &form,
                    &format!("shipping_address_collection[allowed_countries][{i}]")
                ),
                Some(*country)
            );
        }
    }

    #[test]
    fn free_shipping_option_appears_only_when_earned() {
        let mut p = params();
        let form = build_session_form(&p);
        assert_eq!(
            get(&form, "shipping_options[0][shipping_rate_data][fixed_amount][amount]"),
            Some("499")
        );

        p.free_shipping = true;
        let form = build_session_form(&p);
        assert_eq!(
            get(&form, "shipping_options[0][shipping_rate_data][fixed_amount][amount]"),
            Some("0")
        );
        assert_eq!(
            get(&form, "shipping_options[1][shipping_rate_data][fixed_amount][amount]"),
            Some("499")
        );
    }
}
