use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::{
        orders::FREE_SHIPPING_THRESHOLD,
        pricing::{LineItemInput, PricingService},
        stripe::{to_minor_units, SessionLineItem, SessionParams, StripeClient},
    },
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCheckoutSessionRequest {
    #[validate(length(min = 1, message = "Cart must contain at least one item"))]
    pub items: Vec<LineItemInput>,
    /// Order this session pays for, carried through to webhook metadata
    pub order_id: Option<Uuid>,
    /// Storefront origin requesting the session; must be on the allow-list
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub url: Option<String>,
}

/// Builds hosted payment sessions. Prices come from the catalog via the
/// pricing validator; the client only ever supplies product ids and
/// quantities.
pub struct CheckoutService {
    pricing: PricingService,
    stripe: Option<Arc<StripeClient>>,
    allowed_origins: Vec<String>,
    default_origin: String,
}

impl CheckoutService {
    pub fn new(
        pricing: PricingService,
        stripe: Option<Arc<StripeClient>>,
        allowed_origins: Vec<String>,
        default_origin: String,
    ) -> Self {
        Self {
            pricing,
            stripe,
            allowed_origins,
            default_origin,
        }
    }

    fn resolve_origin(&self, requested: Option<&str>) -> String {
        resolve_origin(&self.allowed_origins, &self.default_origin, requested)
    }

    #[instrument(skip(self, request), fields(user_id = %user.user_id))]
    pub async fn create_session(
        &self,
        user: &AuthUser,
        request: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSessionResponse, ServiceError> {
        request.validate()?;

        let stripe = self.stripe.as_ref().ok_or_else(|| {
            ServiceError::ConfigurationError("Payment provider is not configured".to_string())
        })?;

        let email = user.email.clone().ok_or_else(|| {
            ServiceError::Unauthorized("An account email is required for checkout".to_string())
        })?;

        let cart = self.pricing.validate_cart(&request.items).await?;

        let mut line_items = Vec::with_capacity(cart.items.len());
        for line in &cart.items {
            line_items.push(SessionLineItem {
                name: line.name.clone(),
                image: line.image.clone(),
                unit_amount: to_minor_units(line.price)?,
                quantity: i64::from(line.quantity),
            });
        }

        let origin = self.resolve_origin(request.origin.as_deref());
        let product_ids = cart
            .items
            .iter()
            .map(|l| l.product_id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut metadata = vec![
            ("user_id".to_string(), user.user_id.clone()),
            ("product_ids".to_string(), product_ids),
        ];
        if let Some(order_id) = request.order_id {
            metadata.push(("order_id".to_string(), order_id.to_string()));
        }

        let params = SessionParams {
            line_items,
            customer_email: email,
            success_url: format!("{origin}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{origin}/panier"),
            metadata,
            free_shipping: cart.subtotal >= FREE_SHIPPING_THRESHOLD,
        };

        let session = stripe.create_checkout_session(&params).await?;
        info!(session_id = %session.id, subtotal = %cart.subtotal, "Checkout session created");

        Ok(CheckoutSessionResponse {
            session_id: session.id,
            url: session.url,
        })
    }
}

/// Redirect URLs are always built from a vetted origin: a requested origin
/// not on the allow-list silently falls back to the default.
fn resolve_origin(allowed: &[String], default: &str, requested: Option<&str>) -> String {
    match requested {
        Some(o) if allowed.iter().any(|a| a == o) => o.to_string(),
        Some(o) => {
            warn!(origin = %o, "Origin not allow-listed, using default");
            default.to_string()
        }
        None => default.to_string(),
    }
}
