use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::success_response,
    services::checkout::{CheckoutSessionResponse, CreateCheckoutSessionRequest},
    AppState,
};
use axum::{extract::State, response::IntoResponse, Json};

/// POST /api/v1/checkout/session
#[utoipa::path(
    post,
    path = "/api/v1/checkout/session",
    request_body = CreateCheckoutSessionRequest,
    responses(
        (status = 200, description = "Hosted payment session created", body = CheckoutSessionResponse),
        (status = 400, description = "Unknown product, insufficient stock or invalid input", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
        (status = 500, description = "Payment provider not configured", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateCheckoutSessionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let session = state.checkout.create_session(&user, request).await?;
    Ok(success_response(session))
}
