use crate::{
    errors::ServiceError,
    handlers::common::created_response,
    services::newsletter::{SubscribeRequest, SubscriptionResponse},
    AppState,
};
use axum::{extract::State, response::IntoResponse, Json};

/// POST /api/v1/newsletter
#[utoipa::path(
    post,
    path = "/api/v1/newsletter",
    request_body = SubscribeRequest,
    responses(
        (status = 201, description = "Subscription stored", body = SubscriptionResponse),
        (status = 400, description = "Invalid email or already subscribed", body = crate::errors::ErrorResponse),
    ),
    tag = "Newsletter"
)]
pub async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let subscription = state.newsletter.subscribe(request).await?;
    Ok(created_response(subscription))
}
