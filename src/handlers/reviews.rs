use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response},
    services::reviews::{ReviewResponse, SubmitReviewRequest},
    AppState,
};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ReviewListParams {
    pub product_id: Uuid,
}

/// GET /api/v1/reviews
#[utoipa::path(
    get,
    path = "/api/v1/reviews",
    params(ReviewListParams),
    responses(
        (status = 200, description = "Reviews for the product, newest first", body = [ReviewResponse]),
        (status = 400, description = "Missing or invalid product id", body = crate::errors::ErrorResponse),
    ),
    tag = "Reviews"
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Query(params): Query<ReviewListParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let reviews = state.reviews.list_reviews(params.product_id).await?;
    Ok(success_response(reviews))
}

/// POST /api/v1/reviews
#[utoipa::path(
    post,
    path = "/api/v1/reviews",
    request_body = SubmitReviewRequest,
    responses(
        (status = 201, description = "Review created", body = ReviewResponse),
        (status = 200, description = "Existing review updated", body = ReviewResponse),
        (status = 400, description = "Unknown product or rating out of range", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Reviews"
)]
pub async fn submit_review(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SubmitReviewRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let (review, created) = state.reviews.submit_review(&user.user_id, request).await?;
    Ok(if created {
        created_response(review)
    } else {
        success_response(review)
    })
}
