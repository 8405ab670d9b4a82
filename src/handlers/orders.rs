use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response},
    services::orders::{CreateOrderRequest, OrderResponse},
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

/// POST /api/v1/orders
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = OrderResponse),
        (status = 400, description = "Unknown product, insufficient stock or invalid input", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.orders.create_order(&user.user_id, request).await?;
    Ok(created_response(order))
}

/// GET /api/v1/orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    responses(
        (status = 200, description = "The caller's orders, newest first"),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state.orders.list_orders(&user.user_id).await?;
    Ok(success_response(orders))
}

/// GET /api/v1/orders/:id
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order detail", body = OrderResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
        (status = 404, description = "No such order for this user", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.orders.get_order(&user.user_id, order_id).await?;
    Ok(success_response(order))
}
