use crate::{
    errors::ServiceError, handlers::common::success_response,
    services::categories::CategoryResponse, AppState,
};
use axum::{extract::State, response::IntoResponse};

/// GET /api/v1/categories
#[utoipa::path(
    get,
    path = "/api/v1/categories",
    responses(
        (status = 200, description = "All categories with active-product counts", body = [CategoryResponse]),
    ),
    tag = "Categories"
)]
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let categories = state.categories.list_categories().await?;
    Ok(success_response(categories))
}
