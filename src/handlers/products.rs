use crate::{
    entities::product,
    errors::ServiceError,
    handlers::common::{success_response, PaginatedResponse, PaginationParams},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProductListParams {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub featured: Option<bool>,
    pub category_id: Option<Uuid>,
}

/// GET /api/v1/products
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductListParams),
    responses(
        (status = 200, description = "Paginated product listing"),
    ),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<ProductListParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let defaults = PaginationParams::default();
    let page = params.page.unwrap_or(defaults.page);
    let per_page = params.limit.unwrap_or(defaults.per_page);

    let (products, total) = state
        .products
        .list_products(page, per_page, params.featured, params.category_id)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        products, page, per_page, total,
    )))
}

/// GET /api/v1/products/:slug
#[utoipa::path(
    get,
    path = "/api/v1/products/{slug}",
    params(("slug" = String, Path, description = "Product slug")),
    responses(
        (status = 200, description = "Product detail", body = product::Model),
        (status = 404, description = "Unknown slug", body = crate::errors::ErrorResponse),
    ),
    tag = "Products"
)]
pub async fn get_product_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.products.get_product_by_slug(&slug).await?;
    Ok(success_response(product))
}
