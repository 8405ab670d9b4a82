pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod rate_limiter;
pub mod services;

use crate::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    rate_limiter::{parse_path_policies, RateLimitConfig, RateLimitLayer},
    services::{
        categories::CategoryService, checkout::CheckoutService, newsletter::NewsletterService,
        orders::OrderService, pricing::PricingService, products::ProductService,
        reviews::ReviewService, stripe::StripeClient, webhooks::WebhookLedger,
    },
};
use axum::{
    extract::{FromRef, State},
    http::HeaderValue,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::OpenApi;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub auth_service: Arc<AuthService>,
    pub event_sender: EventSender,
    pub products: ProductService,
    pub categories: CategoryService,
    pub reviews: ReviewService,
    pub newsletter: NewsletterService,
    pub orders: OrderService,
    pub checkout: Arc<CheckoutService>,
    pub webhook_ledger: WebhookLedger,
}

impl AppState {
    pub fn new(db: Arc<DbPool>, config: Arc<AppConfig>, event_sender: EventSender) -> Self {
        let auth_service = Arc::new(AuthService::new(AuthConfig::new(
            config.jwt_secret.clone(),
            Duration::from_secs(config.jwt_expiration),
        )));

        let stripe = config.stripe_secret_key.clone().map(|key| {
            Arc::new(StripeClient::new(key, config.stripe_api_base.clone()))
        });

        let pricing = PricingService::new(db.clone());
        let checkout = Arc::new(CheckoutService::new(
            pricing,
            stripe,
            config.checkout_origins(),
            config.default_origin.clone(),
        ));

        Self {
            products: ProductService::new(db.clone()),
            categories: CategoryService::new(db.clone()),
            reviews: ReviewService::new(db.clone()),
            newsletter: NewsletterService::new(db.clone()),
            orders: OrderService::new(db.clone(), event_sender.clone()),
            checkout,
            webhook_ledger: WebhookLedger::new(db.clone()),
            auth_service,
            event_sender,
            db,
            config,
        }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth_service.clone()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::products::list_products,
        handlers::products::get_product_by_slug,
        handlers::categories::list_categories,
        handlers::reviews::list_reviews,
        handlers::reviews::submit_review,
        handlers::newsletter::subscribe,
        handlers::orders::create_order,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::checkout::create_checkout_session,
        handlers::webhooks::stripe_webhook,
    ),
    components(schemas(
        errors::ErrorResponse,
        entities::product::Model,
        entities::order::OrderStatus,
        services::pricing::LineItemInput,
        services::pricing::LineItemSnapshot,
        services::orders::ShippingAddress,
        services::orders::CreateOrderRequest,
        services::orders::OrderItemResponse,
        services::orders::OrderResponse,
        services::checkout::CreateCheckoutSessionRequest,
        services::checkout::CheckoutSessionResponse,
        services::categories::CategoryResponse,
        services::reviews::SubmitReviewRequest,
        services::reviews::ReviewResponse,
        services::newsletter::SubscribeRequest,
        services::newsletter::SubscriptionResponse,
    )),
    tags(
        (name = "Products", description = "Catalog browsing"),
        (name = "Categories", description = "Catalog categories"),
        (name = "Reviews", description = "Product reviews"),
        (name = "Newsletter", description = "Email subscriptions"),
        (name = "Orders", description = "Order placement and history"),
        (name = "Checkout", description = "Hosted payment sessions"),
        (name = "Webhooks", description = "Payment provider callbacks"),
    )
)]
pub struct ApiDoc;

/// GET /health — liveness plus a database ping.
async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    state.db.ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    match config.cors_allowed_origins.as_deref() {
        Some(raw) => {
            let origins: Vec<HeaderValue> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| match s.parse::<HeaderValue>() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        warn!(origin = %s, "Ignoring unparsable CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(tower_http::cors::AllowOrigin::list(origins))
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any)
        }
        None => CorsLayer::permissive(),
    }
}

/// Rate-limit layer assembled from configuration, sharing the limiter store
/// with the background cleanup task.
pub fn build_rate_limit_layer(config: &AppConfig, auth_service: Arc<AuthService>) -> RateLimitLayer {
    let mut layer = RateLimitLayer::new(RateLimitConfig {
        requests_per_window: config.rate_limit_requests,
        window_duration: Duration::from_secs(config.rate_limit_window_secs),
        enable_headers: true,
    })
    .with_auth_service(auth_service);

    if let Some(specs) = config.rate_limit_path_policies.as_deref() {
        let (policies, warnings) = parse_path_policies(specs);
        for warning in warnings {
            warn!("{warning}");
        }
        layer = layer.with_policies(policies);
    }

    layer
}

/// Builds the application router with all middleware attached.
pub fn create_router(state: AppState, rate_limit: RateLimitLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_spec))
        .route("/api/v1/products", get(handlers::products::list_products))
        .route(
            "/api/v1/products/:slug",
            get(handlers::products::get_product_by_slug),
        )
        .route(
            "/api/v1/categories",
            get(handlers::categories::list_categories),
        )
        .route(
            "/api/v1/reviews",
            get(handlers::reviews::list_reviews).post(handlers::reviews::submit_review),
        )
        .route("/api/v1/newsletter", post(handlers::newsletter::subscribe))
        .route(
            "/api/v1/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route("/api/v1/orders/:id", get(handlers::orders::get_order))
        .route(
            "/api/v1/checkout/session",
            post(handlers::checkout::create_checkout_session),
        )
        .route(
            "/api/v1/webhooks/stripe",
            post(handlers::webhooks::stripe_webhook),
        )
        .layer(rate_limit)
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
