use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use maison_api::{
    build_rate_limit_layer,
    config::AppConfig,
    create_router, db,
    entities::product,
    events::{self, EventSender},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret_for_integration_tests";

/// Test harness backed by a throwaway SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    token: String,
    db_file: std::path::PathBuf,
    _event_task: tokio::task::JoinHandle<()>,
}

pub fn test_config(db_url: &str) -> AppConfig {
    AppConfig {
        database_url: db_url.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        jwt_secret: TEST_JWT_SECRET.to_string(),
        jwt_expiration: 3600,
        stripe_secret_key: None,
        stripe_api_base: "https://api.stripe.com".to_string(),
        stripe_webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
        webhook_tolerance_secs: 300,
        webhook_max_payload_bytes: 1024 * 1024,
        webhook_retention_days: 90,
        checkout_allowed_origins: None,
        default_origin: "http://localhost:3000".to_string(),
        rate_limit_requests: 10_000,
        rate_limit_window_secs: 60,
        rate_limit_path_policies: None,
        rate_limit_cleanup_interval_secs: 300,
        cors_allowed_origins: None,
        auto_migrate: true,
        db_max_connections: 1,
        db_min_connections: 1,
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::new_with(|_| {}).await
    }

    /// Construct a test application, letting the caller tweak the
    /// configuration before services are built.
    pub async fn new_with(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let db_file = std::env::temp_dir().join(format!("maison_test_{}.db", Uuid::new_v4()));
        let db_url = format!("sqlite://{}?mode=rwc", db_file.display());

        let mut cfg = test_config(&db_url);
        adjust(&mut cfg);
        let cfg = Arc::new(cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(db_arc, cfg.clone(), event_sender);
        let token = state
            .auth_service
            .generate_token("test-user", Some("test@example.com"), Some("Test User"))
            .expect("generate test token");

        let rate_limit = build_rate_limit_layer(&cfg, state.auth_service.clone());
        let router = create_router(state.clone(), rate_limit);

        Self {
            router,
            state,
            token,
            db_file,
            _event_task: event_task,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Issue a token for another user, for ownership-scoping tests.
    pub fn token_for(&self, user_id: &str) -> String {
        self.state
            .auth_service
            .generate_token(user_id, Some("other@example.com"), None)
            .expect("generate token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {tok}"));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let token = self.token.clone();
        self.request(method, uri, body, Some(&token)).await
    }

    /// Raw-body request with custom headers, for webhook deliveries.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder.body(Body::from(body)).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Insert a catalog product directly.
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        let slug = name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect::<String>();

        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            slug: Set(format!("{slug}-{}", Uuid::new_v4())),
            description: Set(Some("Seeded for integration tests".to_string())),
            price: Set(price),
            compare_at_price: Set(None),
            images: Set(serde_json::json!(["https://cdn.example.com/p.jpg"])),
            stock: Set(stock),
            category_id: Set(None),
            ..Default::default()
        };

        model
            .insert(&*self.state.db)
            .await
            .expect("seed product for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}

/// Reads a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

/// Reads a monetary field that may serialize as a string or a number.
pub fn decimal_of(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected a decimal value, got {other:?}"),
    }
}

/// Builds a valid `Stripe-Signature` header for a payload.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let ts = chrono::Utc::now().timestamp();
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(format!("{ts}.").as_bytes());
    mac.update(payload);
    format!("t={ts},v1={}", hex::encode(mac.finalize().into_bytes()))
}
