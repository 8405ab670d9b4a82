mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn global_limit_rejects_the_excess_request() {
    let app = TestApp::new_with(|cfg| cfg.rate_limit_requests = 3).await;

    for _ in 0..3 {
        let response = app
            .request_raw(
                Method::GET,
                "/api/v1/products",
                Vec::new(),
                &[("x-forwarded-for", "203.0.113.7")],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .request_raw(
            Method::GET,
            "/api/v1/products",
            Vec::new(),
            &[("x-forwarded-for", "203.0.113.7")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get("X-RateLimit-Remaining").unwrap(),
        "0"
    );
    assert!(response.headers().contains_key("Retry-After"));

    let body = body_json(response).await;
    assert_eq!(
        body,
        json!({ "success": false, "error": "Rate limit exceeded" })
    );
}

#[tokio::test]
async fn callers_are_limited_independently() {
    let app = TestApp::new_with(|cfg| cfg.rate_limit_requests = 1).await;

    let first = app
        .request_raw(
            Method::GET,
            "/api/v1/products",
            Vec::new(),
            &[("x-forwarded-for", "203.0.113.1")],
        )
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    let other_caller = app
        .request_raw(
            Method::GET,
            "/api/v1/products",
            Vec::new(),
            &[("x-forwarded-for", "203.0.113.2")],
        )
        .await;
    assert_eq!(other_caller.status(), StatusCode::OK);

    let exhausted = app
        .request_raw(
            Method::GET,
            "/api/v1/products",
            Vec::new(),
            &[("x-forwarded-for", "203.0.113.1")],
        )
        .await;
    assert_eq!(exhausted.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn path_policy_overrides_the_global_limit() {
    let app = TestApp::new_with(|cfg| {
        cfg.rate_limit_requests = 100;
        cfg.rate_limit_path_policies = Some("/api/v1/checkout:1:60".to_string());
    })
    .await;

    let body = Some(json!({ "items": [] }));
    let first = app
        .request_authenticated(Method::POST, "/api/v1/checkout/session", body.clone())
        .await;
    // Empty cart fails validation, but the request still consumed the budget.
    assert_ne!(first.status(), StatusCode::TOO_MANY_REQUESTS);

    let second = app
        .request_authenticated(Method::POST, "/api/v1/checkout/session", body)
        .await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn health_endpoint_is_exempt() {
    let app = TestApp::new_with(|cfg| cfg.rate_limit_requests = 1).await;

    for _ in 0..5 {
        let response = app.request(Method::GET, "/health", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn successful_responses_carry_rate_limit_headers() {
    let app = TestApp::new_with(|cfg| cfg.rate_limit_requests = 10).await;

    let response = app
        .request_raw(
            Method::GET,
            "/api/v1/products",
            Vec::new(),
            &[("x-forwarded-for", "203.0.113.9")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("X-RateLimit-Limit").unwrap(), "10");
    assert_eq!(
        response.headers().get("X-RateLimit-Remaining").unwrap(),
        "9"
    );
}
