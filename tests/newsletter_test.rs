mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};
use sea_orm::EntityTrait;
use serde_json::json;

#[tokio::test]
async fn subscribing_stores_the_normalized_email() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/newsletter",
            Some(json!({ "email": "Claire.Martin@Example.com " })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["email"], json!("claire.martin@example.com"));

    let subscribers = maison_api::entities::newsletter_subscriber::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(subscribers.len(), 1);
    assert_eq!(subscribers[0].email, "claire.martin@example.com");
}

#[tokio::test]
async fn duplicate_subscription_is_rejected() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/newsletter",
            Some(json!({ "email": "claire@example.com" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Same address, different casing.
    let response = app
        .request(
            Method::POST,
            "/api/v1/newsletter",
            Some(json!({ "email": "CLAIRE@example.com" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("already subscribed"));

    let subscribers = maison_api::entities::newsletter_subscriber::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(subscribers.len(), 1);
}

#[tokio::test]
async fn invalid_email_is_rejected() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/newsletter",
            Some(json!({ "email": "not-an-email" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let subscribers = maison_api::entities::newsletter_subscriber::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    assert!(subscribers.is_empty());
}
