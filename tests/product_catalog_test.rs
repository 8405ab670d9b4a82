mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, decimal_of, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;

#[tokio::test]
async fn lists_products_with_pagination_envelope() {
    let app = TestApp::new().await;
    for i in 0..3 {
        app.seed_product(&format!("Produit {i}"), dec!(10.00), 5)
            .await;
    }

    let response = app
        .request(Method::GET, "/api/v1/products?page=1&limit=2", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["data"]["pagination"]["total"], json!(3));
    assert_eq!(body["data"]["pagination"]["total_pages"], json!(2));
}

#[tokio::test]
async fn featured_filter_narrows_the_listing() {
    let app = TestApp::new().await;
    app.seed_product("Produit ordinaire", dec!(10.00), 5).await;
    let featured = app.seed_product("Produit vedette", dec!(20.00), 5).await;

    let mut active: maison_api::entities::product::ActiveModel = featured.into();
    active.featured = Set(true);
    active.update(&*app.state.db).await.unwrap();

    let response = app
        .request(Method::GET, "/api/v1/products?featured=true", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let items = body["data"]["data"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], json!("Produit vedette"));
}

#[tokio::test]
async fn categories_are_listed_with_active_product_counts() {
    let app = TestApp::new().await;

    let mut category_ids = Vec::new();
    for (name, slug) in [("Luminaires", "luminaires"), ("Textiles", "textiles")] {
        let category = maison_api::entities::category::ActiveModel {
            id: Set(uuid::Uuid::new_v4()),
            name: Set(name.to_string()),
            slug: Set(slug.to_string()),
            description: Set(None),
            image: Set(None),
            ..Default::default()
        }
        .insert(&*app.state.db)
        .await
        .unwrap();
        category_ids.push(category.id);
    }

    for (name, category) in [
        ("Lampadaire arc", category_ids[0]),
        ("Applique globe", category_ids[0]),
        ("Plaid mohair", category_ids[1]),
    ] {
        let product = app.seed_product(name, dec!(40.00), 5).await;
        let mut active: maison_api::entities::product::ActiveModel = product.into();
        active.category_id = Set(Some(category));
        active.update(&*app.state.db).await.unwrap();
    }

    // Inactive products do not count.
    let retired = app.seed_product("Lanterne retirée", dec!(10.00), 5).await;
    let mut active: maison_api::entities::product::ActiveModel = retired.into();
    active.category_id = Set(Some(category_ids[0]));
    active.is_active = Set(false);
    active.update(&*app.state.db).await.unwrap();

    let response = app.request(Method::GET, "/api/v1/categories", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let categories = body["data"].as_array().unwrap();
    assert_eq!(categories.len(), 2);
    // Name ascending.
    assert_eq!(categories[0]["name"], json!("Luminaires"));
    assert_eq!(categories[0]["product_count"], json!(2));
    assert_eq!(categories[1]["name"], json!("Textiles"));
    assert_eq!(categories[1]["product_count"], json!(1));
}

#[tokio::test]
async fn fetches_a_product_by_slug() {
    let app = TestApp::new().await;
    let product = app.seed_product("Lampe laiton", dec!(30.00), 5).await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/products/{}", product.slug),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["name"], json!("Lampe laiton"));
    assert_eq!(decimal_of(&body["data"]["price"]), dec!(30.00));
}

#[tokio::test]
async fn unknown_slug_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api/v1/products/does-not-exist", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn inactive_products_are_hidden() {
    let app = TestApp::new().await;
    let product = app.seed_product("Produit retiré", dec!(10.00), 5).await;
    let slug = product.slug.clone();

    let mut active: maison_api::entities::product::ActiveModel = product.into();
    active.is_active = Set(false);
    active.update(&*app.state.db).await.unwrap();

    let response = app
        .request(Method::GET, &format!("/api/v1/products/{slug}"), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.request(Method::GET, "/api/v1/products", None, None).await;
    let body = body_json(response).await;
    assert_eq!(body["data"]["data"].as_array().map(Vec::len), Some(0));
}
