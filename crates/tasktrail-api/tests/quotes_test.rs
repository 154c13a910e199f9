//! Integration tests for the quote routes.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test(migrations = "../../migrations")]
async fn test_random_quote_on_empty_store_returns_404(pool: PgPool) {
    let app = common::build_test_app(pool);

    let (status, json) = common::get_json(app, "/api/v1/quotes/random").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_create_then_random_returns_the_quote(pool: PgPool) {
    let (status, json) = common::post_json(
        common::build_test_app(pool.clone()),
        "/api/v1/quotes",
        &json!({ "quote": "  Make it work, make it right, make it fast.  " }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["event"], "created");
    assert_eq!(json["version"], 0);

    let (status, json) =
        common::get_json(common::build_test_app(pool), "/api/v1/quotes/random").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["quote"], "Make it work, make it right, make it fast.");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_list_quotes_defaults_to_first_page(pool: PgPool) {
    for quote in ["One", "Two"] {
        let (status, _) = common::post_json(
            common::build_test_app(pool.clone()),
            "/api/v1/quotes",
            &json!({ "quote": quote }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, json) = common::get_json(common::build_test_app(pool), "/api/v1/quotes").await;

    assert_eq!(status, StatusCode::OK);
    let quotes: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["quote"].as_str().unwrap())
        .collect();
    assert_eq!(quotes, vec!["One", "Two"]);
}
