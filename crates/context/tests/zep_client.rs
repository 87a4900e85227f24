//! Memory client against a throwaway server speaking the Zep graph format

use axum::{
    extract::Json,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use flowllm_common::config::MemoryConfig;
use flowllm_context::{MemoryStore, ZepMemoryStore};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn store(base: String) -> ZepMemoryStore {
    let config = MemoryConfig {
        api_base: base,
        timeout_secs: 5,
        ..Default::default()
    };
    ZepMemoryStore::new("zep-key".into(), &config)
}

#[tokio::test]
async fn search_is_scoped_to_the_caller() {
    let app = Router::new().route(
        "/graph/search",
        post(|headers: HeaderMap, Json(body): Json<Value>| async move {
            assert_eq!(headers["authorization"], "Api-Key zep-key");
            assert_eq!(body["user_id"], "alice");
            assert_eq!(body["scope"], "edges");
            Json(json!({
                "edges": [
                    {"fact": "Alice prefers green tea"},
                    {"fact": "  "},
                    {"name": "no fact here"},
                    {"fact": "Alice lives in Lisbon"}
                ]
            }))
        }),
    );
    let base = spawn(app).await;

    let facts = assert_ok!(store(base).search("alice", "drinks", 5).await);
    assert_eq!(facts, vec!["Alice prefers green tea", "Alice lives in Lisbon"]);
}

#[tokio::test]
async fn add_fact_posts_text_episode() {
    let app = Router::new().route(
        "/graph",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["user_id"], "alice");
            assert_eq!(body["type"], "text");
            assert_eq!(body["data"], "User has a new memory: likes chess");
            StatusCode::CREATED
        }),
    );
    let base = spawn(app).await;

    assert_ok!(store(base).add_fact("alice", "User has a new memory: likes chess").await);
}

#[tokio::test]
async fn upstream_failure_is_an_error() {
    let app = Router::new().route(
        "/graph/search",
        post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
    );
    let base = spawn(app).await;

    assert_err!(store(base).search("alice", "anything", 5).await);
}
