//! Rerank client against a throwaway server speaking the Cohere v2 format

use axum::{extract::Json, http::StatusCode, routing::post, Router};
use flowllm_common::config::RerankConfig;
use flowllm_search::{CohereReranker, Reranker};
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

fn config(base: String) -> RerankConfig {
    RerankConfig {
        api_base: base,
        ..Default::default()
    }
}

#[tokio::test]
async fn rerank_parses_results_in_order() {
    let app = Router::new().route(
        "/v2/rerank",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["model"], "rerank-v3.5");
            assert_eq!(body["top_n"], 2);
            assert_eq!(body["documents"].as_array().map(|d| d.len()), Some(3));
            Json(json!({
                "id": "r1",
                "results": [
                    {"index": 2, "relevance_score": 0.97},
                    {"index": 0, "relevance_score": 0.41}
                ]
            }))
        }),
    );
    let base = spawn(app).await;

    let reranker = CohereReranker::new("key".into(), &config(base));
    let docs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let hits = assert_ok!(reranker.rerank("query", &docs, 2).await);

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].index, 2);
    assert_eq!(hits[1].index, 0);
}

#[tokio::test]
async fn rerank_surfaces_upstream_errors() {
    let app = Router::new().route(
        "/v2/rerank",
        post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
    );
    let base = spawn(app).await;

    let reranker = CohereReranker::new("key".into(), &config(base));
    assert_err!(reranker.rerank("q", &["a".to_string()], 1).await);
}
