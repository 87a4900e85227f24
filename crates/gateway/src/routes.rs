//! Router assembly

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::handlers;
use crate::middleware::{
    metrics::track_requests,
    rate_limit::{rate_limit, ApiRateLimiter},
};
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut api_routes = Router::new()
        .route("/chat", post(handlers::chat::chat))
        .route("/conversations", get(handlers::conversations::list_conversations))
        .route(
            "/conversations/{id}",
            get(handlers::conversations::get_conversation)
                .patch(handlers::conversations::rename_conversation)
                .delete(handlers::conversations::delete_conversation),
        )
        .route("/memories", post(handlers::memories::add_memory));

    let limits = &state.config.rate_limit;
    if limits.enabled {
        let limiter = ApiRateLimiter::new(limits.requests_per_second, limits.burst);
        api_routes = api_routes.layer(middleware::from_fn_with_state(limiter, rate_limit));
    }

    // Health endpoints stay outside the rate limit
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .merge(api_routes)
        .layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::build_state;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use flowllm_common::config::AppConfig;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_app() -> (Router, AppState) {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = Some("test-secret".to_string());
        config.embedding.provider = "mock".to_string();
        config.vector.provider = "memory".to_string();
        config.rerank.provider = "none".to_string();
        config.memory.provider = "memory".to_string();
        config.rate_limit.enabled = false;

        let state = build_state(config).await.unwrap();
        (create_router(state.clone()), state)
    }

    fn token(state: &AppState, caller: &str) -> String {
        format!("Bearer {}", state.jwt.generate_token(caller).unwrap())
    }

    fn request(method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn chat_body(conversation: &str, text: &str) -> Value {
        json!({
            "conversationId": conversation,
            "model": "openai/gpt-4.1",
            "messages": [{"role": "user", "content": text}],
            "capabilities": {"chainOfThought": false, "critique": true}
        })
    }

    async fn wait_for_conversation(app: &Router, auth: &str, id: &str) -> Value {
        for _ in 0..50 {
            let response = app
                .clone()
                .oneshot(request(Method::GET, &format!("/conversations/{}", id), Some(auth), None))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                return serde_json::from_str(&body_text(response).await).unwrap();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("conversation {} was never stored", id);
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(request(Method::GET, "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (app, _) = test_app().await;
        let response = app
            .oneshot(request(Method::GET, "/ready", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chat_requires_caller() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(request(Method::POST, "/chat", None, Some(chat_body("c1", "Hello"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_input_before_streaming() {
        let (app, state) = test_app().await;
        let auth = token(&state, "alice");
        let response = app
            .oneshot(request(Method::POST, "/chat", Some(&auth), Some(chat_body("c1", "   "))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_streams_and_persists() {
        let (app, state) = test_app().await;
        let auth = token(&state, "alice");

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/chat", Some(&auth), Some(chat_body("c1", "Hello there"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let body = body_text(response).await;
        assert!(body.contains("event: text-delta"));
        assert!(body.contains("event: done"));
        assert!(!body.contains("event: annotation"));

        let conversation = wait_for_conversation(&app, &auth, "c1").await;
        assert_eq!(conversation["name"], "Hello there");
        assert_eq!(conversation["messages"].as_array().unwrap().len(), 2);
        assert_eq!(conversation["messages"][1]["content"], "Hello there");
        assert!(conversation.get("caller_id").is_none());
    }

    #[tokio::test]
    async fn test_turn_is_stored_once_tracked_turns_drain() {
        let (app, state) = test_app().await;
        let auth = token(&state, "alice");

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/chat", Some(&auth), Some(chat_body("c9", "Remember me"))))
            .await
            .unwrap();
        body_text(response).await;

        state.turns.close();
        state.turns.wait().await;
        assert!(state.turns.is_empty());

        let stored = state.conversations.get_by_id("c9", "alice").await.unwrap();
        assert_eq!(stored.map(|c| c.messages.len()), Some(2));
    }

    #[tokio::test]
    async fn test_conversations_are_caller_scoped() {
        let (app, state) = test_app().await;
        let alice = token(&state, "alice");
        let mallory = token(&state, "mallory");

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/chat", Some(&alice), Some(chat_body("c1", "secret"))))
            .await
            .unwrap();
        body_text(response).await;
        wait_for_conversation(&app, &alice, "c1").await;

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/conversations/c1", Some(&mallory), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(request(Method::DELETE, "/conversations/c1", Some(&mallory), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/conversations", Some(&mallory), None))
            .await
            .unwrap();
        let page: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(page["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let (app, state) = test_app().await;
        let auth = token(&state, "alice");

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/chat", Some(&auth), Some(chat_body("c1", "Hi"))))
            .await
            .unwrap();
        body_text(response).await;
        wait_for_conversation(&app, &auth, "c1").await;

        let response = app
            .clone()
            .oneshot(request(
                Method::PATCH,
                "/conversations/c1",
                Some(&auth),
                Some(json!({"name": "Greetings"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/conversations?limit=5", Some(&auth), None))
            .await
            .unwrap();
        let page: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(page["items"][0]["name"], "Greetings");

        let response = app
            .clone()
            .oneshot(request(Method::DELETE, "/conversations/c1", Some(&auth), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request(Method::GET, "/conversations/c1", Some(&auth), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_offset_is_bounded() {
        let (app, state) = test_app().await;
        let auth = token(&state, "alice");

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/conversations?offset=18446744073709551615",
                Some(&auth),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(request(
                Method::GET,
                "/conversations?offset=9223372036854775807&limit=100",
                Some(&auth),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(page["items"].as_array().unwrap().is_empty());
        assert!(page["next_cursor"].is_null());
    }

    #[tokio::test]
    async fn test_add_memory() {
        let (app, state) = test_app().await;
        let auth = token(&state, "alice");

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/memories",
                Some(&auth),
                Some(json!({"memory": "prefers green tea"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let facts = state.memory.search("alice", "green tea", 10).await.unwrap();
        assert_eq!(facts, vec!["User has a new memory: prefers green tea"]);

        let response = app
            .oneshot(request(Method::POST, "/memories", Some(&auth), Some(json!({"memory": ""}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_excess() {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = Some("test-secret".to_string());
        config.embedding.provider = "mock".to_string();
        config.vector.provider = "memory".to_string();
        config.rerank.provider = "none".to_string();
        config.memory.provider = "memory".to_string();
        config.rate_limit.enabled = true;
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let state = build_state(config).await.unwrap();
        let app = create_router(state.clone());
        let auth = token(&state, "alice");

        let first = app
            .clone()
            .oneshot(request(Method::GET, "/conversations", Some(&auth), None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(request(Method::GET, "/conversations", Some(&auth), None))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
