use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use dialogpress_core::EngineError;
use dialogpress_engine::{Engine, SessionRegistry, StatsReport};

// ─── Server state ───────────────────────────────────────────────────────────

pub struct ServerState {
    pub engine: Engine,
    pub sessions: SessionRegistry,
}

// ─── Request / response shapes ──────────────────────────────────────────────

#[derive(Deserialize)]
struct MessageRequest {
    message: String,
    session: Option<String>,
}

#[derive(Deserialize, Default)]
struct SessionQuery {
    session: Option<String>,
}

/// An engine error rendered as `{"status":"error", ...}`.
struct ApiError(EngineError);

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
        EngineError::Quota { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        EngineError::Transient { .. } => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Provider { .. } => StatusCode::BAD_GATEWAY,
        EngineError::InternalState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "kind": self.0.kind(),
            "error": self.0.to_string(),
        });
        (status_for(&self.0), Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

/// Wrap a payload under `key` next to `"status":"ok"`.
fn ok_under<T: Serialize>(key: &str, payload: &T) -> Json<Value> {
    let mut body = json!({ "status": "ok" });
    body[key] = serde_json::to_value(payload).unwrap_or(Value::Null);
    Json(body)
}

/// Merge a payload's fields next to `"status":"ok"`.
fn ok_flat<T: Serialize>(payload: &T) -> Json<Value> {
    let mut body = serde_json::to_value(payload).unwrap_or_else(|_| json!({}));
    if let Some(obj) = body.as_object_mut() {
        obj.insert("status".to_string(), json!("ok"));
    }
    Json(body)
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn post_send_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<Value>, ApiError> {
    let session = state.sessions.get_or_create(body.session.as_deref());
    let outcome = state.engine.send(&session, &body.message).await?;
    Ok(ok_flat(&outcome))
}

async fn post_compare_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<Value>, ApiError> {
    // An unknown session compares against an empty history without being registered.
    let session = state.sessions.get(body.session.as_deref()).unwrap_or_default();
    let comparison = state.engine.compare(&session, &body.message).await?;
    Ok(ok_under("comparison", &comparison))
}

async fn post_clear_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SessionQuery>,
) -> impl IntoResponse {
    if let Some(session) = state.sessions.get(query.session.as_deref()) {
        state.engine.clear(&session).await;
        state.sessions.remove(query.session.as_deref());
    }
    Json(json!({ "status": "ok", "message": "History cleared" }))
}

async fn post_test_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SessionQuery>,
) -> impl IntoResponse {
    let session = state.sessions.get_or_create(query.session.as_deref());
    let report = state.engine.run_test(&session).await;
    ok_under("report", &report)
}

async fn get_stats_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SessionQuery>,
) -> impl IntoResponse {
    let stats = match state.sessions.get(query.session.as_deref()) {
        Some(session) => state.engine.stats(&session).await,
        None => StatsReport::empty(""),
    };
    ok_under("stats", &stats)
}

async fn get_history_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SessionQuery>,
) -> impl IntoResponse {
    let history = match state.sessions.get(query.session.as_deref()) {
        Some(session) => state.engine.history(&session).await,
        None => Vec::new(),
    };
    ok_under("history", &history)
}

// ─── Public API ─────────────────────────────────────────────────────────────

pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/send", post(post_send_handler))
        .route("/api/compare", post(post_compare_handler))
        .route("/api/clear", post(post_clear_handler))
        .route("/api/test", post(post_test_handler))
        .route("/api/stats", get(get_stats_handler))
        .route("/api/history", get(get_history_handler))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server. This blocks until interrupted.
pub fn start_server(engine: Engine, port: u16) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let state = Arc::new(ServerState {
            engine,
            sessions: SessionRegistry::new(),
        });
        let app = router(state);

        let bind_addr = format!("0.0.0.0:{}", port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        info!(port, "http server listening");

        println!(
            "{}",
            format!("dialogpress running at http://localhost:{}", port)
                .green()
                .bold()
        );
        println!(
            "  API: {}",
            format!("http://localhost:{}/api/send", port).bright_white()
        );
        println!("  {}", "(Ctrl+C to stop)".dimmed());

        axum::serve(listener, app).await?;

        Ok::<_, anyhow::Error>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use dialogpress_core::types::{PromptMessage, Settings};
    use dialogpress_engine::{Completion, InvokeParams, LlmClient};

    /// Replies "ok" unless an error is queued.
    #[derive(Default)]
    struct StubClient {
        errors: Mutex<VecDeque<EngineError>>,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        async fn invoke(
            &self,
            messages: &[PromptMessage],
            _params: &InvokeParams,
        ) -> dialogpress_core::Result<Completion> {
            if let Some(e) = self.errors.lock().unwrap().pop_front() {
                return Err(e);
            }
            Ok(Completion {
                text: "ok".to_string(),
                input_tokens: messages.len() as u64 * 10,
                output_tokens: 2,
                elapsed_ms: 1,
            })
        }
    }

    async fn spawn(client: Arc<StubClient>) -> String {
        spawn_with_state(client).await.0
    }

    async fn spawn_with_state(client: Arc<StubClient>) -> (String, Arc<ServerState>) {
        let state = Arc::new(ServerState {
            engine: Engine::new(client, Settings::default()),
            sessions: SessionRegistry::new(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), state)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&EngineError::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&EngineError::Quota {
                model: "m".into(),
                prompt_tokens: 2,
                limit: 1
            }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(status_for(&EngineError::transient("x")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(&EngineError::provider("x")), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&EngineError::internal_state("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_send_then_stats() {
        let base = spawn(Arc::new(StubClient::default())).await;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{}/api/send", base))
            .json(&json!({ "message": "hello" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["response"], "ok");
        assert_eq!(body["compression_triggered"], false);
        assert_eq!(body["compression_stats"]["total_messages"], 1);

        let stats: Value = http
            .get(format!("{}/api/stats", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["stats"]["total_messages"], 1);
        assert_eq!(stats["stats"]["phase"], "active");

        let other: Value = http
            .get(format!("{}/api/stats?session=other", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(other["stats"]["total_messages"], 0);
    }

    #[tokio::test]
    async fn test_empty_message_is_bad_request() {
        let base = spawn(Arc::new(StubClient::default())).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/send", base))
            .json(&json!({ "message": "   " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["kind"], "validation");
    }

    #[tokio::test]
    async fn test_transient_maps_to_503() {
        let client = Arc::new(StubClient::default());
        client
            .errors
            .lock()
            .unwrap()
            .push_back(EngineError::transient("upstream timeout"));
        let base = spawn(client).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/send", base))
            .json(&json!({ "message": "hi", "session": "s1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);
    }

    #[tokio::test]
    async fn test_compare_clear_history() {
        let base = spawn(Arc::new(StubClient::default())).await;
        let http = reqwest::Client::new();
        http.post(format!("{}/api/send", base))
            .json(&json!({ "message": "hello" }))
            .send()
            .await
            .unwrap();

        let cmp: Value = http
            .post(format!("{}/api/compare", base))
            .json(&json!({ "message": "again?" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cmp["status"], "ok");
        assert_eq!(cmp["comparison"]["savings"]["tokens_saved"], 0);

        let history: Value = http
            .get(format!("{}/api/history", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history["history"].as_array().unwrap().len(), 2);

        let cleared = http
            .post(format!("{}/api/clear", base))
            .send()
            .await
            .unwrap();
        assert_eq!(cleared.status(), 200);
        let stats: Value = http
            .get(format!("{}/api/stats", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["stats"]["total_messages"], 0);
        assert_eq!(stats["stats"]["phase"], "empty");
    }

    #[tokio::test]
    async fn test_reads_do_not_register_sessions() {
        let (base, state) = spawn_with_state(Arc::new(StubClient::default())).await;
        let http = reqwest::Client::new();

        for i in 0..5 {
            let stats: Value = http
                .get(format!("{}/api/stats?session=ghost-{}", base, i))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(stats["status"], "ok");
            assert_eq!(stats["stats"]["total_messages"], 0);
            assert_eq!(stats["stats"]["phase"], "empty");

            let history: Value = http
                .get(format!("{}/api/history?session=ghost-{}", base, i))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(history["history"].as_array().unwrap().len(), 0);
        }
        let cmp = http
            .post(format!("{}/api/compare", base))
            .json(&json!({ "message": "anyone?", "session": "ghost-cmp" }))
            .send()
            .await
            .unwrap();
        assert_eq!(cmp.status(), 200);
        let cleared = http
            .post(format!("{}/api/clear?session=ghost-clear", base))
            .send()
            .await
            .unwrap();
        assert_eq!(cleared.status(), 200);
        assert!(state.sessions.names().is_empty());
    }

    #[tokio::test]
    async fn test_clear_drops_named_session() {
        let (base, state) = spawn_with_state(Arc::new(StubClient::default())).await;
        let http = reqwest::Client::new();
        for session in ["default", "scratch"] {
            http.post(format!("{}/api/send", base))
                .json(&json!({ "message": "hello", "session": session }))
                .send()
                .await
                .unwrap();
        }
        assert_eq!(state.sessions.names(), vec!["default".to_string(), "scratch".to_string()]);

        http.post(format!("{}/api/clear?session=scratch", base))
            .send()
            .await
            .unwrap();
        http.post(format!("{}/api/clear", base)).send().await.unwrap();
        assert_eq!(state.sessions.names(), vec!["default".to_string()]);

        let stats: Value = http
            .get(format!("{}/api/stats?session=scratch", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["stats"]["total_messages"], 0);
    }
}
