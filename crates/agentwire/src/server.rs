//! HTTP surface for chat streams

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use agentwire_client::http::STREAM_PATH;
use agentwire_protocol::ChatRequestBody;
use agentwire_session::MessageStore;
use agentwire_stream::{body_stream, ChannelSink, ChatPipeline};

/// Shared request state
#[derive(Clone)]
pub struct AppState {
    pipeline: ChatPipeline,
    store: Arc<dyn MessageStore>,
    tokens: Arc<Vec<String>>,
    channel_capacity: usize,
}

impl AppState {
    /// An empty token list disables authentication
    pub fn new(
        pipeline: ChatPipeline,
        store: Arc<dyn MessageStore>,
        tokens: Vec<String>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            pipeline,
            store,
            tokens: Arc::new(tokens),
            channel_capacity,
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.tokens.is_empty() {
            return true;
        }

        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| self.tokens.iter().any(|t| t == token.trim()))
            .unwrap_or(false)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(STREAM_PATH, post(stream_chat))
        .with_state(state)
}

async fn stream_chat(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.authorized(&headers) {
        warn!("◆ REJECTED UNAUTHENTICATED REQUEST");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing request body").into_response();
    }

    let request: ChatRequestBody = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Invalid chat request: {}", e);
            return (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
                .into_response();
        }
    };

    // The user message is stored before any frame is sent
    if let Err(e) = state
        .store
        .append_user(&request.chat_id, &request.new_message)
        .await
    {
        error!("◆ FAILED TO PERSIST USER MESSAGE: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to process chat request" })),
        )
            .into_response();
    }

    let (sink, rx) = ChannelSink::channel(state.channel_capacity);
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.run(&request, sink).await;
    });

    info!("◆ STREAM ACCEPTED");
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CONNECTION, "keep-alive"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(body_stream(rx)),
    )
        .into_response()
}
