use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    body::Body,
    extract::{ rejection::JsonRejection, State },
    http::{ header, StatusCode },
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use futures::{ stream, StreamExt };
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error, warn };

use crate::llm::chat::{ provider_messages, ChatClient, ChatStream };
use crate::models::chat::{ ChatRequest, ErrorBody, STREAM_ERROR_MARKER };

#[derive(Clone)]
pub struct AppState {
    pub chat_client: Result<Arc<dyn ChatClient>, String>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr: SocketAddr = listener.local_addr()?;
    info!("Conversation relay listening on http://{}", addr);
    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            warn!("Rejected malformed chat request: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let client = match &state.chat_client {
        Ok(client) => Arc::clone(client),
        Err(message) => {
            error!("Chat request refused: {}", message);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, message.clone());
        }
    };

    if request.messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "messages must not be empty");
    }

    let messages = provider_messages(&request.system_message, &request.messages);
    let mut upstream = match client.stream_chat(messages).await {
        Ok(chat_stream) => chat_stream,
        Err(e) => {
            error!("LLM provider error: {}", e);
            return error_response(StatusCode::BAD_GATEWAY, e.to_string());
        }
    };

    // A failure before the first token still gets a proper status.
    let first = match upstream.next().await {
        Some(Err(e)) => {
            error!("LLM provider failed before responding: {}", e);
            return error_response(StatusCode::BAD_GATEWAY, e.to_string());
        }
        Some(Ok(token)) => Some(token),
        None => None,
    };
    let body = stream::iter(first.map(Ok)).chain(upstream);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(with_error_trailer(Box::pin(body))))
        .unwrap_or_else(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

fn with_error_trailer(
    upstream: ChatStream
) -> impl futures::Stream<Item = Result<String, Infallible>> + Send {
    upstream.scan(false, |failed, item| {
        let chunk = if *failed {
            None
        } else {
            match item {
                Ok(token) => Some(Ok(token)),
                Err(e) => {
                    error!("LLM provider stream failed: {}", e);
                    *failed = true;
                    Some(Ok(format!("{}{}", STREAM_ERROR_MARKER, e)))
                }
            }
        };
        futures::future::ready(chunk)
    })
}
