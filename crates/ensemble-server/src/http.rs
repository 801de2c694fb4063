//! Route handlers: chat, chat streaming, and thread queries.

use crate::service::{ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use ensemble_contract::{AgentState, Message};
use ensemble_engine::{streaming, AgentEvent, Termination, TurnRequest};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

/// Build health routes.
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// Build chat routes.
pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/chat", post(chat))
        .route("/v1/chat/stream", post(chat_stream))
}

/// Build thread query routes.
pub fn thread_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/threads", get(list_threads))
        .route("/v1/threads/{id}", get(get_thread))
        .route("/v1/threads/{id}", delete(delete_thread))
        .route("/v1/threads/{id}/messages", get(get_thread_messages))
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    thread_id: Option<String>,
    message: String,
    user_id: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatReply {
    thread_id: String,
    response: String,
    iteration_count: u32,
    termination: &'static str,
}

fn termination_label(termination: Termination) -> &'static str {
    match termination {
        Termination::NaturalEnd => "completed",
        Termination::CapReached => "iteration_cap",
        Termination::Suspended => "suspended",
        Termination::Cancelled => "cancelled",
    }
}

fn request_from_body(body: ChatBody) -> Result<(String, TurnRequest), ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    let thread_id = body
        .thread_id
        .unwrap_or_else(|| uuid::Uuid::now_v7().simple().to_string());
    let mut request = TurnRequest::new(&thread_id, &body.message);
    if let Some(user_id) = body.user_id {
        request = request.with_user_id(user_id);
    }
    if let Some(session_id) = body.session_id {
        request = request.with_session_id(session_id);
    }
    Ok((thread_id, request))
}

async fn chat(
    State(st): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatReply>, ApiError> {
    let (thread_id, request) = request_from_body(body)?;
    let outcome = st.coordinator.run_turn(request, None, None).await?;
    Ok(Json(ChatReply {
        thread_id,
        response: outcome.response.unwrap_or_default(),
        iteration_count: outcome.state.iteration_count,
        termination: termination_label(outcome.termination),
    }))
}

async fn chat_stream(
    State(st): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (_, request) = request_from_body(body)?;
    let (tx, mut rx) = streaming::event_channel();

    let coordinator = st.coordinator.clone();
    tokio::spawn(async move {
        let result = coordinator.run_turn(request, Some(tx.clone()), None).await;
        if let Err(e) = result {
            let _ = tx
                .send(AgentEvent::TurnError {
                    message: e.to_string(),
                })
                .await;
        }
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match Event::default().json_data(&event) {
                Ok(sse_event) => yield Ok(sse_event),
                Err(e) => tracing::warn!(error = %e, "dropping unserializable event"),
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Serialize)]
struct ThreadList {
    threads: Vec<String>,
}

async fn list_threads(State(st): State<AppState>) -> Result<Json<ThreadList>, ApiError> {
    let threads = st
        .store
        .list()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(ThreadList { threads }))
}

async fn get_thread(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentState>, ApiError> {
    let state = st
        .store
        .load_state(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::ThreadNotFound(id))?;
    Ok(Json(state))
}

async fn delete_thread(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    st.store
        .delete(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

fn default_message_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_message_limit")]
    limit: usize,
}

#[derive(Debug, Serialize)]
struct MessagePage {
    messages: Vec<Message>,
    total: usize,
    offset: usize,
}

async fn get_thread_messages(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let state = st
        .store
        .load_state(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::ThreadNotFound(id))?;

    let total = state.messages.len();
    let offset = query.offset.min(total);
    let limit = query.limit.clamp(1, 200);
    let end = (offset + limit).min(total);
    Ok(Json(MessagePage {
        messages: state.messages[offset..end].to_vec(),
        total,
        offset,
    }))
}
