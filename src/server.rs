use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::{delete, get, post}, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::client::{AskResponse, CreateSessionResponse};
use crate::session::SessionId;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub role: &'static str,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<SessionId, Vec<HistoryEntry>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskBody {
    pub session_id: SessionId,
    pub query: String,
}

pub struct ApiError(StatusCode, &'static str);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

const NOT_FOUND: ApiError = ApiError(StatusCode::NOT_FOUND, "Session not found");

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

async fn create_session(State(state): State<AppState>) -> Json<CreateSessionResponse> {
    let session_id = SessionId::new(Uuid::new_v4().to_string());
    state.sessions.write().await.insert(session_id.clone(), Vec::new());
    tracing::info!(%session_id, "stub session created");
    Json(CreateSessionResponse { session_id })
}

fn canned_answer(query: &str) -> String {
    format!(
        "**Stub answer** for \"{query}\": *Source: local stub backend *Status: no live news index"
    )
}

async fn ask(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Result<Json<AskResponse>, ApiError> {
    let query = body.query.trim();
    if query.is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "Query is required"));
    }
    let mut sessions = state.sessions.write().await;
    let history = sessions.get_mut(&body.session_id).ok_or(NOT_FOUND)?;
    let answer = canned_answer(query);
    history.push(HistoryEntry { role: "user", content: query.to_string(), timestamp: Utc::now() });
    history.push(HistoryEntry { role: "bot", content: answer.clone(), timestamp: Utc::now() });
    Ok(Json(AskResponse { answer }))
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sessions = state.sessions.read().await;
    let history = sessions.get(&SessionId::new(id.clone())).ok_or(NOT_FOUND)?;
    Ok(Json(json!({ "sessionId": id, "history": history })))
}

async fn clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut sessions = state.sessions.write().await;
    let history = sessions.get_mut(&SessionId::new(id.clone())).ok_or(NOT_FOUND)?;
    history.clear();
    Ok(Json(json!({ "message": "Session cleared", "sessionId": id })))
}

async fn destroy_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut sessions = state.sessions.write().await;
    sessions.remove(&SessionId::new(id.clone())).ok_or(NOT_FOUND)?;
    tracing::info!(session_id = %id, "stub session destroyed");
    Ok(Json(json!({ "message": "Session destroyed", "sessionId": id })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat/session", post(create_session))
        .route("/api/chat/ask", post(ask))
        .route("/api/chat/history/:id", get(get_history))
        .route("/api/chat/session/:id", delete(clear_session))
        .route("/api/chat/session/:id/destroy", delete(destroy_session))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "stub backend listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ask_records_history_and_rejects_blank_queries() {
        let state = AppState::default();
        let Json(created) = create_session(State(state.clone())).await;
        let sid = created.session_id;

        let Json(resp) = ask(
            State(state.clone()),
            Json(AskBody { session_id: sid.clone(), query: " markets ".into() }),
        )
        .await
        .ok()
        .unwrap();
        assert!(resp.answer.contains("\"markets\""));
        assert_eq!(state.sessions.read().await[&sid].len(), 2);

        let err = ask(State(state.clone()), Json(AskBody { session_id: sid, query: "  ".into() }))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_sessions_are_not_found() {
        let state = AppState::default();
        let err = destroy_session(State(state), Path("missing".into())).await.err().unwrap();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        assert_eq!(err.1, "Session not found");
    }
}
