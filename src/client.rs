use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::session::SessionId;
use crate::settings::ClientSettings;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Backend server is not reachable")]
    Unreachable,
    /// Non-success status, or a body carrying an `error` field.
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl TransportError {
    fn from_status(status: StatusCode, body: Option<&Value>) -> Self {
        let message = body
            .and_then(|b| b.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));
        TransportError::Api { status: status.as_u16(), message }
    }
}

/// The remote question-answering service, one method per endpoint.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn health_check(&self) -> Result<(), TransportError>;
    async fn create_session(&self) -> Result<SessionId, TransportError>;
    async fn ask(&self, session_id: &SessionId, query: &str) -> Result<String, TransportError>;
    async fn history(&self, session_id: &SessionId) -> Result<Value, TransportError>;
    async fn clear_session(&self, session_id: &SessionId) -> Result<(), TransportError>;
    async fn destroy_session(&self, session_id: &SessionId) -> Result<(), TransportError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest<'a> {
    pub session_id: &'a SessionId,
    pub query: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
}

#[derive(Clone)]
pub struct HttpChatBackend {
    base_url: String,
    http: reqwest::Client,
}

impl HttpChatBackend {
    pub fn new(settings: &ClientSettings) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            base_url: settings.base_url.as_str().trim_end_matches('/').to_string(),
            http: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api{}", self.base_url, endpoint)
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<Value, TransportError> {
        let url = self.api_url(endpoint);
        tracing::debug!(%method, %url, "api request");

        let mut rb = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            rb = rb.json(body);
        }
        let resp = rb.send().await.inspect_err(|e| {
            tracing::error!(%method, %url, error = %e, "api request failed");
        })?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        let data: Option<Value> = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };

        let carries_error = data
            .as_ref()
            .and_then(|d| d.get("error"))
            .is_some_and(Value::is_string);
        if !status.is_success() || carries_error {
            let err = TransportError::from_status(status, data.as_ref());
            tracing::error!(%method, %url, status = status.as_u16(), error = %err, "api request rejected");
            return Err(err);
        }

        data.ok_or_else(|| TransportError::Decode(format!("{url} returned a non-JSON body")))
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, TransportError> {
        serde_json::from_value(value).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn health_check(&self) -> Result<(), TransportError> {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(resp) => {
                tracing::debug!(%url, status = resp.status().as_u16(), "health check answered");
                Ok(())
            }
            Err(e) => {
                tracing::error!(%url, error = %e, "health check failed");
                Err(TransportError::Unreachable)
            }
        }
    }

    async fn create_session(&self) -> Result<SessionId, TransportError> {
        let v = self.request::<()>(Method::POST, "/chat/session", None).await?;
        Ok(Self::decode::<CreateSessionResponse>(v)?.session_id)
    }

    async fn ask(&self, session_id: &SessionId, query: &str) -> Result<String, TransportError> {
        let body = AskRequest { session_id, query: query.trim() };
        let v = self.request(Method::POST, "/chat/ask", Some(&body)).await?;
        Ok(Self::decode::<AskResponse>(v)?.answer)
    }

    async fn history(&self, session_id: &SessionId) -> Result<Value, TransportError> {
        self.request::<()>(Method::GET, &format!("/chat/history/{session_id}"), None)
            .await
    }

    async fn clear_session(&self, session_id: &SessionId) -> Result<(), TransportError> {
        self.request::<()>(Method::DELETE, &format!("/chat/session/{session_id}"), None)
            .await
            .map(drop)
    }

    async fn destroy_session(&self, session_id: &SessionId) -> Result<(), TransportError> {
        self.request::<()>(Method::DELETE, &format!("/chat/session/{session_id}/destroy"), None)
            .await
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{self, AppState};
    use crate::settings::{resolve_client_settings, SettingsLayer};
    use axum::{http::StatusCode as AxumStatus, routing::{get, post}, Json, Router};

    fn backend_for(addr: std::net::SocketAddr) -> HttpChatBackend {
        let cli = SettingsLayer { base_url: Some(format!("http://{addr}")), ..Default::default() };
        let settings = resolve_client_settings(&SettingsLayer::defaults(), &SettingsLayer::default(), &cli).unwrap();
        HttpChatBackend::new(&settings).unwrap()
    }

    async fn spawn(app: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn full_session_lifecycle_against_stub_server() {
        let addr = spawn(server::router(AppState::default())).await;
        let backend = backend_for(addr);

        backend.health_check().await.unwrap();
        let sid = backend.create_session().await.unwrap();
        let answer = backend.ask(&sid, "  what happened today?  ").await.unwrap();
        assert!(answer.contains("what happened today?"));

        let history = backend.history(&sid).await.unwrap();
        let entries = history["history"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["content"], "what happened today?");

        backend.clear_session(&sid).await.unwrap();
        backend.clear_session(&sid).await.unwrap();
        let history = backend.history(&sid).await.unwrap();
        assert!(history["history"].as_array().unwrap().is_empty());

        backend.destroy_session(&sid).await.unwrap();
        let err = backend.ask(&sid, "again").await.unwrap_err();
        match err {
            TransportError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Session not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_success_without_error_field_uses_status_message() {
        let app = Router::new().route(
            "/api/chat/session",
            post(|| async { (AxumStatus::BAD_GATEWAY, "upstream down") }),
        );
        let backend = backend_for(spawn(app).await);
        let err = backend.create_session().await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP error! status: 502");
    }

    #[tokio::test]
    async fn error_field_on_success_status_is_a_failure() {
        let app = Router::new().route(
            "/api/chat/ask",
            post(|| async { Json(serde_json::json!({ "error": "index not ready" })) }),
        );
        let backend = backend_for(spawn(app).await);
        let err = backend.ask(&SessionId::new("s1"), "hello").await.unwrap_err();
        assert_eq!(err.to_string(), "index not ready");
    }

    #[tokio::test]
    async fn health_check_only_needs_an_answer() {
        let app = Router::new().route("/health", get(|| async { AxumStatus::SERVICE_UNAVAILABLE }));
        let backend = backend_for(spawn(app).await);
        backend.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn health_check_reports_unreachable_when_nothing_listens() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = backend_for(addr).health_check().await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable));
        assert_eq!(err.to_string(), "Backend server is not reachable");
    }
}
