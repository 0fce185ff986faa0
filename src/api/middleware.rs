//! API middleware
//!
//! `session_middleware` gives every request its own session registry and
//! copies the `Set-Cookie` headers produced while handling it onto the
//! response. Handlers reach the registry through the `Sessions` extractor.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::registry::{Registry, SessionStore};
use crate::session::Session;
use crate::store::SessionStoreError;

/// Shared session backend as seen by the middleware
pub type DynSessionStore = Arc<dyn SessionStore>;

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<SessionStoreError> for ApiError {
    fn from(e: SessionStoreError) -> Self {
        tracing::error!("Session store error: {}", e);
        Self::internal_error("Session could not be saved")
    }
}

/// Per-request handle on the session registry
#[derive(Clone)]
pub struct Sessions {
    store: DynSessionStore,
    registry: Arc<Mutex<Registry>>,
}

impl Sessions {
    pub fn new(store: DynSessionStore, registry: Registry) -> Self {
        Self {
            store,
            registry: Arc::new(Mutex::new(registry)),
        }
    }

    /// Snapshot of the session called `name`, loaded on first use in this
    /// request. Changes to the snapshot reach the store only through `save`.
    pub async fn get(&self, name: &str) -> Result<Session, SessionStoreError> {
        let mut registry = self.registry.lock().await;
        let session = registry.get(self.store.as_ref(), name).await?;
        Ok(session.clone())
    }

    /// Run `f` on the cached session called `name`, loading it first if
    /// needed. The changes are picked up by a later `save_all`.
    pub async fn modify<F, R>(&self, name: &str, f: F) -> Result<R, SessionStoreError>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut registry = self.registry.lock().await;
        let session = registry.get(self.store.as_ref(), name).await?;
        Ok(f(session))
    }

    /// Persist `session`; its cookie is sent with the response.
    pub async fn save(&self, session: &mut Session) -> Result<(), SessionStoreError> {
        let mut registry = self.registry.lock().await;
        registry.save_session(self.store.as_ref(), session).await
    }

    /// Save every session cached in this request, including edits made
    /// through `modify` or an earlier `save`
    pub async fn save_all(&self) -> Result<(), SessionStoreError> {
        let mut registry = self.registry.lock().await;
        registry.save_all(self.store.as_ref()).await
    }

    async fn take_set_cookies(&self) -> axum::http::HeaderMap {
        self.registry.lock().await.take_set_cookies()
    }
}

impl<S> FromRequestParts<S> for Sessions
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Sessions>()
            .cloned()
            .ok_or_else(|| ApiError::internal_error("Session middleware is not installed"))
    }
}

/// Session middleware
pub async fn session_middleware(
    State(store): State<DynSessionStore>,
    mut request: Request,
    next: Next,
) -> Response {
    let sessions = Sessions::new(store, Registry::from_headers(request.headers()));
    request.extensions_mut().insert(sessions.clone());

    let mut response = next.run(request).await;

    let cookies = sessions.take_set_cookies().await;
    for value in cookies.get_all(header::SET_COOKIE) {
        response
            .headers_mut()
            .append(header::SET_COOKIE, value.clone());
    }

    response
}
