//! Demo handlers

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use super::middleware::{ApiError, Sessions};
use super::SESSION_NAME;

#[derive(Debug, Serialize, Deserialize)]
pub struct VisitResponse {
    pub visits: u64,
    pub new_session: bool,
}

/// Count visits in the session
pub async fn visit(sessions: Sessions) -> Result<Json<VisitResponse>, ApiError> {
    let mut session = sessions.get(SESSION_NAME).await?;
    let new_session = session.is_new();

    let visits = session.get::<u64>("visits").unwrap_or(0) + 1;
    session
        .insert("visits", visits)
        .map_err(|e| ApiError::internal_error(format!("Failed to store visit count: {}", e)))?;
    sessions.save(&mut session).await?;

    Ok(Json(VisitResponse {
        visits,
        new_session,
    }))
}

/// Delete the session and expire its cookie
pub async fn logout(sessions: Sessions) -> Result<StatusCode, ApiError> {
    let mut session = sessions.get(SESSION_NAME).await?;
    session.expire();
    sessions.save(&mut session).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::build_router;
    use crate::codec::SecureCookie;
    use crate::db::create_test_pool;
    use crate::store::{SqlStore, StoreOptions};
    use axum::{
        body::Body,
        http::{header, Request, Response},
        Router,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        let codec = SecureCookie::new(b"0123456789abcdef0123456789abcdef", None).unwrap();
        let store = SqlStore::with_options(pool, StoreOptions::default(), vec![Box::new(codec)])
            .await
            .expect("Failed to create store");
        build_router(Arc::new(store))
    }

    fn cookie_of(response: &Response<Body>) -> String {
        let raw = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("missing Set-Cookie")
            .to_str()
            .unwrap();
        raw.split(';').next().unwrap().to_string()
    }

    async fn visits_of(response: Response<Body>) -> VisitResponse {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn request(method: &str, uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_visit_counter() {
        let app = test_app().await;

        let first = app.clone().oneshot(request("GET", "/", None)).await.unwrap();
        let cookie = cookie_of(&first);
        let body = visits_of(first).await;
        assert_eq!(body.visits, 1);
        assert!(body.new_session);

        let second = app
            .oneshot(request("GET", "/", Some(&cookie)))
            .await
            .unwrap();
        let body = visits_of(second).await;
        assert_eq!(body.visits, 2);
        assert!(!body.new_session);
    }

    #[tokio::test]
    async fn test_logout_forgets_session() {
        let app = test_app().await;

        let first = app.clone().oneshot(request("GET", "/", None)).await.unwrap();
        let cookie = cookie_of(&first);

        let logout = app
            .clone()
            .oneshot(request("POST", "/logout", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(logout.status(), StatusCode::NO_CONTENT);
        let expired = logout
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(expired.contains("Max-Age=0"));

        // The old cookie no longer finds a row
        let again = app
            .oneshot(request("GET", "/", Some(&cookie)))
            .await
            .unwrap();
        let body = visits_of(again).await;
        assert_eq!(body.visits, 1);
        assert!(body.new_session);
    }

    #[tokio::test]
    async fn test_health_sets_no_cookie() {
        let app = test_app().await;

        let response = app.oneshot(request("GET", "/health", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }
}
