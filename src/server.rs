//! Public HTTP API.
//!
//! Routes under `/v1` are authenticated with the caller's CloudAPI
//! signature; `/health` is open.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Extension;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::{Authenticator, Session, auth_middleware};
use crate::config::HttpConfig;

/// Session as reported to the caller.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub account_id: Option<Uuid>,
    pub account_name: Option<String>,
    pub user_name: Option<String>,
    pub fingerprint: String,
    pub datacenter: String,
    pub identity_url: String,
    pub triton_url: String,
    pub dev_mode: bool,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            account_id: session.account_id,
            account_name: session.account_name().map(str::to_string),
            user_name: session.user_name().map(str::to_string),
            fingerprint: session.fingerprint.clone(),
            datacenter: session.datacenter.clone(),
            identity_url: session.identity_url.clone(),
            triton_url: session.triton_url.clone(),
            dev_mode: session.is_dev_mode(),
        }
    }
}

pub struct ServiceApi;

impl ServiceApi {
    /// Build the axum router.
    pub fn router(authenticator: Arc<Authenticator>) -> Router {
        Router::new()
            .route("/v1/session", get(session_info))
            .route_layer(axum::middleware::from_fn_with_state(authenticator, auth_middleware))
            // Unauthenticated routes (added after the layer).
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn start(
        authenticator: Arc<Authenticator>,
        http: &HttpConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = Self::router(authenticator);
        let addr: SocketAddr = format!("{}:{}", http.bind, http.port).parse()?;

        tracing::info!("TSG API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

async fn health_check() -> &'static str {
    "ok"
}

async fn session_info(Extension(session): Extension<Session>) -> Json<SessionInfo> {
    Json(SessionInfo::from(&session))
}
