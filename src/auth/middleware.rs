//! Axum middleware gating routes behind [`Authenticator`].

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::session::Authenticator;
use crate::error::AuthError;

/// Authenticate the request and attach its [`Session`](crate::auth::Session)
/// as a request extension before running the wrapped handler.
///
/// Wire up with `axum::middleware::from_fn_with_state(authenticator, auth_middleware)`.
pub async fn auth_middleware(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticator.authenticate(request.headers()).await {
        Ok(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(err) => reject(err),
    }
}

fn reject(err: AuthError) -> Response {
    let status = err.status_code();
    if err.is_drift() {
        tracing::error!(error = %err, "auth: key state drift requires operator attention");
    } else if status.is_server_error() {
        tracing::error!(error = %err, "auth: authentication aborted");
    } else {
        tracing::debug!(error = %err, "auth: request rejected");
    }
    (status, err.public_message()).into_response()
}
