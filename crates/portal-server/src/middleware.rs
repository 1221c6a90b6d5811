//! Write gating middleware.
//!
//! When `require_unlock_for_writes` is enabled, every request that can
//! mutate documents or tags is refused with `403 locked` while the access
//! gate is locked. Reads pass through; handlers decide what a locked reader
//! may see.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;

/// Refuse mutating requests while the gate is locked.
pub async fn require_unlocked(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method();
    let read_only = method == Method::GET || method == Method::HEAD || method == Method::OPTIONS;
    if read_only || !state.require_unlock_for_writes {
        return next.run(req).await;
    }

    if !state.gate.is_unlocked().await {
        debug!(method = %req.method(), path = %req.uri().path(), "write refused, gate locked");
        return AppError::Locked.into_response();
    }

    next.run(req).await
}
