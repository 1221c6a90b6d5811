//! HTTP route handlers for the portal.
//!
//! Routes are organized by subsystem:
//! - `sys`: health, access gate status, init, unlock, lock, password change
//! - `documents`: document CRUD and the category list
//! - `tags`: tag registry

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::middleware as axum_mw;
use axum::routing::get;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::require_unlocked;
use crate::state::AppState;

pub mod documents;
pub mod sys;
pub mod tags;

/// Concurrent requests admitted to `/v1/sys`.
const SYS_CONCURRENCY: usize = 10;

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    // Document and tag mutations go through the write gate.
    let gated_routes = Router::new()
        .nest("/v1/documents", documents::router())
        .nest("/v1/tags", tags::router())
        .route_layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            require_unlocked,
        ));

    // Unlock attempts are password guesses; cap how many run at once.
    let sys_routes = Router::new()
        .nest("/v1/sys", sys::router())
        .layer(ConcurrencyLimitLayer::new(SYS_CONCURRENCY));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .merge(sys_routes)
        .merge(gated_routes)
        .route("/v1/categories", get(documents::categories))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
