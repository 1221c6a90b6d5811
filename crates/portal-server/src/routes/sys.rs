//! System routes: `/v1/sys/*`
//!
//! Health check and the access gate lifecycle: configure the unlock
//! password, unlock, lock, and change the password.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use portal_core::gate::GateStatus;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/sys` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/gate", get(gate_status))
        .route("/init", post(init))
        .route("/unlock", post(unlock))
        .route("/lock", post(lock))
        .route("/password", post(change_password))
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `POST /v1/sys/init` and `POST /v1/sys/unlock`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordRequest {
    pub password: String,
}

/// Request body for `POST /v1/sys/password`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub current: String,
    pub new: String,
}

/// Response body for `POST /v1/sys/unlock` and `POST /v1/sys/lock`.
#[derive(Debug, Serialize)]
pub struct UnlockedResponse {
    pub unlocked: bool,
}

/// Response body for `GET /v1/sys/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub unlocked: bool,
    pub password_configured: bool,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Health check. Returns 503 if storage cannot be reached.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.gate.status().await {
        Ok(s) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                unlocked: s.unlocked,
                password_configured: s.configured,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "health check could not read gate status");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    unlocked: state.gate.is_unlocked().await,
                    password_configured: false,
                }),
            )
        }
    }
}

async fn gate_status(State(state): State<Arc<AppState>>) -> Result<Json<GateStatus>, AppError> {
    Ok(Json(state.gate.status().await?))
}

/// Configure the unlock password. The gate stays locked.
async fn init(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PasswordRequest>, JsonRejection>,
) -> Result<Json<GateStatus>, AppError> {
    let Json(body) = body?;
    state.gate.initialize(&body.password).await?;
    Ok(Json(state.gate.status().await?))
}

/// Submit the unlock password.
async fn unlock(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PasswordRequest>, JsonRejection>,
) -> Result<Json<UnlockedResponse>, AppError> {
    let Json(body) = body?;
    state.gate.submit_password(&body.password).await?;
    Ok(Json(UnlockedResponse { unlocked: true }))
}

async fn lock(State(state): State<Arc<AppState>>) -> Json<UnlockedResponse> {
    state.gate.lock().await;
    Json(UnlockedResponse { unlocked: false })
}

/// Replace the unlock password. Requires the gate to be unlocked.
async fn change_password(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(body) = body?;
    state.gate.change_password(&body.current, &body.new).await?;
    Ok(StatusCode::NO_CONTENT)
}
