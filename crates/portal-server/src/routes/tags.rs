//! Tag routes: `/v1/tags/*`

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Serialize;

use portal_core::document::{NewTag, Tag};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/tags` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/{id}", delete(remove))
}

/// Response body for `GET /v1/tags`.
#[derive(Debug, Serialize)]
pub struct TagsResponse {
    pub tags: Vec<Tag>,
}

async fn list(State(state): State<Arc<AppState>>) -> Result<Json<TagsResponse>, AppError> {
    let tags = state.store.list_tags().await?;
    Ok(Json(TagsResponse { tags }))
}

async fn create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewTag>, JsonRejection>,
) -> Result<(StatusCode, Json<Tag>), AppError> {
    let Json(body) = body?;
    let tag = state.store.create_tag(body).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

/// Delete a tag and strip it from every document.
///
/// A locked caller gets `403 locked` when a restricted document carries the
/// tag.
async fn remove(
    State(state): State<Arc<AppState>>,
    id: Result<Path<u64>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = id?;
    let unlocked = state.gate.is_unlocked().await;
    state.store.delete_tag(id, unlocked).await?;
    Ok(StatusCode::NO_CONTENT)
}
