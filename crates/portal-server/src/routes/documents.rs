//! Document routes: `/v1/documents/*` and `/v1/categories`.
//!
//! The store itself is gate-agnostic. These handlers apply the access rules:
//! restricted documents are listed only for unlocked sessions that ask for
//! them, a locked reader gets a restricted document's metadata without its
//! content, and any change to a restricted document (including flipping the
//! flag either way) needs the gate unlocked.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use portal_core::document::{Bucket, Document, DocumentPatch, NewDocument, Tag};
use portal_core::error::DocumentError;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/documents` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/{id}", get(read).patch(update).delete(remove))
}

// ── Request / Response types ─────────────────────────────────────────

/// Query string shared by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct VisibilityQuery {
    /// Ask for restricted documents too; honored only while unlocked.
    #[serde(default)]
    pub include_restricted: bool,
}

/// A document as returned to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: u64,
    pub title: String,
    /// `null` when the document is restricted and the gate is locked.
    pub content: Option<String>,
    pub category: String,
    pub restricted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<Tag>,
}

impl DocumentView {
    fn new(doc: Document, show_content: bool) -> Self {
        Self {
            id: doc.id,
            title: doc.title,
            content: show_content.then_some(doc.content),
            category: doc.category,
            restricted: doc.restricted,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            tags: doc.tags,
        }
    }
}

impl From<Document> for DocumentView {
    fn from(doc: Document) -> Self {
        Self::new(doc, true)
    }
}

/// Response body for `GET /v1/documents`.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub documents: Vec<DocumentView>,
    /// Ids of records that exist but could not be decrypted or parsed.
    pub unreadable: Vec<u64>,
}

/// Response body for `GET /v1/categories`.
#[derive(Debug, Serialize)]
pub struct CategoriesResponse {
    pub categories: Vec<String>,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// List documents, newest first.
async fn list(
    State(state): State<Arc<AppState>>,
    query: Result<Query<VisibilityQuery>, QueryRejection>,
) -> Result<Json<ListResponse>, AppError> {
    let Query(query) = query?;
    let include = query.include_restricted && state.gate.is_unlocked().await;

    let listing = state.store.list(include).await?;
    Ok(Json(ListResponse {
        documents: listing.documents.into_iter().map(DocumentView::from).collect(),
        unreadable: listing.unreadable,
    }))
}

/// Create a document. Creating a restricted one needs the gate unlocked.
async fn create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewDocument>, JsonRejection>,
) -> Result<(StatusCode, Json<DocumentView>), AppError> {
    let Json(body) = body?;
    if body.restricted && !state.gate.is_unlocked().await {
        return Err(AppError::Locked);
    }

    let doc = state.store.create(body).await?;
    Ok((StatusCode::CREATED, Json(doc.into())))
}

/// Fetch one document. Locked readers get no restricted content.
async fn read(
    State(state): State<Arc<AppState>>,
    id: Result<Path<u64>, PathRejection>,
) -> Result<Json<DocumentView>, AppError> {
    let Path(id) = id?;
    let doc = state.store.get(id).await?;
    let show_content = !doc.restricted || state.gate.is_unlocked().await;
    Ok(Json(DocumentView::new(doc, show_content)))
}

/// Apply a partial update.
async fn update(
    State(state): State<Arc<AppState>>,
    id: Result<Path<u64>, PathRejection>,
    body: Result<Json<DocumentPatch>, JsonRejection>,
) -> Result<Json<DocumentView>, AppError> {
    let Path(id) = id?;
    let Json(patch) = body?;

    let bucket = state
        .store
        .bucket_of(id)
        .await?
        .ok_or(DocumentError::NotFound { id })?;
    let touches_restricted = bucket == Bucket::Secret || patch.restricted == Some(true);
    if touches_restricted && !state.gate.is_unlocked().await {
        return Err(AppError::Locked);
    }

    let doc = state.store.update(id, patch).await?;
    Ok(Json(doc.into()))
}

/// Delete a document.
async fn remove(
    State(state): State<Arc<AppState>>,
    id: Result<Path<u64>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = id?;

    let bucket = state
        .store
        .bucket_of(id)
        .await?
        .ok_or(DocumentError::NotFound { id })?;
    if bucket == Bucket::Secret && !state.gate.is_unlocked().await {
        return Err(AppError::Locked);
    }

    state.store.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Distinct categories of the visible documents.
pub(crate) async fn categories(
    State(state): State<Arc<AppState>>,
    query: Result<Query<VisibilityQuery>, QueryRejection>,
) -> Result<Json<CategoriesResponse>, AppError> {
    let Query(query) = query?;
    let include = query.include_restricted && state.gate.is_unlocked().await;
    let categories = state.store.categories(include).await?;
    Ok(Json(CategoriesResponse { categories }))
}
