//! HTTP handlers for content items and their engagement ledger.
//! Validation and not-found policy live in `LedgerService`; these handlers
//! only translate between JSON and service calls.

use crate::{
    errors::AppError,
    models::{
        content_item::{ContentItem, NewContentItem},
        ledger::{Comment, LikeOutcome, ViewOutcome},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

/// Body carrying just the acting identity.
#[derive(Debug, Default, Deserialize)]
pub struct IdentityReq {
    #[serde(default, alias = "email")]
    pub identity: Option<String>,
}

/// Request body for `POST /api/content`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemReq {
    #[serde(default, alias = "email")]
    pub identity: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "video_url")]
    pub media_url: String,
    #[serde(default, alias = "thumbnail_url")]
    pub thumbnail_url: String,
    #[serde(default, alias = "type")]
    pub kind: String,
    #[serde(default)]
    pub category: String,
}

/// Query params accepted by `GET /api/content`.
#[derive(Debug, Deserialize)]
pub struct ListItemsQuery {
    pub category: Option<String>,
    #[serde(alias = "type")]
    pub kind: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CommentReq {
    #[serde(default, alias = "email")]
    pub identity: String,
    #[serde(default, alias = "content")]
    pub body: String,
}

/// POST `/api/content`: upload metadata for a new item.
pub async fn create_item(
    State(state): State<AppState>,
    Json(req): Json<CreateItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let item = state
        .ledger
        .create_item(NewContentItem {
            owner: req.identity,
            title: req.title,
            description: req.description,
            media_url: req.media_url,
            thumbnail_url: req.thumbnail_url,
            kind: req.kind,
            category: req.category,
        })
        .await?;
    tracing::info!(item = %item.id, owner = %item.owner, "content item created");
    Ok((StatusCode::CREATED, Json(item)))
}

/// GET `/api/content`: newest first, supports ?category=&kind=&limit=
pub async fn list_items(
    State(state): State<AppState>,
    Query(q): Query<ListItemsQuery>,
) -> Result<Json<Vec<ContentItem>>, AppError> {
    let items = state.ledger.list_items(q.category, q.kind, q.limit).await?;
    Ok(Json(items))
}

/// GET `/api/content/{id}`
pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContentItem>, AppError> {
    Ok(Json(state.ledger.get_item(&id).await?))
}

/// DELETE `/api/content/{id}?identity=`: owner or admin only.
pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<IdentityReq>,
) -> Result<impl IntoResponse, AppError> {
    let requester = q.identity.unwrap_or_default();
    let is_admin = state.quota.policy().is_admin(requester.trim());
    state.ledger.delete_item(&id, &requester, is_admin).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/api/content/{id}/view`: no body, or `{}`, counts an anonymous view.
pub async fn record_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<IdentityReq>>,
) -> Result<Json<ViewOutcome>, AppError> {
    let viewer = body.and_then(|Json(req)| req.identity);
    let outcome = state.ledger.record_view(&id, viewer.as_deref()).await?;
    Ok(Json(outcome))
}

/// POST `/api/content/{id}/like`
pub async fn toggle_like(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<IdentityReq>,
) -> Result<Json<LikeOutcome>, AppError> {
    let liker = req.identity.unwrap_or_default();
    Ok(Json(state.ledger.toggle_like(&id, &liker).await?))
}

/// GET `/api/content/{id}/comments`
pub async fn list_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Comment>>, AppError> {
    Ok(Json(state.ledger.list_comments(&id).await?))
}

/// POST `/api/content/{id}/comments`
pub async fn add_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CommentReq>,
) -> Result<impl IntoResponse, AppError> {
    let comment = state
        .ledger
        .add_comment(&id, &req.identity, &req.body)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// POST `/api/content/{id}/reconcile`: admin only.
pub async fn reconcile_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<IdentityReq>,
) -> Result<Json<ContentItem>, AppError> {
    let requester = req.identity.unwrap_or_default();
    if !state.quota.policy().is_admin(requester.trim()) {
        return Err(AppError::forbidden("admin identity required"));
    }
    Ok(Json(state.ledger.reconcile(&id).await?))
}
