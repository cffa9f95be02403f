//! Budgeted generation endpoints.
//!
//! Every call that reaches an upstream model on a user's behalf takes one unit
//! of that user's daily quota first. Upstream trouble never turns into a 5xx:
//! the gateway answers with a degraded result instead.

use crate::{
    errors::AppError,
    handlers::caller::Origin,
    services::{
        gateway::{DEFAULT_ALIAS, Generation, Structured, Suggestion, Uniqueness},
        quota_service::{Caller, CallerClass, QuotaDecision, QuotaStatus},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct GenerateReq {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, alias = "modelAlias", alias = "model_alias")]
    pub model: Option<String>,
    #[serde(default, alias = "email")]
    pub identity: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SuggestReq {
    #[serde(default)]
    pub topic: String,
    #[serde(default, alias = "email")]
    pub identity: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UniquenessReq {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "email")]
    pub identity: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuotaQuery {
    #[serde(default, alias = "email")]
    pub identity: Option<String>,
}

/// Budget snapshot attached to every successful gateway response.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaUsage {
    pub class: CallerClass,
    /// `None` when exempt or when the store could not be consulted.
    pub used: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub generation: Generation,
    pub quota: QuotaUsage,
}

#[derive(Serialize)]
pub struct StructuredResponse<T> {
    #[serde(flatten)]
    pub structured: Structured<T>,
    pub quota: QuotaUsage,
}

/// Resolve the caller and take one unit of their daily budget.
async fn admit(
    state: &AppState,
    identity: Option<&str>,
    origin: &str,
) -> Result<(Caller, QuotaUsage), AppError> {
    let caller = state.quota.policy().classify(identity, origin);
    let usage = match state.quota.check_and_consume(&caller).await {
        QuotaDecision::Exempt => QuotaUsage {
            class: caller.class,
            used: None,
            limit: None,
        },
        QuotaDecision::Allowed { used, limit } => QuotaUsage {
            class: caller.class,
            used: Some(used),
            limit: Some(limit),
        },
        QuotaDecision::FailOpen { limit } => QuotaUsage {
            class: caller.class,
            used: None,
            limit: Some(limit),
        },
        QuotaDecision::Exceeded { limit } => {
            tracing::info!(identity = %caller.identity, limit, "daily generation quota exhausted");
            return Err(AppError::quota_exceeded(limit));
        }
    };
    Ok((caller, usage))
}

/// POST `/api/ai/generate`
pub async fn generate(
    State(state): State<AppState>,
    Origin(origin): Origin,
    Json(req): Json<GenerateReq>,
) -> Result<Json<GenerateResponse>, AppError> {
    let prompt = req.prompt.trim();
    if prompt.is_empty() {
        return Err(AppError::bad_request("prompt is required"));
    }

    let (caller, quota) = admit(&state, req.identity.as_deref(), &origin).await?;
    let alias = req.model.as_deref().unwrap_or(DEFAULT_ALIAS);
    let generation = state.gateway.generate(prompt, alias, &caller.identity).await;

    Ok(Json(GenerateResponse { generation, quota }))
}

/// POST `/api/ai/suggest`
pub async fn suggest(
    State(state): State<AppState>,
    Origin(origin): Origin,
    Json(req): Json<SuggestReq>,
) -> Result<Json<StructuredResponse<Suggestion>>, AppError> {
    let topic = req.topic.trim();
    if topic.is_empty() {
        return Err(AppError::bad_request("topic is required"));
    }

    let (caller, quota) = admit(&state, req.identity.as_deref(), &origin).await?;
    let structured = state.gateway.suggest_content(topic, &caller.identity).await;

    Ok(Json(StructuredResponse { structured, quota }))
}

/// POST `/api/ai/check-uniqueness`
pub async fn check_uniqueness(
    State(state): State<AppState>,
    Origin(origin): Origin,
    Json(req): Json<UniquenessReq>,
) -> Result<Json<StructuredResponse<Uniqueness>>, AppError> {
    if req.title.trim().is_empty() {
        return Err(AppError::bad_request("title is required"));
    }

    let (caller, quota) = admit(&state, req.identity.as_deref(), &origin).await?;
    let structured = state
        .gateway
        .check_uniqueness(req.title.trim(), req.description.trim(), &caller.identity)
        .await;

    Ok(Json(StructuredResponse { structured, quota }))
}

/// GET `/api/ai/quota?identity=`: read-only, consumes nothing.
pub async fn quota_status(
    State(state): State<AppState>,
    Origin(origin): Origin,
    Query(q): Query<QuotaQuery>,
) -> Result<Json<QuotaStatus>, AppError> {
    let caller = state.quota.policy().classify(q.identity.as_deref(), &origin);
    Ok(Json(state.quota.status(&caller).await?))
}
