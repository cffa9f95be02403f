//! Channel subscription handlers.

use crate::{
    errors::AppError, handlers::content_handlers::IdentityReq,
    models::ledger::SubscriptionOutcome, state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberCountResponse {
    channel: String,
    subscriber_count: i64,
}

/// POST `/api/channels/{channel}/subscribe`: toggles the caller's subscription.
pub async fn toggle_subscription(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(req): Json<IdentityReq>,
) -> Result<Json<SubscriptionOutcome>, AppError> {
    let subscriber = req.identity.unwrap_or_default();
    let outcome = state
        .ledger
        .toggle_subscription(&subscriber, &channel)
        .await?;
    Ok(Json(outcome))
}

/// GET `/api/channels/{channel}/subscribers`
pub async fn subscriber_count(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<SubscriberCountResponse>, AppError> {
    let subscriber_count = state.ledger.subscriber_count(&channel).await?;
    Ok(Json(SubscriberCountResponse {
        channel,
        subscriber_count,
    }))
}
