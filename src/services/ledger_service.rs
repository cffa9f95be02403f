//! Engagement ledger: views, likes, subscriptions, comments and the content
//! items they hang off.
//!
//! Input validation and not-found policy live here; atomicity of each
//! read-check-then-write sequence is delegated to the store.

use crate::{
    models::{
        content_item::{ContentItem, ListItemsParams, NewContentItem},
        ledger::{Comment, LikeOutcome, SubscriptionOutcome, ViewOutcome},
    },
    services::{
        gateway::{GenerationGateway, Verdict},
        rules::RuleBook,
        store::Store,
    },
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_LIST_LIMIT: i64 = 20;
pub const MAX_LIST_LIMIT: i64 = 100;

const CONTENT_KINDS: [&str; 2] = ["video", "short"];

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("content item `{0}` not found")]
    ItemNotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("content violates the rule book: `{0}` is not allowed")]
    RuleViolation(String),
    #[error("content was flagged as unsafe by moderation")]
    ModerationRejected,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Trimmed value of a required field, or `InvalidInput` naming it.
fn required<'a>(field: &str, value: &'a str) -> LedgerResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidInput(format!("`{field}` is required")));
    }
    Ok(trimmed)
}

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn Store>,
    rules: Arc<RuleBook>,
    gateway: GenerationGateway,
}

impl LedgerService {
    pub fn new(store: Arc<dyn Store>, rules: RuleBook, gateway: GenerationGateway) -> Self {
        Self {
            store,
            rules: Arc::new(rules),
            gateway,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Count a view of `item_id`. Blank or missing viewers are anonymous and
    /// always counted; named viewers are counted once per item.
    pub async fn record_view(&self, item_id: &str, viewer: Option<&str>) -> LedgerResult<ViewOutcome> {
        let item_id = required("itemId", item_id)?;
        let viewer = viewer.map(str::trim).filter(|v| !v.is_empty());
        self.store
            .record_view(item_id, viewer)
            .await?
            .ok_or_else(|| LedgerError::ItemNotFound(item_id.to_string()))
    }

    pub async fn toggle_like(&self, item_id: &str, liker: &str) -> LedgerResult<LikeOutcome> {
        let item_id = required("itemId", item_id)?;
        let liker = required("identity", liker)?;
        self.store
            .toggle_like(item_id, liker)
            .await?
            .ok_or_else(|| LedgerError::ItemNotFound(item_id.to_string()))
    }

    pub async fn toggle_subscription(
        &self,
        subscriber: &str,
        channel: &str,
    ) -> LedgerResult<SubscriptionOutcome> {
        let subscriber = required("identity", subscriber)?;
        let channel = required("channel", channel)?;
        Ok(self.store.toggle_subscription(subscriber, channel).await?)
    }

    pub async fn subscriber_count(&self, channel: &str) -> LedgerResult<i64> {
        let channel = required("channel", channel)?;
        Ok(self.store.subscriber_count(channel).await?)
    }

    /// Validate, rule-check and moderate an upload, then store it.
    pub async fn create_item(&self, mut item: NewContentItem) -> LedgerResult<ContentItem> {
        item.owner = required("identity", &item.owner)?.to_string();
        item.title = required("title", &item.title)?.to_string();
        item.media_url = required("mediaUrl", &item.media_url)?.to_string();
        item.description = item.description.trim().to_string();
        item.kind = item.kind.trim().to_ascii_lowercase();
        if item.kind.is_empty() {
            item.kind = "video".into();
        }
        if !CONTENT_KINDS.contains(&item.kind.as_str()) {
            return Err(LedgerError::InvalidInput(format!(
                "`kind` must be one of {}",
                CONTENT_KINDS.join(", ")
            )));
        }
        if item.category.trim().is_empty() {
            item.category = "All".into();
        }

        if let Some(term) = self
            .rules
            .first_violation([item.title.as_str(), item.description.as_str()])
        {
            info!(owner = %item.owner, %term, "upload blocked by rule book");
            return Err(LedgerError::RuleViolation(term.to_string()));
        }

        let verdict = self.gateway.moderate(&item.title, &item.description).await;
        if verdict.degraded {
            warn!(owner = %item.owner, "moderation unavailable, upload accepted as safe");
        }
        if verdict.result == Verdict::Unsafe {
            info!(owner = %item.owner, "upload rejected by moderation");
            return Err(LedgerError::ModerationRejected);
        }

        Ok(self.store.insert_item(&item, verdict.result.as_str()).await?)
    }

    pub async fn get_item(&self, id: &str) -> LedgerResult<ContentItem> {
        let id = required("itemId", id)?;
        self.store
            .fetch_item(id)
            .await?
            .ok_or_else(|| LedgerError::ItemNotFound(id.to_string()))
    }

    pub async fn list_items(
        &self,
        category: Option<String>,
        kind: Option<String>,
        limit: Option<i64>,
    ) -> LedgerResult<Vec<ContentItem>> {
        let params = ListItemsParams {
            // "All" is the catch-all category, not a filter.
            category: category.filter(|c| !c.trim().is_empty() && c != "All"),
            kind: kind.filter(|k| !k.trim().is_empty()),
            limit: limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT),
        };
        Ok(self.store.list_items(&params).await?)
    }

    /// Delete an item. Only its owner or an admin may do so.
    pub async fn delete_item(
        &self,
        id: &str,
        requester: &str,
        requester_is_admin: bool,
    ) -> LedgerResult<()> {
        let requester = required("identity", requester)?;
        let item = self.get_item(id).await?;
        if item.owner != requester && !requester_is_admin {
            return Err(LedgerError::Forbidden(
                "only the owner or an admin may delete this item".into(),
            ));
        }
        if !self.store.delete_item(&item.id).await? {
            return Err(LedgerError::ItemNotFound(item.id));
        }
        info!(item = %item.id, %requester, "content item deleted");
        Ok(())
    }

    pub async fn add_comment(&self, item_id: &str, author: &str, body: &str) -> LedgerResult<Comment> {
        let item_id = required("itemId", item_id)?;
        let author = required("identity", author)?;
        let body = required("body", body)?;
        if let Some(term) = self.rules.first_violation([body]) {
            info!(%author, %term, "comment blocked by rule book");
            return Err(LedgerError::RuleViolation(term.to_string()));
        }
        self.store
            .insert_comment(item_id, author, body)
            .await?
            .ok_or_else(|| LedgerError::ItemNotFound(item_id.to_string()))
    }

    pub async fn list_comments(&self, item_id: &str) -> LedgerResult<Vec<Comment>> {
        let item_id = required("itemId", item_id)?;
        self.get_item(item_id).await?;
        Ok(self.store.list_comments(item_id).await?)
    }

    pub async fn reconcile(&self, item_id: &str) -> LedgerResult<ContentItem> {
        let item_id = required("itemId", item_id)?;
        self.store
            .reconcile_counters(item_id)
            .await?
            .ok_or_else(|| LedgerError::ItemNotFound(item_id.to_string()))
    }
}
