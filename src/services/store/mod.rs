//! Persistence interface shared by every service.
//!
//! Handlers and services only ever see `Arc<dyn Store>`; the concrete backend
//! is chosen once at startup from the database URL scheme.

use crate::models::{
    content_item::{ContentItem, ListItemsParams, NewContentItem},
    ledger::{Comment, LikeOutcome, SubscriptionOutcome, ViewOutcome},
    quota::UsageQuota,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::{path::Path, str::FromStr, sync::Arc};

mod postgres;
mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, sqlx::Error>;

/// Every operation the engagement ledger and quota gateway need from the
/// database. Methods that address a content item return `None` when the item
/// does not exist.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for logs and readiness output.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    /// Apply the embedded schema. Returns the number of statements executed.
    async fn migrate(&self) -> StoreResult<usize>;

    async fn insert_item(
        &self,
        item: &NewContentItem,
        moderation_status: &str,
    ) -> StoreResult<ContentItem>;

    async fn fetch_item(&self, id: &str) -> StoreResult<Option<ContentItem>>;

    async fn list_items(&self, params: &ListItemsParams) -> StoreResult<Vec<ContentItem>>;

    /// Delete an item together with its views, likes and comments.
    async fn delete_item(&self, id: &str) -> StoreResult<bool>;

    /// Count a view. `viewer = None` is an anonymous view and is always
    /// counted; a named viewer is counted once per item.
    async fn record_view(&self, item_id: &str, viewer: Option<&str>)
    -> StoreResult<Option<ViewOutcome>>;

    /// Flip the like state of `(item_id, liker)` and return the recounted total.
    async fn toggle_like(&self, item_id: &str, liker: &str) -> StoreResult<Option<LikeOutcome>>;

    /// Rewrite `likes` from the like records and raise `views` to at least
    /// the number of view records.
    async fn reconcile_counters(&self, item_id: &str) -> StoreResult<Option<ContentItem>>;

    async fn toggle_subscription(
        &self,
        subscriber: &str,
        channel: &str,
    ) -> StoreResult<SubscriptionOutcome>;

    async fn subscriber_count(&self, channel: &str) -> StoreResult<i64>;

    async fn insert_comment(
        &self,
        item_id: &str,
        author: &str,
        body: &str,
    ) -> StoreResult<Option<Comment>>;

    async fn list_comments(&self, item_id: &str) -> StoreResult<Vec<Comment>>;

    /// Atomically take one unit of `(identity, day)` budget if fewer than
    /// `limit` have been used. Returns the new count, or `None` when the
    /// budget is exhausted (in which case nothing is written).
    async fn consume_quota(
        &self,
        identity: &str,
        day: NaiveDate,
        limit: i64,
    ) -> StoreResult<Option<i64>>;

    async fn quota_usage(&self, identity: &str, day: NaiveDate)
    -> StoreResult<Option<UsageQuota>>;

    /// Drop quota rows for days strictly before `before`.
    async fn prune_quotas(&self, before: NaiveDate) -> StoreResult<u64>;
}

/// Split an embedded migration file into individual statements.
pub(crate) fn migration_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

/// Open the store named by `database_url`.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<Arc<dyn Store>> {
    if is_postgres_url(database_url) {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        tracing::info!("Using postgres store");
        return Ok(Arc::new(PostgresStore::new(pool)));
    }

    // Extract the local file path SQLx will use
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = sqlx::sqlite::SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true);
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .context("connecting to sqlite")?;
    tracing::info!("Using sqlite store at {}", db_path);
    Ok(Arc::new(SqliteStore::new(pool)))
}
