//! SQLite implementation of [`Store`].
//!
//! SQLite allows one writer at a time. Every mutating transaction here opens
//! with a write statement so it takes the write lock up front, which makes
//! the read-check-then-write sequences below serial with respect to each other.

use super::{Store, StoreResult, migration_statements};
use crate::models::{
    content_item::{ContentItem, ListItemsParams, NewContentItem},
    ledger::{
        Comment, LikeOutcome, LikeState, SubscriptionOutcome, SubscriptionState, ViewOutcome,
    },
    quota::UsageQuota,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../../migrations/sqlite/0001_init.sql");

const ITEM_COLUMNS: &str = "id, owner, title, description, media_url, thumbnail_url, views, likes, \
     kind, category, moderation_status, created_at";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Single-connection in-memory store with the schema applied.
    #[cfg(test)]
    pub async fn in_memory() -> Self {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("open in-memory sqlite");
        let store = Self::new(pool);
        store.migrate().await.expect("apply schema");
        store
    }

    /// File-backed store under the temp dir with a multi-connection pool, for
    /// tests where writers must really contend.
    #[cfg(test)]
    pub async fn on_temp_file(max_connections: u32) -> Self {
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
        use std::time::Duration;

        let path = std::env::temp_dir().join(format!("engagement-hub-{}.db", Uuid::new_v4()));
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .expect("open temp-file sqlite");
        let store = Self::new(pool);
        store.migrate().await.expect("apply schema");
        store
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn migrate(&self) -> StoreResult<usize> {
        let statements = migration_statements(MIGRATION);
        for stmt in &statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(statements.len())
    }

    async fn insert_item(
        &self,
        item: &NewContentItem,
        moderation_status: &str,
    ) -> StoreResult<ContentItem> {
        sqlx::query_as::<_, ContentItem>(&format!(
            "INSERT INTO content_items (
                id, owner, title, description, media_url, thumbnail_url,
                views, likes, kind, category, moderation_status, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?, ?)
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&item.owner)
        .bind(&item.title)
        .bind(&item.description)
        .bind(&item.media_url)
        .bind(&item.thumbnail_url)
        .bind(&item.kind)
        .bind(&item.category)
        .bind(moderation_status)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
    }

    async fn fetch_item(&self, id: &str) -> StoreResult<Option<ContentItem>> {
        sqlx::query_as::<_, ContentItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM content_items WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_items(&self, params: &ListItemsParams) -> StoreResult<Vec<ContentItem>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ITEM_COLUMNS} FROM content_items WHERE 1 = 1"
        ));
        if let Some(category) = &params.category {
            builder.push(" AND category = ");
            builder.push_bind(category);
        }
        if let Some(kind) = &params.kind {
            builder.push(" AND kind = ");
            builder.push_bind(kind);
        }
        builder.push(" ORDER BY created_at DESC, id ASC LIMIT ");
        builder.push_bind(params.limit);

        builder.build_query_as().fetch_all(&self.pool).await
    }

    async fn delete_item(&self, id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM content_items WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        for table in ["view_records", "like_records", "comments"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE item_id = ?"))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn record_view(
        &self,
        item_id: &str,
        viewer: Option<&str>,
    ) -> StoreResult<Option<ViewOutcome>> {
        let mut tx = self.pool.begin().await?;

        let Some(viewer) = viewer else {
            let views = sqlx::query_scalar::<_, i64>(
                "UPDATE content_items SET views = views + 1 WHERE id = ? RETURNING views",
            )
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(views.map(|views| ViewOutcome {
                already_viewed: false,
                views,
            }));
        };

        let inserted = sqlx::query(
            "INSERT INTO view_records (item_id, viewer, viewed_at)
             SELECT ?, ?, ? WHERE EXISTS (SELECT 1 FROM content_items WHERE id = ?)
             ON CONFLICT (item_id, viewer) DO NOTHING",
        )
        .bind(item_id)
        .bind(viewer)
        .bind(Utc::now())
        .bind(item_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let outcome = if inserted == 1 {
            let views = sqlx::query_scalar::<_, i64>(
                "UPDATE content_items SET views = views + 1 WHERE id = ? RETURNING views",
            )
            .bind(item_id)
            .fetch_one(&mut *tx)
            .await?;
            Some(ViewOutcome {
                already_viewed: false,
                views,
            })
        } else {
            // Either the item is missing or this viewer was already counted.
            sqlx::query_scalar::<_, i64>("SELECT views FROM content_items WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|views| ViewOutcome {
                    already_viewed: true,
                    views,
                })
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn toggle_like(&self, item_id: &str, liker: &str) -> StoreResult<Option<LikeOutcome>> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM like_records WHERE item_id = ? AND liker = ?")
            .bind(item_id)
            .bind(liker)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let state = if removed == 1 {
            LikeState::Unliked
        } else {
            let inserted = sqlx::query(
                "INSERT INTO like_records (item_id, liker, liked_at)
                 SELECT ?, ?, ? WHERE EXISTS (SELECT 1 FROM content_items WHERE id = ?)
                 ON CONFLICT (item_id, liker) DO NOTHING",
            )
            .bind(item_id)
            .bind(liker)
            .bind(Utc::now())
            .bind(item_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if inserted == 0 {
                // The write lock is held, so a zero here can only mean the item is gone.
                tx.rollback().await?;
                return Ok(None);
            }
            LikeState::Liked
        };

        let like_count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM like_records WHERE item_id = ?")
                .bind(item_id)
                .fetch_one(&mut *tx)
                .await?;

        let updated = sqlx::query("UPDATE content_items SET likes = ? WHERE id = ?")
            .bind(like_count)
            .bind(item_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(LikeOutcome { state, like_count }))
    }

    async fn reconcile_counters(&self, item_id: &str) -> StoreResult<Option<ContentItem>> {
        sqlx::query_as::<_, ContentItem>(&format!(
            "UPDATE content_items SET
                likes = (SELECT COUNT(*) FROM like_records WHERE item_id = content_items.id),
                views = MAX(views, (SELECT COUNT(*) FROM view_records WHERE item_id = content_items.id))
             WHERE id = ?
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn toggle_subscription(
        &self,
        subscriber: &str,
        channel: &str,
    ) -> StoreResult<SubscriptionOutcome> {
        let mut tx = self.pool.begin().await?;

        let removed =
            sqlx::query("DELETE FROM subscription_records WHERE subscriber = ? AND channel = ?")
                .bind(subscriber)
                .bind(channel)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        let state = if removed == 1 {
            SubscriptionState::Unsubscribed
        } else {
            sqlx::query(
                "INSERT INTO subscription_records (subscriber, channel, subscribed_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT (subscriber, channel) DO NOTHING",
            )
            .bind(subscriber)
            .bind(channel)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
            SubscriptionState::Subscribed
        };

        let subscriber_count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM subscription_records WHERE channel = ?",
        )
        .bind(channel)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SubscriptionOutcome {
            state,
            subscriber_count,
        })
    }

    async fn subscriber_count(&self, channel: &str) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM subscription_records WHERE channel = ?")
            .bind(channel)
            .fetch_one(&self.pool)
            .await
    }

    async fn insert_comment(
        &self,
        item_id: &str,
        author: &str,
        body: &str,
    ) -> StoreResult<Option<Comment>> {
        sqlx::query_as::<_, Comment>(
            "INSERT INTO comments (id, item_id, author, body, created_at)
             SELECT ?, ?, ?, ?, ? WHERE EXISTS (SELECT 1 FROM content_items WHERE id = ?)
             RETURNING id, item_id, author, body, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(item_id)
        .bind(author)
        .bind(body)
        .bind(Utc::now())
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_comments(&self, item_id: &str) -> StoreResult<Vec<Comment>> {
        sqlx::query_as::<_, Comment>(
            "SELECT id, item_id, author, body, created_at FROM comments
             WHERE item_id = ? ORDER BY created_at DESC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn consume_quota(
        &self,
        identity: &str,
        day: NaiveDate,
        limit: i64,
    ) -> StoreResult<Option<i64>> {
        if limit <= 0 {
            return Ok(None);
        }
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO usage_quotas (identity, day, count) VALUES (?, ?, 1)
             ON CONFLICT (identity, day) DO UPDATE SET count = usage_quotas.count + 1
             WHERE usage_quotas.count < ?
             RETURNING count",
        )
        .bind(identity)
        .bind(day)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await
    }

    async fn quota_usage(
        &self,
        identity: &str,
        day: NaiveDate,
    ) -> StoreResult<Option<UsageQuota>> {
        sqlx::query_as::<_, UsageQuota>(
            "SELECT identity, day, count FROM usage_quotas WHERE identity = ? AND day = ?",
        )
        .bind(identity)
        .bind(day)
        .fetch_optional(&self.pool)
        .await
    }

    async fn prune_quotas(&self, before: NaiveDate) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM usage_quotas WHERE day < ?")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_item(owner: &str) -> NewContentItem {
        NewContentItem {
            owner: owner.into(),
            title: "Morning routine".into(),
            description: "Episode 04".into(),
            media_url: "https://cdn.example.com/v.mp4".into(),
            thumbnail_url: "https://cdn.example.com/v.jpg".into(),
            kind: "video".into(),
            category: "Tech".into(),
        }
    }

    #[tokio::test]
    async fn named_view_is_counted_once() {
        let store = SqliteStore::in_memory().await;
        let item = store.insert_item(&new_item("owner"), "safe").await.unwrap();

        let first = store.record_view(&item.id, Some("alice")).await.unwrap().unwrap();
        let second = store.record_view(&item.id, Some("alice")).await.unwrap().unwrap();

        assert!(!first.already_viewed);
        assert_eq!(first.views, 1);
        assert!(second.already_viewed);
        assert_eq!(second.views, 1);
    }

    #[tokio::test]
    async fn anonymous_views_always_count() {
        let store = SqliteStore::in_memory().await;
        let item = store.insert_item(&new_item("owner"), "safe").await.unwrap();

        store.record_view(&item.id, None).await.unwrap();
        let outcome = store.record_view(&item.id, None).await.unwrap().unwrap();

        assert!(!outcome.already_viewed);
        assert_eq!(outcome.views, 2);
    }

    #[tokio::test]
    async fn missing_item_yields_none() {
        let store = SqliteStore::in_memory().await;

        assert!(store.record_view("nope", Some("alice")).await.unwrap().is_none());
        assert!(store.record_view("nope", None).await.unwrap().is_none());
        assert!(store.toggle_like("nope", "alice").await.unwrap().is_none());
        assert!(store.insert_comment("nope", "alice", "hi").await.unwrap().is_none());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM like_records")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn like_toggle_parity() {
        let store = SqliteStore::in_memory().await;
        let item = store.insert_item(&new_item("owner"), "safe").await.unwrap();

        for round in 1..=5 {
            let outcome = store.toggle_like(&item.id, "bob").await.unwrap().unwrap();
            if round % 2 == 1 {
                assert_eq!(outcome.state, LikeState::Liked);
                assert_eq!(outcome.like_count, 1);
            } else {
                assert_eq!(outcome.state, LikeState::Unliked);
                assert_eq!(outcome.like_count, 0);
            }
        }

        let stored = store.fetch_item(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.likes, 1);
    }

    #[tokio::test]
    async fn reconcile_repairs_drifted_counters() {
        let store = SqliteStore::in_memory().await;
        let item = store.insert_item(&new_item("owner"), "safe").await.unwrap();
        store.toggle_like(&item.id, "a").await.unwrap();
        store.record_view(&item.id, Some("a")).await.unwrap();
        store.record_view(&item.id, Some("b")).await.unwrap();

        sqlx::query("UPDATE content_items SET likes = 9, views = 0 WHERE id = ?")
            .bind(&item.id)
            .execute(&store.pool)
            .await
            .unwrap();

        let fixed = store.reconcile_counters(&item.id).await.unwrap().unwrap();
        assert_eq!(fixed.likes, 1);
        assert_eq!(fixed.views, 2);
        assert!(store.reconcile_counters("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cascades_ledger_rows() {
        let store = SqliteStore::in_memory().await;
        let item = store.insert_item(&new_item("owner"), "safe").await.unwrap();
        store.toggle_like(&item.id, "a").await.unwrap();
        store.record_view(&item.id, Some("a")).await.unwrap();
        store.insert_comment(&item.id, "a", "nice").await.unwrap();

        assert!(store.delete_item(&item.id).await.unwrap());
        assert!(!store.delete_item(&item.id).await.unwrap());

        for table in ["view_records", "like_records", "comments"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&store.pool)
                .await
                .unwrap();
            assert_eq!(count, 0, "{table} should be empty");
        }
    }

    #[tokio::test]
    async fn list_filters_by_category_and_kind() {
        let store = SqliteStore::in_memory().await;
        store.insert_item(&new_item("a"), "safe").await.unwrap();
        let mut short = new_item("b");
        short.kind = "short".into();
        short.category = "Gaming".into();
        store.insert_item(&short, "safe").await.unwrap();

        let all = store
            .list_items(&ListItemsParams {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let gaming = store
            .list_items(&ListItemsParams {
                category: Some("Gaming".into()),
                kind: Some("short".into()),
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(gaming.len(), 1);
        assert_eq!(gaming[0].owner, "b");
    }

    #[tokio::test]
    async fn quota_upsert_stops_at_limit() {
        let store = SqliteStore::in_memory().await;
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();

        assert_eq!(store.consume_quota("carol", day, 2).await.unwrap(), Some(1));
        assert_eq!(store.consume_quota("carol", day, 2).await.unwrap(), Some(2));
        assert_eq!(store.consume_quota("carol", day, 2).await.unwrap(), None);
        assert_eq!(
            store.quota_usage("carol", day).await.unwrap().map(|q| q.count),
            Some(2)
        );
        assert_eq!(store.consume_quota("carol", day, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn prune_drops_only_old_days() {
        let store = SqliteStore::in_memory().await;
        let old = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let recent = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        store.consume_quota("dave", old, 5).await.unwrap();
        store.consume_quota("dave", recent, 5).await.unwrap();

        let removed = store
            .prune_quotas(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap())
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(store.quota_usage("dave", old).await.unwrap().is_none());
        assert!(store.quota_usage("dave", recent).await.unwrap().is_some());
    }
}
