//! PostgreSQL implementation of [`Store`].
//!
//! Unlike SQLite, concurrent writers proceed in parallel here. Per-item
//! counters are protected by locking the item row (`FOR UPDATE`) before the
//! ledger rows are touched; per-pair toggles retry when a concurrent
//! transaction committed the opposite state between our delete and insert.

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
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../../migrations/postgres/0001_init.sql");

const ITEM_COLUMNS: &str = "id, owner, title, description, media_url, thumbnail_url, views, likes, \
     kind, category, moderation_status, created_at";

/// Upper bound on delete/insert rounds when racing another toggle of the same pair.
const TOGGLE_ATTEMPTS: usize = 4;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock the item row for the rest of the transaction. `false` if absent.
    async fn lock_item(tx: &mut Transaction<'static, Postgres>, item_id: &str) -> StoreResult<bool> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT id FROM content_items WHERE id = $1 FOR UPDATE",
        )
        .bind(item_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
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
             ) VALUES ($1, $2, $3, $4, $5, $6, 0, 0, $7, $8, $9, $10)
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
            "SELECT {ITEM_COLUMNS} FROM content_items WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_items(&self, params: &ListItemsParams) -> StoreResult<Vec<ContentItem>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ITEM_COLUMNS} FROM content_items WHERE TRUE"
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
        if !Self::lock_item(&mut tx, id).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        for table in ["view_records", "like_records", "comments"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE item_id = $1"))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM content_items WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn record_view(
        &self,
        item_id: &str,
        viewer: Option<&str>,
    ) -> StoreResult<Option<ViewOutcome>> {
        let Some(viewer) = viewer else {
            let views = sqlx::query_scalar::<_, i64>(
                "UPDATE content_items SET views = views + 1 WHERE id = $1 RETURNING views",
            )
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
            return Ok(views.map(|views| ViewOutcome {
                already_viewed: false,
                views,
            }));
        };

        let mut tx = self.pool.begin().await?;
        if !Self::lock_item(&mut tx, item_id).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let inserted = sqlx::query(
            "INSERT INTO view_records (item_id, viewer, viewed_at) VALUES ($1, $2, $3)
             ON CONFLICT (item_id, viewer) DO NOTHING",
        )
        .bind(item_id)
        .bind(viewer)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let (already_viewed, sql) = if inserted == 1 {
            (
                false,
                "UPDATE content_items SET views = views + 1 WHERE id = $1 RETURNING views",
            )
        } else {
            (true, "SELECT views FROM content_items WHERE id = $1")
        };
        let views = sqlx::query_scalar::<_, i64>(sql)
            .bind(item_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(ViewOutcome {
            already_viewed,
            views,
        }))
    }

    async fn toggle_like(&self, item_id: &str, liker: &str) -> StoreResult<Option<LikeOutcome>> {
        let mut tx = self.pool.begin().await?;
        if !Self::lock_item(&mut tx, item_id).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let removed = sqlx::query("DELETE FROM like_records WHERE item_id = $1 AND liker = $2")
            .bind(item_id)
            .bind(liker)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let state = if removed == 1 {
            LikeState::Unliked
        } else {
            // Every toggle on this item holds the row lock, so the pair cannot
            // have been inserted since the delete above.
            sqlx::query(
                "INSERT INTO like_records (item_id, liker, liked_at) VALUES ($1, $2, $3)
                 ON CONFLICT (item_id, liker) DO NOTHING",
            )
            .bind(item_id)
            .bind(liker)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
            LikeState::Liked
        };

        let like_count = sqlx::query_scalar::<_, i64>(
            "UPDATE content_items
             SET likes = (SELECT COUNT(*) FROM like_records WHERE item_id = $1)
             WHERE id = $1
             RETURNING likes",
        )
        .bind(item_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(LikeOutcome { state, like_count }))
    }

    async fn reconcile_counters(&self, item_id: &str) -> StoreResult<Option<ContentItem>> {
        sqlx::query_as::<_, ContentItem>(&format!(
            "UPDATE content_items SET
                likes = (SELECT COUNT(*) FROM like_records WHERE item_id = content_items.id),
                views = GREATEST(views, (SELECT COUNT(*) FROM view_records WHERE item_id = content_items.id))
             WHERE id = $1
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

        let mut state = None;
        for _ in 0..TOGGLE_ATTEMPTS {
            let removed = sqlx::query(
                "DELETE FROM subscription_records WHERE subscriber = $1 AND channel = $2",
            )
            .bind(subscriber)
            .bind(channel)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if removed == 1 {
                state = Some(SubscriptionState::Unsubscribed);
                break;
            }
            let inserted = sqlx::query(
                "INSERT INTO subscription_records (subscriber, channel, subscribed_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (subscriber, channel) DO NOTHING",
            )
            .bind(subscriber)
            .bind(channel)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if inserted == 1 {
                state = Some(SubscriptionState::Subscribed);
                break;
            }
            // A concurrent toggle committed a subscription between our delete
            // and insert; go round again and undo it.
        }
        let Some(state) = state else {
            tx.rollback().await?;
            return Err(sqlx::Error::Protocol(format!(
                "subscription toggle for ({subscriber}, {channel}) did not settle"
            )));
        };

        let subscriber_count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM subscription_records WHERE channel = $1",
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
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM subscription_records WHERE channel = $1",
        )
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
             SELECT $1, $2, $3, $4, $5 WHERE EXISTS (SELECT 1 FROM content_items WHERE id = $2)
             RETURNING id, item_id, author, body, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(item_id)
        .bind(author)
        .bind(body)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_comments(&self, item_id: &str) -> StoreResult<Vec<Comment>> {
        sqlx::query_as::<_, Comment>(
            "SELECT id, item_id, author, body, created_at FROM comments
             WHERE item_id = $1 ORDER BY created_at DESC",
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
            "INSERT INTO usage_quotas (identity, day, count) VALUES ($1, $2, 1)
             ON CONFLICT (identity, day) DO UPDATE SET count = usage_quotas.count + 1
             WHERE usage_quotas.count < $3
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
            "SELECT identity, day, count FROM usage_quotas WHERE identity = $1 AND day = $2",
        )
        .bind(identity)
        .bind(day)
        .fetch_optional(&self.pool)
        .await
    }

    async fn prune_quotas(&self, before: NaiveDate) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM usage_quotas WHERE day < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
