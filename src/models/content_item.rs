//! Represents a piece of uploaded media and its denormalised engagement counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A video or short uploaded by an identity.
///
/// `views` and `likes` are caches over the ledger tables: `likes` always
/// equals the number of like records, `views` is at least the number of view
/// records because anonymous views are counted without one.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    /// UUID rendered as text so both backends store it the same way.
    pub id: String,

    /// Identity of the uploader.
    pub owner: String,

    pub title: String,

    pub description: String,

    /// Location of the primary media file.
    pub media_url: String,

    pub thumbnail_url: String,

    pub views: i64,

    pub likes: i64,

    /// `video` or `short`.
    pub kind: String,

    pub category: String,

    /// Outcome of the moderation check at upload time (`safe` / `unsafe`).
    pub moderation_status: String,

    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the uploader when creating an item.
#[derive(Debug, Clone)]
pub struct NewContentItem {
    pub owner: String,
    pub title: String,
    pub description: String,
    pub media_url: String,
    pub thumbnail_url: String,
    pub kind: String,
    pub category: String,
}

/// Filters for listing items, newest first.
#[derive(Debug, Clone, Default)]
pub struct ListItemsParams {
    pub category: Option<String>,
    pub kind: Option<String>,
    pub limit: i64,
}
