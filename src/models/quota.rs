//! Daily generation budget per identity.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// "`identity` has made `count` generation requests on `day`".
///
/// The day is part of the key, so a new day simply starts a fresh row at 0.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UsageQuota {
    pub identity: String,
    pub day: NaiveDate,
    pub count: i64,
}
