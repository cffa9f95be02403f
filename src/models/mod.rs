//! Core data models for the engagement service.
//!
//! These entities map to database tables via `sqlx::FromRow` and serialize
//! as JSON via `serde`.

pub mod content_item;
pub mod ledger;
pub mod quota;
