//! Artifact entity model.

use cronhost_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A file produced by a script run, persisted only after the file was
/// confirmed present on disk.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Artifact {
    pub id: DbId,
    pub execution_id: DbId,
    pub stored_filename: String,
    pub original_filename: String,
    pub size_bytes: i64,
    pub created_at: Timestamp,
}
