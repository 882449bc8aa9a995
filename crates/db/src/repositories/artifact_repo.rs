//! Repository for the `artifacts` table.

use chrono::Utc;
use cronhost_core::artifact::ArtifactMarker;
use cronhost_core::types::DbId;
use sqlx::SqlitePool;

use crate::models::artifact::Artifact;

/// Column list for `artifacts` SELECT queries.
const COLUMNS: &str = "\
    id, execution_id, stored_filename, original_filename, size_bytes, created_at";

/// Provides query operations for artifact records.
pub struct ArtifactRepo;

impl ArtifactRepo {
    /// Persist a confirmed artifact marker against its execution.
    pub async fn create(
        pool: &SqlitePool,
        execution_id: DbId,
        marker: &ArtifactMarker,
    ) -> Result<Artifact, sqlx::Error> {
        let id: DbId = sqlx::query_scalar(
            "INSERT INTO artifacts \
                (execution_id, stored_filename, original_filename, size_bytes, created_at) \
             VALUES (?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(execution_id)
        .bind(&marker.stored_filename)
        .bind(&marker.original_filename)
        .bind(marker.size_bytes as i64)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        let query = format!("SELECT {COLUMNS} FROM artifacts WHERE id = ?");
        sqlx::query_as::<_, Artifact>(&query)
            .bind(id)
            .fetch_one(pool)
            .await
    }

    /// List artifacts recorded for one execution, oldest first.
    pub async fn list_by_execution(
        pool: &SqlitePool,
        execution_id: DbId,
    ) -> Result<Vec<Artifact>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM artifacts WHERE execution_id = ? ORDER BY id");
        sqlx::query_as::<_, Artifact>(&query)
            .bind(execution_id)
            .fetch_all(pool)
            .await
    }

    /// Number of artifacts recorded for one execution.
    pub async fn count_by_execution(
        pool: &SqlitePool,
        execution_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM artifacts WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_one(pool)
            .await
    }
}
