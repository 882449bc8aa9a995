//! Repository for the `executions` table.
//!
//! Terminal-status writes go through [`ExecutionRepo::finalize`], which only
//! touches rows still in `running`. The loser of a finalize race (for
//! example a natural completion racing a cancellation) falls back to
//! [`ExecutionRepo::backfill`], which fills missing diagnostic fields
//! without ever overwriting the status — first writer wins.

use chrono::Utc;
use cronhost_core::status::ExecutionStatus;
use cronhost_core::types::{DbId, Timestamp};
use sqlx::SqlitePool;

use crate::models::execution::{Execution, TriggerSource};

/// Column list for `executions` SELECT queries.
const COLUMNS: &str = "\
    id, script_id, status, triggered_by, is_test, \
    started_at, finished_at, duration_ms, exit_code, \
    stdout, stderr, error_message";

/// Provides query operations for execution records.
pub struct ExecutionRepo;

impl ExecutionRepo {
    /// Insert a new execution directly in `running` state, stamped now.
    pub async fn create_running(
        pool: &SqlitePool,
        script_id: DbId,
        triggered_by: TriggerSource,
        is_test: bool,
    ) -> Result<Execution, sqlx::Error> {
        let id: DbId = sqlx::query_scalar(
            "INSERT INTO executions (script_id, status, triggered_by, is_test, started_at) \
             VALUES (?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(script_id)
        .bind(ExecutionStatus::Running.as_str())
        .bind(triggered_by.as_str())
        .bind(is_test)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Find an execution by its ID.
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: DbId,
    ) -> Result<Option<Execution>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM executions WHERE id = ?");
        sqlx::query_as::<_, Execution>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List executions for a script, most recent first, paginated.
    pub async fn list_by_script(
        pool: &SqlitePool,
        script_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Execution>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM executions \
             WHERE script_id = ? \
             ORDER BY started_at DESC, id DESC \
             LIMIT ? OFFSET ?"
        );
        sqlx::query_as::<_, Execution>(&query)
            .bind(script_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Move a `running` execution to a terminal state.
    ///
    /// Returns `true` when this call won the transition. `false` means the
    /// row was no longer `running` (already finalized, typically by a
    /// cancellation); callers should then [`Self::backfill`] instead.
    pub async fn finalize(
        pool: &SqlitePool,
        id: DbId,
        status: ExecutionStatus,
        exit_code: Option<i64>,
        stdout: &str,
        stderr: &str,
        error_message: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let started: Option<Timestamp> =
            sqlx::query_scalar("SELECT started_at FROM executions WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        let duration_ms = started.map(|s| (now - s).num_milliseconds().max(0));

        let result = sqlx::query(
            "UPDATE executions SET \
                status = ?, \
                exit_code = ?, \
                stdout = ?, \
                stderr = ?, \
                error_message = ?, \
                finished_at = ?, \
                duration_ms = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(exit_code)
        .bind(stdout)
        .bind(stderr)
        .bind(error_message)
        .bind(now)
        .bind(duration_ms)
        .bind(id)
        .bind(ExecutionStatus::Running.as_str())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fill missing diagnostic fields on an already-finalized execution.
    ///
    /// Never touches the status. Used by the loser of a finalize race so a
    /// cancelled execution still ends up with its exit code and output.
    pub async fn backfill(
        pool: &SqlitePool,
        id: DbId,
        exit_code: Option<i64>,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE executions SET \
                exit_code = COALESCE(exit_code, ?), \
                stdout = CASE WHEN stdout = '' THEN ? ELSE stdout END, \
                stderr = CASE WHEN stderr = '' THEN ? ELSE stderr END, \
                finished_at = COALESCE(finished_at, ?) \
             WHERE id = ?",
        )
        .bind(exit_code)
        .bind(stdout)
        .bind(stderr)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Flip every `running` execution to `failed` with the given message.
    ///
    /// Startup cleanup for executions orphaned by a prior process death.
    /// Returns the number of rows affected; a second consecutive call is a
    /// no-op.
    pub async fn interrupt_running(
        pool: &SqlitePool,
        message: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE executions SET \
                status = ?, \
                error_message = ?, \
                finished_at = ? \
             WHERE status = ?",
        )
        .bind(ExecutionStatus::Failed.as_str())
        .bind(message)
        .bind(Utc::now())
        .bind(ExecutionStatus::Running.as_str())
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Number of executions currently persisted as `running`.
    pub async fn count_running(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM executions WHERE status = ?")
            .bind(ExecutionStatus::Running.as_str())
            .fetch_one(pool)
            .await
    }
}
