//! Repository for the `scripts` table.

use chrono::Utc;
use cronhost_core::types::{DbId, Timestamp};
use sqlx::SqlitePool;

use crate::models::script::{CreateScript, Script};

/// Column list for `scripts` SELECT queries.
const COLUMNS: &str = "\
    id, name, description, path, cron_expression, enabled, \
    python_version, dependencies, alert_on_failure, alert_on_success, \
    timeout_secs, misfire_grace_secs, working_directory, environment_vars, \
    last_alert_at, created_at, updated_at";

/// Provides query operations for script records.
pub struct ScriptRepo;

impl ScriptRepo {
    /// Insert a new script, applying column defaults for omitted fields.
    pub async fn create(pool: &SqlitePool, dto: &CreateScript) -> Result<Script, sqlx::Error> {
        let now = Utc::now();
        let id: DbId = sqlx::query_scalar(
            "INSERT INTO scripts (\
                name, description, path, cron_expression, enabled, \
                python_version, dependencies, alert_on_failure, alert_on_success, \
                timeout_secs, misfire_grace_secs, working_directory, environment_vars, \
                created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(&dto.name)
        .bind(dto.description.as_deref().unwrap_or(""))
        .bind(dto.path.as_deref().unwrap_or(""))
        .bind(dto.cron_expression.as_deref().unwrap_or("0 * * * *"))
        .bind(dto.enabled.unwrap_or(true))
        .bind(dto.python_version.as_deref().unwrap_or("3.12"))
        .bind(dto.dependencies.as_deref().unwrap_or(""))
        .bind(dto.alert_on_failure.unwrap_or(true))
        .bind(dto.alert_on_success.unwrap_or(false))
        .bind(dto.timeout_secs.unwrap_or(3600))
        .bind(dto.misfire_grace_secs.unwrap_or(60))
        .bind(dto.working_directory.as_deref().unwrap_or(""))
        .bind(dto.environment_vars.as_deref().unwrap_or(""))
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Find a script by its ID.
    pub async fn find_by_id(pool: &SqlitePool, id: DbId) -> Result<Option<Script>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM scripts WHERE id = ?");
        sqlx::query_as::<_, Script>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a script by its unique name.
    pub async fn find_by_name(
        pool: &SqlitePool,
        name: &str,
    ) -> Result<Option<Script>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM scripts WHERE name = ?");
        sqlx::query_as::<_, Script>(&query)
            .bind(name)
            .fetch_optional(pool)
            .await
    }

    /// List all enabled scripts, ordered by name.
    pub async fn list_enabled(pool: &SqlitePool) -> Result<Vec<Script>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM scripts WHERE enabled = 1 ORDER BY name");
        sqlx::query_as::<_, Script>(&query).fetch_all(pool).await
    }

    /// Flip the enabled flag.
    pub async fn set_enabled(
        pool: &SqlitePool,
        id: DbId,
        enabled: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE scripts SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record when an alert was last sent for this script (throttle state).
    pub async fn set_last_alert_at(
        pool: &SqlitePool,
        id: DbId,
        at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE scripts SET last_alert_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
