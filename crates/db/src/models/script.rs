//! Script entity model and insert DTO.

use cronhost_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered script: the immutable snapshot the engine reads at
/// execution start.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Script {
    pub id: DbId,
    pub name: String,
    pub description: String,
    /// Script file location; absolute, or relative to the scripts directory.
    /// Empty for UI-created scripts stored at `<scripts_dir>/<name>/script.py`.
    pub path: String,
    /// 5-field cron trigger expression.
    pub cron_expression: String,
    pub enabled: bool,
    /// Interpreter version requirement for the isolated environment.
    pub python_version: String,
    /// Newline-delimited dependency specifiers.
    pub dependencies: String,
    pub alert_on_failure: bool,
    pub alert_on_success: bool,
    pub timeout_secs: i64,
    /// Allowed lateness for a missed trigger fire before it is skipped.
    pub misfire_grace_secs: i64,
    pub working_directory: String,
    /// JSON object or KEY=VALUE lines; see `cronhost_core::envvars`.
    pub environment_vars: String,
    /// Alert throttle bookkeeping, shared across outcome kinds.
    pub last_alert_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for inserting a new script.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateScript {
    pub name: String,
    pub description: Option<String>,
    pub path: Option<String>,
    pub cron_expression: Option<String>,
    pub enabled: Option<bool>,
    pub python_version: Option<String>,
    pub dependencies: Option<String>,
    pub alert_on_failure: Option<bool>,
    pub alert_on_success: Option<bool>,
    pub timeout_secs: Option<i64>,
    pub misfire_grace_secs: Option<i64>,
    pub working_directory: Option<String>,
    pub environment_vars: Option<String>,
}

impl CreateScript {
    /// Minimal DTO with defaults for everything but the name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            path: None,
            cron_expression: None,
            enabled: None,
            python_version: None,
            dependencies: None,
            alert_on_failure: None,
            alert_on_success: None,
            timeout_secs: None,
            misfire_grace_secs: None,
            working_directory: None,
            environment_vars: None,
        }
    }
}
