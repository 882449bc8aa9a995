//! Execution entity model.

use std::fmt;

use cronhost_core::status::ExecutionStatus;
use cronhost_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// What caused an execution to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Scheduler,
    Manual,
    Test,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduler => "scheduler",
            Self::Manual => "manual",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single script execution record with full I/O capture.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Execution {
    pub id: DbId,
    pub script_id: DbId,
    /// Status column text; see [`Execution::status`].
    #[sqlx(rename = "status")]
    pub status_raw: String,
    pub triggered_by: String,
    pub is_test: bool,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub error_message: Option<String>,
}

impl Execution {
    /// Typed view of the status column.
    pub fn status(&self) -> Option<ExecutionStatus> {
        ExecutionStatus::parse(&self.status_raw)
    }

    /// True once the execution reached any of the four terminal states.
    pub fn is_finished(&self) -> bool {
        self.status().is_some_and(|s| s.is_terminal())
    }
}
