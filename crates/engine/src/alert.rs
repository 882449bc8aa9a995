//! Outcome notifications.

use async_trait::async_trait;
use cronhost_db::models::execution::Execution;
use cronhost_db::models::script::Script;
use tracing::{info, warn};

/// Delivery backend for execution outcome notifications.
///
/// Implementations return `true` when the notification was handed off, so
/// the executor knows whether to advance the throttle clock.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn send_failure(&self, script: &Script, execution: &Execution) -> bool;
    async fn send_success(&self, script: &Script, execution: &Execution) -> bool;
}

/// Alerter that writes outcomes to the log. The default backend; real
/// delivery channels plug in behind the same trait.
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn send_failure(&self, script: &Script, execution: &Execution) -> bool {
        warn!(
            script = %script.name,
            execution_id = execution.id,
            status = %execution.status_raw,
            error = execution.error_message.as_deref().unwrap_or(""),
            "script execution failed"
        );
        true
    }

    async fn send_success(&self, script: &Script, execution: &Execution) -> bool {
        info!(
            script = %script.name,
            execution_id = execution.id,
            duration_ms = execution.duration_ms,
            "script execution succeeded"
        );
        true
    }
}
