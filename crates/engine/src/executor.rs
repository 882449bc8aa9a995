//! Script process execution and lifecycle supervision.
//!
//! [`Executor::execute`] admits at most one execution per script, records a
//! `running` row, then hands off to a background task that spawns the
//! interpreter, streams output line-by-line, enforces the timeout, and
//! finalizes the row exactly once. Cancellation writes the terminal status
//! first and only then signals the process, so the run task's own finalize
//! loses the guarded update and backfills diagnostics instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use cronhost_core::artifact::ArtifactMarker;
use cronhost_core::envvars::parse_env_overrides;
use cronhost_core::output::truncate_output;
use cronhost_core::status::ExecutionStatus;
use cronhost_core::types::DbId;
use cronhost_db::models::execution::TriggerSource;
use cronhost_db::models::script::Script;
use cronhost_db::repositories::artifact_repo::ArtifactRepo;
use cronhost_db::repositories::execution_repo::ExecutionRepo;
use cronhost_db::repositories::script_repo::ScriptRepo;
use cronhost_db::SqlitePool;
use cronhost_events::{OutputChannels, OutputEvent, StreamKind};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alert::Alerter;
use crate::config::EngineConfig;
use crate::environment::EnvironmentManager;
use crate::locks::{KeyedLocks, RunningSet};

/// Errors surfaced to the caller of [`Executor::execute`].
///
/// Everything after admission is handled inside the run task and lands in
/// the execution record, not here.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("script {0} already has an execution in flight")]
    AlreadyRunning(DbId),
    #[error("script {0} not found")]
    ScriptNotFound(DbId),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// How the supervised process ended.
enum RunOutcome {
    Exited(i64),
    TimedOut,
    Cancelled,
}

struct ExecutorInner {
    pool: SqlitePool,
    config: Arc<EngineConfig>,
    environment: Arc<EnvironmentManager>,
    output_channels: Arc<OutputChannels>,
    running: RunningSet,
    admission_locks: KeyedLocks<DbId>,
    /// Live cancellation handles, keyed by execution id.
    cancel_tokens: Mutex<HashMap<DbId, CancellationToken>>,
    alerter: Arc<dyn Alerter>,
}

/// Supervises script executions. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl Executor {
    pub fn new(
        pool: SqlitePool,
        config: Arc<EngineConfig>,
        environment: Arc<EnvironmentManager>,
        output_channels: Arc<OutputChannels>,
        running: RunningSet,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                pool,
                config,
                environment,
                output_channels,
                running,
                admission_locks: KeyedLocks::new(),
                cancel_tokens: Mutex::new(HashMap::new()),
                alerter,
            }),
        }
    }

    /// Whether the script currently has an execution in flight.
    pub fn is_running(&self, script_id: DbId) -> bool {
        self.inner.running.contains(script_id)
    }

    /// Channels carrying live output, keyed by execution id.
    pub fn output_channels(&self) -> &Arc<OutputChannels> {
        &self.inner.output_channels
    }

    /// Start an execution for `script_id`.
    ///
    /// Admission happens under a per-script lock: if the script already has
    /// an execution in flight this fails fast with `AlreadyRunning` without
    /// queueing. On success the execution id is returned immediately and
    /// the run continues in a background task.
    pub async fn execute(
        &self,
        script_id: DbId,
        triggered_by: TriggerSource,
        is_test: bool,
    ) -> Result<DbId, ExecuteError> {
        let admission = self.inner.admission_locks.get(&script_id);
        {
            let _guard = admission.lock().await;
            if !self.inner.running.insert(script_id) {
                return Err(ExecuteError::AlreadyRunning(script_id));
            }
        }

        // From here on the running marker must be released on every early
        // exit; the run task releases it on the normal path.
        let script = match ScriptRepo::find_by_id(&self.inner.pool, script_id).await {
            Ok(Some(script)) => script,
            Ok(None) => {
                self.inner.running.remove(script_id);
                return Err(ExecuteError::ScriptNotFound(script_id));
            }
            Err(e) => {
                self.inner.running.remove(script_id);
                return Err(e.into());
            }
        };

        let execution =
            match ExecutionRepo::create_running(&self.inner.pool, script_id, triggered_by, is_test)
                .await
            {
                Ok(execution) => execution,
                Err(e) => {
                    self.inner.running.remove(script_id);
                    return Err(e.into());
                }
            };
        let execution_id = execution.id;

        self.inner.output_channels.open(execution_id);
        let token = CancellationToken::new();
        self.inner
            .cancel_tokens
            .lock()
            .expect("token map poisoned")
            .insert(execution_id, token.clone());

        info!(
            script = %script.name,
            execution_id,
            trigger = %triggered_by,
            "execution started"
        );

        let this = self.clone();
        tokio::spawn(async move {
            this.run(script, execution_id, token).await;
        });

        Ok(execution_id)
    }

    /// Cancel a running execution.
    ///
    /// Writes the `cancelled` terminal status first and signals the process
    /// second; returns `true` only when this call won the status
    /// transition. Unknown or already-finished executions return `false`.
    pub async fn cancel(&self, execution_id: DbId) -> bool {
        let token = {
            let tokens = self.inner.cancel_tokens.lock().expect("token map poisoned");
            tokens.get(&execution_id).cloned()
        };
        let Some(token) = token else {
            return false;
        };

        let won = match ExecutionRepo::finalize(
            &self.inner.pool,
            execution_id,
            ExecutionStatus::Cancelled,
            None,
            "",
            "",
            Some("Cancelled by user"),
        )
        .await
        {
            Ok(won) => won,
            Err(e) => {
                error!(execution_id, error = %e, "cancel: finalize failed");
                false
            }
        };
        token.cancel();
        if won {
            info!(execution_id, "execution cancelled");
        }
        won
    }

    /// Flip executions orphaned by a prior process death to `failed`.
    /// Called once at startup, before the scheduler starts firing.
    pub async fn cleanup_stale_executions(&self) -> Result<u64, sqlx::Error> {
        let fixed = ExecutionRepo::interrupt_running(
            &self.inner.pool,
            "Execution interrupted by service restart",
        )
        .await?;
        if fixed > 0 {
            warn!(count = fixed, "marked stale running executions as failed");
        }
        Ok(fixed)
    }

    /// Background supervision of one execution. Never panics the task;
    /// unexpected internal failures finalize the row as `failed`.
    async fn run(&self, script: Script, execution_id: DbId, token: CancellationToken) {
        let result = self.run_inner(&script, execution_id, &token).await;
        if let Err(e) = result {
            error!(execution_id, error = %e, "execution supervision failed");
            let finalize = ExecutionRepo::finalize(
                &self.inner.pool,
                execution_id,
                ExecutionStatus::Failed,
                None,
                "",
                "",
                Some(&format!("Internal error: {e}")),
            )
            .await;
            if let Err(e) = finalize {
                error!(execution_id, error = %e, "could not finalize failed execution");
            }
        }

        self.inner.running.remove(script.id);
        self.inner
            .cancel_tokens
            .lock()
            .expect("token map poisoned")
            .remove(&execution_id);
        self.inner
            .output_channels
            .publish(execution_id, OutputEvent::done());
        self.inner.output_channels.close(execution_id);
    }

    async fn run_inner(
        &self,
        script: &Script,
        execution_id: DbId,
        token: &CancellationToken,
    ) -> Result<(), sqlx::Error> {
        let script_path = self.resolve_script_path(script);
        if !script_path.exists() {
            return self
                .finish_failed(
                    script,
                    execution_id,
                    format!("Script file not found: {}", script_path.display()),
                )
                .await;
        }

        if !self.inner.environment.env_exists(&script.name) {
            info!(script = %script.name, "environment missing, provisioning before run");
            if let Err(e) = self
                .inner
                .environment
                .setup_environment(&script.name, &script.python_version, &script.dependencies)
                .await
            {
                return self
                    .finish_failed(
                        script,
                        execution_id,
                        format!("Failed to set up environment: {e}"),
                    )
                    .await;
            }
        }

        let python = self.inner.environment.python_path(&script.name);
        if !python.exists() {
            return self
                .finish_failed(
                    script,
                    execution_id,
                    format!("Interpreter not found at {}", python.display()),
                )
                .await;
        }

        let mut command = Command::new(&python);
        command
            .arg("-u") // unbuffered, so output streams line by line
            .arg(&script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !script.working_directory.is_empty() {
            command.current_dir(&script.working_directory);
        } else if let Some(parent) = script_path.parent() {
            command.current_dir(parent);
        }
        for (key, value) in parse_env_overrides(&script.environment_vars) {
            command.env(key, value);
        }
        // Absolute, so the path survives the child's working directory.
        let artifacts_dir = std::path::absolute(&self.inner.config.artifacts_dir)
            .unwrap_or_else(|_| self.inner.config.artifacts_dir.clone());
        command
            .env("CRONHOST_SCRIPT_ID", script.id.to_string())
            .env("CRONHOST_EXECUTION_ID", execution_id.to_string())
            .env("CRONHOST_SCRIPT_NAME", &script.name)
            .env("CRONHOST_ARTIFACTS_DIR", &artifacts_dir);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return self
                    .finish_failed(
                        script,
                        execution_id,
                        format!("Failed to spawn interpreter: {e}"),
                    )
                    .await;
            }
        };

        let stdout_task = tokio::spawn(drain_stream(
            child.stdout.take(),
            StreamKind::Stdout,
            self.inner.output_channels.clone(),
            execution_id,
        ));
        let stderr_task = tokio::spawn(drain_stream(
            child.stderr.take(),
            StreamKind::Stderr,
            self.inner.output_channels.clone(),
            execution_id,
        ));

        let timeout_secs = if script.timeout_secs > 0 {
            script.timeout_secs
        } else {
            self.inner.config.default_timeout_secs
        };
        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => RunOutcome::Exited(status.code().unwrap_or(-1) as i64),
                Err(e) => {
                    warn!(execution_id, error = %e, "wait on child process failed");
                    RunOutcome::Exited(-1)
                }
            },
            _ = tokio::time::sleep(Duration::from_secs(timeout_secs as u64)) => {
                warn!(execution_id, timeout_secs, "execution timed out, killing process");
                if let Err(e) = child.kill().await {
                    warn!(execution_id, error = %e, "kill after timeout failed");
                }
                RunOutcome::TimedOut
            }
            _ = token.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(execution_id, error = %e, "kill after cancellation failed");
                }
                RunOutcome::Cancelled
            }
        };

        // The pipes hit EOF once the process is gone; both drains finish.
        let (stdout_buf, markers) = stdout_task.await.unwrap_or_default();
        let (stderr_buf, _) = stderr_task.await.unwrap_or_default();
        let max = self.inner.config.max_log_bytes;
        let stdout_text = truncate_output(&stdout_buf, max);
        let stderr_text = truncate_output(&stderr_buf, max);

        match outcome {
            RunOutcome::Exited(code) => {
                let status = if code == 0 {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Failed
                };
                self.finish(
                    script,
                    execution_id,
                    status,
                    Some(code),
                    &stdout_text,
                    &stderr_text,
                    None,
                )
                .await?;
            }
            RunOutcome::TimedOut => {
                self.finish(
                    script,
                    execution_id,
                    ExecutionStatus::Timeout,
                    None,
                    &stdout_text,
                    &stderr_text,
                    Some(format!("Script timed out after {timeout_secs} seconds")),
                )
                .await?;
            }
            RunOutcome::Cancelled => {
                self.finish(
                    script,
                    execution_id,
                    ExecutionStatus::Cancelled,
                    None,
                    &stdout_text,
                    &stderr_text,
                    Some("Cancelled by user".to_string()),
                )
                .await?;
            }
        }

        self.record_artifacts(execution_id, &markers).await;
        Ok(())
    }

    async fn finish_failed(
        &self,
        script: &Script,
        execution_id: DbId,
        message: String,
    ) -> Result<(), sqlx::Error> {
        self.finish(
            script,
            execution_id,
            ExecutionStatus::Failed,
            None,
            "",
            "",
            Some(message),
        )
        .await
    }

    /// Finalize the execution row and fire any due alert.
    ///
    /// Losing the guarded status transition means a cancellation got there
    /// first; diagnostics are backfilled and no alert fires, since the
    /// recorded outcome is the cancellation, not ours.
    async fn finish(
        &self,
        script: &Script,
        execution_id: DbId,
        status: ExecutionStatus,
        exit_code: Option<i64>,
        stdout: &str,
        stderr: &str,
        error_message: Option<String>,
    ) -> Result<(), sqlx::Error> {
        let won = ExecutionRepo::finalize(
            &self.inner.pool,
            execution_id,
            status,
            exit_code,
            stdout,
            stderr,
            error_message.as_deref(),
        )
        .await?;

        if !won {
            ExecutionRepo::backfill(&self.inner.pool, execution_id, exit_code, stdout, stderr)
                .await?;
            info!(execution_id, intended = %status, "finalize lost to earlier transition, backfilled");
            return Ok(());
        }

        info!(
            script = %script.name,
            execution_id,
            status = %status,
            exit_code,
            "execution finished"
        );
        self.maybe_alert(script, execution_id, status).await;
        Ok(())
    }

    /// Send an outcome notification when the script asks for one and the
    /// per-script throttle window has elapsed.
    async fn maybe_alert(&self, script: &Script, execution_id: DbId, status: ExecutionStatus) {
        let wants = match status {
            ExecutionStatus::Failed | ExecutionStatus::Timeout => script.alert_on_failure,
            ExecutionStatus::Success => script.alert_on_success,
            _ => false,
        };
        if !wants {
            return;
        }

        // Re-read for fresh throttle state; the in-memory snapshot may be
        // minutes old by now.
        let fresh = match ScriptRepo::find_by_id(&self.inner.pool, script.id).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => return,
            Err(e) => {
                warn!(script = %script.name, error = %e, "alert skipped, script re-read failed");
                return;
            }
        };

        let now = Utc::now();
        if let Some(last) = fresh.last_alert_at {
            if (now - last).num_seconds() < self.inner.config.alert_throttle_secs {
                info!(script = %script.name, "alert suppressed by throttle window");
                return;
            }
        }

        let execution = match ExecutionRepo::find_by_id(&self.inner.pool, execution_id).await {
            Ok(Some(execution)) => execution,
            _ => return,
        };

        let sent = match status {
            ExecutionStatus::Success => self.inner.alerter.send_success(&fresh, &execution).await,
            _ => self.inner.alerter.send_failure(&fresh, &execution).await,
        };
        if sent {
            if let Err(e) = ScriptRepo::set_last_alert_at(&self.inner.pool, script.id, now).await {
                warn!(script = %script.name, error = %e, "could not persist alert throttle state");
            }
        }
    }

    /// Confirm announced artifacts on disk and persist their metadata.
    /// A marker whose file is missing is logged and dropped.
    async fn record_artifacts(&self, execution_id: DbId, markers: &[ArtifactMarker]) {
        for marker in markers {
            let path = self.inner.config.artifacts_dir.join(&marker.stored_filename);
            if tokio::fs::metadata(&path).await.is_err() {
                warn!(
                    execution_id,
                    file = %marker.stored_filename,
                    "artifact announced but file not found, skipping"
                );
                continue;
            }
            if let Err(e) = ArtifactRepo::create(&self.inner.pool, execution_id, marker).await {
                warn!(
                    execution_id,
                    file = %marker.stored_filename,
                    error = %e,
                    "could not persist artifact record"
                );
            }
        }
    }

    /// Resolve the script file on disk. An explicit path is used as-is when
    /// absolute and anchored at the scripts directory when relative; an
    /// empty path means the by-name layout `<scripts_dir>/<name>/script.py`.
    fn resolve_script_path(&self, script: &Script) -> PathBuf {
        if script.path.is_empty() {
            return self
                .inner
                .config
                .scripts_dir
                .join(&script.name)
                .join("script.py");
        }
        let path = Path::new(&script.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.inner.config.scripts_dir.join(path)
        }
    }
}

/// Read one output stream to EOF, publishing each line and accumulating
/// the full text. Artifact markers are collected from stdout only.
async fn drain_stream<R>(
    reader: Option<R>,
    kind: StreamKind,
    channels: Arc<OutputChannels>,
    execution_id: DbId,
) -> (String, Vec<ArtifactMarker>)
where
    R: AsyncRead + Unpin,
{
    let mut text = String::new();
    let mut markers = Vec::new();
    let Some(reader) = reader else {
        return (text, markers);
    };

    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if kind == StreamKind::Stdout {
            if let Some(marker) = ArtifactMarker::parse_line(&line) {
                markers.push(marker);
            }
        }
        text.push_str(&line);
        text.push('\n');
        channels.publish(execution_id, OutputEvent { stream: kind, line });
    }
    (text, markers)
}
