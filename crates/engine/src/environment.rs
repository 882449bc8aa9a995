//! Isolated interpreter environment provisioning.
//!
//! Each script gets one environment at `<envs_dir>/<name>`, created and
//! populated with the external `uv` tool. Environment creation is
//! destructive (remove, then recreate) and serialized per environment
//! name; dependency resolution checks are serialized process-wide because
//! the resolver is resource-hungry.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cronhost_core::diagnostics::{classify_diagnostic, Classification};
use cronhost_core::packages::validate_package_lines;
use cronhost_core::types::DbId;
use cronhost_events::{InstallChannels, InstallEvent};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::locks::{KeyedLocks, RunningSet};

/// Errors from environment operations.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("no environment exists for script '{0}'")]
    Missing(String),
    #[error("script is currently running")]
    ScriptRunning,
    /// Diagnostic text from the external package tool.
    #[error("{0}")]
    Tool(String),
    #[error("dependency validation timed out after {0:?}")]
    ValidationTimeout(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of a dependency resolution check.
#[derive(Debug, Clone)]
pub struct DependencyReport {
    pub valid: bool,
    pub message: String,
    /// Specifiers that passed the format screen, in source order.
    pub packages: Vec<String>,
}

impl DependencyReport {
    fn invalid(message: impl Into<String>, packages: Vec<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            packages,
        }
    }
}

/// Captured output of one external tool invocation.
struct ToolOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl ToolOutput {
    /// The diagnostic to surface on failure; stderr, or a placeholder when
    /// the tool died silently.
    fn diagnostic(&self) -> String {
        if self.stderr.trim().is_empty() {
            "Unknown error".to_string()
        } else {
            self.stderr.trim().to_string()
        }
    }
}

/// Provisions and maintains per-script interpreter environments.
pub struct EnvironmentManager {
    config: Arc<EngineConfig>,
    /// One lock per environment name; create/install/delete serialize here.
    env_locks: KeyedLocks<String>,
    /// Process-wide gate for resolution checks.
    validation_lock: tokio::sync::Mutex<()>,
    /// Script ids with a streaming setup in flight.
    installing: Mutex<HashSet<DbId>>,
    install_channels: Arc<InstallChannels>,
    running: RunningSet,
}

impl EnvironmentManager {
    pub fn new(
        config: Arc<EngineConfig>,
        install_channels: Arc<InstallChannels>,
        running: RunningSet,
    ) -> Self {
        Self {
            config,
            env_locks: KeyedLocks::new(),
            validation_lock: tokio::sync::Mutex::new(()),
            installing: Mutex::new(HashSet::new()),
            install_channels,
            running,
        }
    }

    /// Directory of the environment for `name`.
    pub fn env_path(&self, name: &str) -> PathBuf {
        self.config.envs_dir.join(name)
    }

    /// Interpreter binary inside the environment for `name`.
    pub fn python_path(&self, name: &str) -> PathBuf {
        if cfg!(windows) {
            self.env_path(name).join("Scripts").join("python.exe")
        } else {
            self.env_path(name).join("bin").join("python")
        }
    }

    /// An environment exists when its interpreter binary does.
    pub fn env_exists(&self, name: &str) -> bool {
        self.python_path(name).exists()
    }

    /// Whether a streaming setup for this script is currently in flight.
    pub fn is_installing(&self, script_id: DbId) -> bool {
        self.installing
            .lock()
            .expect("installing set poisoned")
            .contains(&script_id)
    }

    /// Create (or recreate) the environment for `name`.
    ///
    /// Destructive: an existing environment is removed first. Serialized
    /// per environment name.
    pub async fn create_env(&self, name: &str, python_version: &str) -> Result<(), EnvError> {
        let lock = self.env_locks.get(&name.to_string());
        let _guard = lock.lock().await;

        let path = self.env_path(name);
        if path.exists() {
            debug!(env = name, "removing existing environment before recreate");
            tokio::fs::remove_dir_all(&path).await?;
        }
        tokio::fs::create_dir_all(&self.config.envs_dir).await?;

        info!(env = name, python = python_version, "creating environment");
        let output = self
            .run_tool(&[
                "venv".as_ref(),
                path.as_os_str(),
                "--python".as_ref(),
                python_version.as_ref(),
            ])
            .await?;
        if !output.success {
            return Err(EnvError::Tool(output.diagnostic()));
        }
        Ok(())
    }

    /// Check that a dependency list is well-formed and resolvable.
    ///
    /// Failures (bad format, unresolvable set, resolver timeout) are
    /// reported in the returned [`DependencyReport`], never as `Err`.
    pub async fn validate_dependencies(&self, dependencies: &str) -> DependencyReport {
        let screen = validate_package_lines(dependencies);
        if !screen.is_valid() {
            let details = screen
                .invalid
                .iter()
                .map(|line| format!("- {line}"))
                .collect::<Vec<_>>()
                .join("\n");
            return DependencyReport::invalid(
                format!("Invalid package format:\n{details}"),
                screen.valid,
            );
        }
        if screen.valid.is_empty() {
            return DependencyReport {
                valid: true,
                message: String::new(),
                packages: Vec::new(),
            };
        }

        // One resolution check at a time; the resolver is heavyweight.
        let _validation = self.validation_lock.lock().await;

        let tmp = match write_requirements_file(&screen.valid) {
            Ok(tmp) => tmp,
            Err(e) => {
                return DependencyReport::invalid(
                    format!("Could not stage requirements: {e}"),
                    screen.valid,
                )
            }
        };

        let budget = self.config.validation_timeout;
        let args = [
            "pip".as_ref(),
            "compile".as_ref(),
            tmp.path().as_os_str(),
            "--quiet".as_ref(),
        ];
        let run = self.run_tool(&args);
        let output = match tokio::time::timeout(budget, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return DependencyReport::invalid(
                    format!("Could not run dependency resolver: {e}"),
                    screen.valid,
                )
            }
            Err(_) => {
                return DependencyReport::invalid(
                    format!(
                        "Validation timed out after {} seconds; try fewer packages at once",
                        budget.as_secs()
                    ),
                    screen.valid,
                )
            }
        };

        if classify_diagnostic(&output.stderr) == Classification::Permanent {
            return DependencyReport::invalid(
                format!("Cannot resolve dependencies:\n{}", output.stderr.trim()),
                screen.valid,
            );
        }
        if !output.success && !output.stderr.contains("Resolved") {
            return DependencyReport::invalid(
                format!("Resolution error:\n{}", output.diagnostic()),
                screen.valid,
            );
        }

        let count = screen.valid.len();
        DependencyReport {
            valid: true,
            message: format!("All {count} packages are valid and resolvable"),
            packages: screen.valid,
        }
    }

    /// Install a dependency list into an existing environment.
    ///
    /// The tool's stderr is screened against known failure phrases because
    /// its exit code alone does not capture every failure mode.
    pub async fn install_dependencies(
        &self,
        name: &str,
        dependencies: &str,
    ) -> Result<String, EnvError> {
        let screen = validate_package_lines(dependencies);
        if !screen.is_valid() {
            return Err(EnvError::Tool(format!(
                "Invalid package format: {}",
                screen.invalid.join("; ")
            )));
        }
        if screen.valid.is_empty() {
            return Ok("No dependencies to install".to_string());
        }

        let lock = self.env_locks.get(&name.to_string());
        let _guard = lock.lock().await;

        let python = self.python_path(name);
        if !python.exists() {
            return Err(EnvError::Missing(name.to_string()));
        }

        info!(env = name, count = screen.valid.len(), "installing dependencies");
        let mut args: Vec<&std::ffi::OsStr> =
            vec!["pip".as_ref(), "install".as_ref(), "--python".as_ref(), python.as_os_str()];
        args.extend(screen.valid.iter().map(|s| -> &std::ffi::OsStr { s.as_ref() }));
        let output = self.run_tool(&args).await?;

        if !output.success || classify_diagnostic(&output.stderr) == Classification::Permanent {
            return Err(EnvError::Tool(output.diagnostic()));
        }
        if output.stdout.trim().is_empty() {
            Ok(format!("Installed {} packages", screen.valid.len()))
        } else {
            Ok(output.stdout.trim().to_string())
        }
    }

    /// Install the local support library into an environment, when one is
    /// configured and present on disk. Missing configuration is a no-op.
    pub async fn install_support_lib(&self, name: &str) -> Result<(), EnvError> {
        let Some(lib_dir) = self.config.support_lib_dir.as_deref() else {
            return Ok(());
        };
        if !lib_dir.exists() {
            debug!(dir = %lib_dir.display(), "support library directory absent, skipping");
            return Ok(());
        }

        let python = self.python_path(name);
        if !python.exists() {
            return Err(EnvError::Missing(name.to_string()));
        }

        info!(env = name, "installing support library");
        let output = self
            .run_tool(&[
                "pip".as_ref(),
                "install".as_ref(),
                "--python".as_ref(),
                python.as_os_str(),
                "-e".as_ref(),
                lib_dir.as_os_str(),
            ])
            .await?;
        if !output.success {
            return Err(EnvError::Tool(output.diagnostic()));
        }
        Ok(())
    }

    /// Full environment setup: validate, create, support library, install.
    ///
    /// The pipeline aborts at the first failing stage; a failed support
    /// library install aborts too, since scripts depend on its artifact
    /// helper at runtime.
    pub async fn setup_environment(
        &self,
        name: &str,
        python_version: &str,
        dependencies: &str,
    ) -> Result<String, EnvError> {
        let report = self.validate_dependencies(dependencies).await;
        if !report.valid {
            return Err(EnvError::Tool(report.message));
        }

        self.create_env(name, python_version).await?;
        self.install_support_lib(name).await?;
        let message = self.install_dependencies(name, dependencies).await?;
        Ok(message)
    }

    /// Like [`Self::setup_environment`], but publishes progress events to
    /// the script's install channel and retries the dependency install on
    /// transient failures.
    ///
    /// The install channel is opened here if the caller has not already
    /// opened (and possibly attached to) one. A terminal `Done` event is
    /// always published and the channel always closed, on success and on
    /// every failure path.
    pub async fn setup_environment_streaming(
        &self,
        script_id: DbId,
        name: &str,
        python_version: &str,
        dependencies: &str,
    ) -> Result<String, EnvError> {
        self.installing
            .lock()
            .expect("installing set poisoned")
            .insert(script_id);
        self.install_channels.ensure_open(script_id);

        let result = self
            .setup_streaming_inner(script_id, name, python_version, dependencies)
            .await;

        match &result {
            Ok(message) => {
                self.install_channels
                    .publish(script_id, InstallEvent::done(message.clone()));
            }
            Err(e) => {
                self.install_channels
                    .publish(script_id, InstallEvent::error(e.to_string()));
                self.install_channels
                    .publish(script_id, InstallEvent::done("Environment setup failed"));
            }
        }
        self.install_channels.close(script_id);
        self.installing
            .lock()
            .expect("installing set poisoned")
            .remove(&script_id);

        result
    }

    async fn setup_streaming_inner(
        &self,
        script_id: DbId,
        name: &str,
        python_version: &str,
        dependencies: &str,
    ) -> Result<String, EnvError> {
        let publish = |event: InstallEvent| {
            self.install_channels.publish(script_id, event);
        };

        publish(InstallEvent::step("Validating dependencies"));
        let report = self.validate_dependencies(dependencies).await;
        if !report.valid {
            return Err(EnvError::Tool(report.message));
        }

        publish(InstallEvent::step(format!(
            "Creating environment (python {python_version})"
        )));
        self.create_env(name, python_version).await?;

        publish(InstallEvent::step("Installing support library"));
        self.install_support_lib(name).await?;

        publish(InstallEvent::step("Installing dependencies"));
        let policy = self.config.install_retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.install_dependencies(name, dependencies).await {
                Ok(message) => {
                    publish(InstallEvent::log(message.clone()));
                    return Ok(message);
                }
                Err(EnvError::Tool(diag)) => {
                    let class = classify_diagnostic(&diag);
                    if class == Classification::Permanent || attempt >= policy.max_attempts {
                        return Err(EnvError::Tool(diag));
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(
                        env = name,
                        attempt,
                        ?class,
                        "dependency install failed, retrying"
                    );
                    publish(InstallEvent::log(format!(
                        "Install attempt {attempt} failed, retrying"
                    )));
                    // Backoff only for infrastructure failures; unknown
                    // diagnostics retry immediately.
                    if class == Classification::Transient {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Delete the environment for `name`, refusing while an execution for
    /// the owning script is in flight.
    pub async fn delete_env(&self, name: &str, script_id: DbId) -> Result<String, EnvError> {
        if self.running.contains(script_id) {
            return Err(EnvError::ScriptRunning);
        }

        let lock = self.env_locks.get(&name.to_string());
        let _guard = lock.lock().await;

        let path = self.env_path(name);
        if !path.exists() {
            return Ok("Environment did not exist".to_string());
        }
        tokio::fs::remove_dir_all(&path).await?;
        info!(env = name, "environment deleted");
        Ok("Environment deleted".to_string())
    }

    /// Run the package tool with the given arguments, capturing output.
    async fn run_tool(&self, args: &[&std::ffi::OsStr]) -> Result<ToolOutput, std::io::Error> {
        let output = Command::new(&self.config.uv_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Write validated specifiers to a temp requirements file for the resolver.
fn write_requirements_file(packages: &[String]) -> std::io::Result<tempfile::NamedTempFile> {
    let mut tmp = tempfile::NamedTempFile::new()?;
    tmp.write_all(packages.join("\n").as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    Ok(tmp)
}
