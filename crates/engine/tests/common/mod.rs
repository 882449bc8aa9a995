//! Shared harness for engine integration tests.
//!
//! Runs the full engine against an in-memory database, a temp directory
//! tree, and fake external binaries: a `python` shim that discards `-u`
//! and delegates to `/bin/sh` (so "scripts" are shell snippets), and
//! per-test `uv` stand-ins for the package tool.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cronhost_core::retry::RetryPolicy;
use cronhost_core::types::DbId;
use cronhost_db::models::execution::Execution;
use cronhost_db::models::script::{CreateScript, Script};
use cronhost_db::repositories::execution_repo::ExecutionRepo;
use cronhost_db::repositories::script_repo::ScriptRepo;
use cronhost_db::SqlitePool;
use cronhost_engine::{
    Alerter, EngineConfig, EnvironmentManager, Executor, LogAlerter, RunningSet,
};
use cronhost_events::{InstallChannels, OutputChannels};
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub config: Arc<EngineConfig>,
    pub running: RunningSet,
    pub environment: Arc<EnvironmentManager>,
    pub executor: Executor,
    pub output: Arc<OutputChannels>,
    pub install: Arc<InstallChannels>,
}

impl Harness {
    /// Harness whose package tool always fails. Tests that pre-provision
    /// environments never reach it.
    pub async fn new() -> Self {
        Self::with_uv("/bin/false").await
    }

    pub async fn with_uv(uv: impl Into<PathBuf>) -> Self {
        Self::build(uv.into(), Arc::new(LogAlerter)).await
    }

    /// Harness with a caller-provided alert backend.
    pub async fn with_alerter(alerter: Arc<dyn Alerter>) -> Self {
        Self::build("/bin/false".into(), alerter).await
    }

    async fn build(uv: PathBuf, alerter: Arc<dyn Alerter>) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let config = Arc::new(EngineConfig {
            database_url: "sqlite::memory:".into(),
            scripts_dir: dir.path().join("scripts"),
            envs_dir: dir.path().join("envs"),
            artifacts_dir: dir.path().join("artifacts"),
            uv_path: uv,
            support_lib_dir: None,
            default_timeout_secs: 3600,
            max_log_bytes: 1_000_000,
            alert_throttle_secs: 3600,
            validation_timeout: Duration::from_secs(5),
            install_retry: RetryPolicy::new(
                3,
                Duration::from_millis(10),
                Duration::from_millis(50),
            ),
        });
        fs::create_dir_all(&config.scripts_dir).expect("scripts dir");
        fs::create_dir_all(&config.envs_dir).expect("envs dir");
        fs::create_dir_all(&config.artifacts_dir).expect("artifacts dir");

        let pool = cronhost_db::connect_memory().await.expect("db");
        let output = Arc::new(OutputChannels::new());
        let install = Arc::new(InstallChannels::new());
        let running = RunningSet::new();
        let environment = Arc::new(EnvironmentManager::new(
            config.clone(),
            install.clone(),
            running.clone(),
        ));
        let executor = Executor::new(
            pool.clone(),
            config.clone(),
            environment.clone(),
            output.clone(),
            running.clone(),
            alerter,
        );

        Self {
            dir,
            pool,
            config,
            running,
            environment,
            executor,
            output,
            install,
        }
    }

    /// Drop a fake interpreter into the environment for `name` so the
    /// executor skips provisioning entirely.
    pub fn install_fake_interpreter(&self, name: &str) {
        let bin = self.config.envs_dir.join(name).join("bin");
        fs::create_dir_all(&bin).expect("env bin dir");
        let shim = bin.join("python");
        fs::write(
            &shim,
            "#!/bin/sh\nif [ \"$1\" = \"-u\" ]; then shift; fi\nexec /bin/sh \"$@\"\n",
        )
        .expect("write shim");
        make_executable(&shim);
    }

    /// Write the by-name script file (`<scripts_dir>/<name>/script.py`).
    /// The body is a shell snippet, courtesy of the interpreter shim.
    pub fn write_script(&self, name: &str, body: &str) {
        let dir = self.config.scripts_dir.join(name);
        fs::create_dir_all(&dir).expect("script dir");
        fs::write(dir.join("script.py"), body).expect("write script");
    }

    pub async fn create_script(&self, dto: &CreateScript) -> Script {
        ScriptRepo::create(&self.pool, dto).await.expect("create script")
    }

    /// Script row plus interpreter shim plus script file, ready to run.
    pub async fn runnable_script(&self, name: &str, body: &str) -> Script {
        self.runnable_script_with(CreateScript::named(name), body).await
    }

    pub async fn runnable_script_with(&self, dto: CreateScript, body: &str) -> Script {
        let script = self.create_script(&dto).await;
        self.install_fake_interpreter(&script.name);
        self.write_script(&script.name, body);
        script
    }

    /// Poll until the execution reaches a terminal state.
    pub async fn wait_finished(&self, execution_id: DbId) -> Execution {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let found = ExecutionRepo::find_by_id(&self.pool, execution_id)
                .await
                .expect("find execution");
            if let Some(execution) = found {
                if execution.is_finished() {
                    return execution;
                }
            }
            assert!(
                std::time::Instant::now() < deadline,
                "execution {execution_id} did not finish in time"
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

impl Harness {
    /// Poll until the script's run task has fully wound down. The row
    /// turns terminal before alerting and artifact recording happen, so
    /// tests asserting those side effects wait for this instead.
    pub async fn wait_idle(&self, script_id: DbId) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while self.executor.is_running(script_id) {
            assert!(
                std::time::Instant::now() < deadline,
                "script {script_id} never went idle"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn make_executable(path: &Path) {
    let mut perms = fs::metadata(path).expect("stat").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

/// Write a fake `uv` binary with the given shell body.
pub fn write_fake_uv(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("uv");
    fs::write(&path, body).expect("write fake uv");
    make_executable(&path);
    path
}

/// A fake `uv` whose venv/compile/install subcommands all succeed.
pub fn fake_uv_ok(dir: &Path) -> PathBuf {
    write_fake_uv(
        dir,
        "#!/bin/sh\n\
         case \"$1\" in\n\
           venv)\n\
             mkdir -p \"$2/bin\"\n\
             printf '#!/bin/sh\\nexit 0\\n' > \"$2/bin/python\"\n\
             chmod +x \"$2/bin/python\"\n\
             exit 0 ;;\n\
           pip)\n\
             case \"$2\" in\n\
               compile) echo 'Resolved 1 package' >&2; exit 0 ;;\n\
               install) echo 'Installed'; exit 0 ;;\n\
             esac ;;\n\
         esac\n\
         exit 1\n",
    )
}

/// A fake `uv` whose install step always fails with the given stderr
/// line, appending one line to `count_file` per attempt. venv and
/// compile still succeed.
pub fn fake_uv_failing_install(dir: &Path, count_file: &Path, stderr_line: &str) -> PathBuf {
    write_fake_uv(
        dir,
        &format!(
            "#!/bin/sh\n\
             case \"$1\" in\n\
               venv)\n\
                 mkdir -p \"$2/bin\"\n\
                 printf '#!/bin/sh\\nexit 0\\n' > \"$2/bin/python\"\n\
                 chmod +x \"$2/bin/python\"\n\
                 exit 0 ;;\n\
               pip)\n\
                 case \"$2\" in\n\
                   compile) echo 'Resolved 1 package' >&2; exit 0 ;;\n\
                   install)\n\
                     echo attempt >> \"{count}\"\n\
                     echo '{stderr}' >&2\n\
                     exit 1 ;;\n\
                 esac ;;\n\
             esac\n\
             exit 1\n",
            count = count_file.display(),
            stderr = stderr_line,
        ),
    )
}

/// Number of lines in the attempt-count file (0 if absent).
pub fn attempt_count(count_file: &Path) -> usize {
    fs::read_to_string(count_file)
        .map(|text| text.lines().count())
        .unwrap_or(0)
}
