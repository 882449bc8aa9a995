//! Engine configuration, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use cronhost_core::retry::RetryPolicy;

/// Runtime configuration for the engine and daemon.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite connection string, e.g. `sqlite://./data/cronhost.db`.
    pub database_url: String,
    /// Root for scripts stored by name (`<scripts_dir>/<name>/script.py`).
    pub scripts_dir: PathBuf,
    /// Root for isolated interpreter environments, one per script name.
    pub envs_dir: PathBuf,
    /// Directory script processes save artifacts into.
    pub artifacts_dir: PathBuf,
    /// The `uv` binary used for environment and package operations.
    pub uv_path: PathBuf,
    /// Optional local support library installed editable into every
    /// environment. `None` skips the step.
    pub support_lib_dir: Option<PathBuf>,
    /// Fallback timeout when a script row carries a non-positive one.
    pub default_timeout_secs: i64,
    /// Cap on persisted stdout/stderr, in bytes.
    pub max_log_bytes: usize,
    /// Minimum spacing between alerts for one script, in seconds.
    pub alert_throttle_secs: i64,
    /// Wall-clock budget for a dependency resolution check.
    pub validation_timeout: Duration,
    /// Retry budget and backoff for dependency installation.
    pub install_retry: RetryPolicy,
}

impl EngineConfig {
    /// Load configuration from `CRONHOST_*` environment variables,
    /// falling back to defaults suitable for a local checkout.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_or("CRONHOST_DATABASE_URL", defaults.database_url),
            scripts_dir: env_path_or("CRONHOST_SCRIPTS_DIR", defaults.scripts_dir),
            envs_dir: env_path_or("CRONHOST_ENVS_DIR", defaults.envs_dir),
            artifacts_dir: env_path_or("CRONHOST_ARTIFACTS_DIR", defaults.artifacts_dir),
            uv_path: env_path_or("CRONHOST_UV_PATH", defaults.uv_path),
            support_lib_dir: std::env::var("CRONHOST_SUPPORT_LIB_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            default_timeout_secs: env_parse_or(
                "CRONHOST_DEFAULT_TIMEOUT_SECS",
                defaults.default_timeout_secs,
            ),
            max_log_bytes: env_parse_or("CRONHOST_MAX_LOG_BYTES", defaults.max_log_bytes),
            alert_throttle_secs: env_parse_or(
                "CRONHOST_ALERT_THROTTLE_SECS",
                defaults.alert_throttle_secs,
            ),
            validation_timeout: Duration::from_secs(env_parse_or(
                "CRONHOST_VALIDATION_TIMEOUT_SECS",
                defaults.validation_timeout.as_secs(),
            )),
            install_retry: RetryPolicy {
                max_attempts: env_parse_or(
                    "CRONHOST_INSTALL_ATTEMPTS",
                    defaults.install_retry.max_attempts,
                ),
                ..defaults.install_retry
            },
        }
    }

    /// Create the working directories this configuration points at.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.scripts_dir)?;
        std::fs::create_dir_all(&self.envs_dir)?;
        std::fs::create_dir_all(&self.artifacts_dir)?;
        if let Some(parent) = sqlite_file_path(&self.database_url).and_then(|p| {
            p.parent().map(PathBuf::from)
        }) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/cronhost.db".into(),
            scripts_dir: "./scripts".into(),
            envs_dir: "./envs".into(),
            artifacts_dir: "./artifacts".into(),
            uv_path: "uv".into(),
            support_lib_dir: None,
            default_timeout_secs: 3600,
            max_log_bytes: 1_000_000,
            alert_throttle_secs: 3600,
            validation_timeout: Duration::from_secs(30),
            install_retry: RetryPolicy::default(),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_path_or(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Extract the on-disk path from a `sqlite://` URL, if it names a file.
fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let path = url.strip_prefix("sqlite://")?;
    if path.is_empty() || path.starts_with(':') {
        return None;
    }
    Some(PathBuf::from(path))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.default_timeout_secs, 3600);
        assert_eq!(config.max_log_bytes, 1_000_000);
        assert_eq!(config.validation_timeout, Duration::from_secs(30));
        assert_eq!(config.install_retry.max_attempts, 3);
        assert!(config.support_lib_dir.is_none());
    }

    #[test]
    fn sqlite_url_parsing() {
        assert_eq!(
            sqlite_file_path("sqlite://./data/cronhost.db"),
            Some(PathBuf::from("./data/cronhost.db"))
        );
        assert_eq!(sqlite_file_path("sqlite://:memory:"), None);
        assert_eq!(sqlite_file_path("postgres://x"), None);
    }
}
