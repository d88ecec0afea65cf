use std::str::FromStr;
use std::time::Duration;

use panelgate_panel::RetryPolicy;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long background tasks get to stop after the listener closes
    /// (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Mount the ad-hoc plugin test endpoint (default: `false`). It runs
    /// arbitrary scripts with outbound HTTP, so only enable it behind an
    /// operator-only boundary.
    pub plugin_test_enabled: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    /// | `PLUGIN_TEST_ENABLED`  | `false`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = env_or("PORT", 3000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_or("REQUEST_TIMEOUT_SECS", 30);
        let shutdown_timeout_secs: u64 = env_or("SHUTDOWN_TIMEOUT_SECS", 30);
        let plugin_test_enabled: bool = env_or("PLUGIN_TEST_ENABLED", false);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            plugin_test_enabled,
        }
    }
}

/// Tuning for the submission workflow and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionConfig {
    /// Plugin timeout used when a binding does not set its own.
    pub plugin_timeout: Duration,
    /// Interpreter operation ceiling per plugin run.
    pub plugin_max_operations: u64,
    /// Per-request timeout of the shared panel HTTP client.
    pub panel_http_timeout: Duration,
    /// Retry budget for panel reads.
    pub panel_retry: RetryPolicy,
    /// Quota locks unused for this long are pruned.
    pub quota_lock_idle: Duration,
    /// How often the pruning task runs.
    pub quota_lock_prune_interval: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            plugin_timeout: Duration::from_millis(5000),
            plugin_max_operations: 50_000_000,
            panel_http_timeout: Duration::from_secs(10),
            panel_retry: RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(1000),
            },
            quota_lock_idle: Duration::from_secs(3600),
            quota_lock_prune_interval: Duration::from_secs(600),
        }
    }
}

impl SubmissionConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default |
    /// |----------------------------------|---------|
    /// | `PLUGIN_TIMEOUT_MS`              | `5000`  |
    /// | `PLUGIN_MAX_OPERATIONS`          | `50000000` |
    /// | `PANEL_HTTP_TIMEOUT_SECS`        | `10`    |
    /// | `PANEL_RETRY_ATTEMPTS`           | `3`     |
    /// | `PANEL_RETRY_BACKOFF_MS`         | `1000`  |
    /// | `QUOTA_LOCK_IDLE_SECS`           | `3600`  |
    /// | `QUOTA_LOCK_PRUNE_INTERVAL_SECS` | `600`   |
    pub fn from_env() -> Self {
        Self {
            plugin_timeout: Duration::from_millis(env_or("PLUGIN_TIMEOUT_MS", 5000)),
            plugin_max_operations: env_or("PLUGIN_MAX_OPERATIONS", 50_000_000),
            panel_http_timeout: Duration::from_secs(env_or("PANEL_HTTP_TIMEOUT_SECS", 10)),
            panel_retry: RetryPolicy {
                attempts: env_or("PANEL_RETRY_ATTEMPTS", 3),
                backoff: Duration::from_millis(env_or("PANEL_RETRY_BACKOFF_MS", 1000)),
            },
            quota_lock_idle: Duration::from_secs(env_or("QUOTA_LOCK_IDLE_SECS", 3600)),
            quota_lock_prune_interval: Duration::from_secs(env_or(
                "QUOTA_LOCK_PRUNE_INTERVAL_SECS",
                600,
            )),
        }
    }
}

/// Read `name` and parse it, falling back to `default` when unset.
///
/// Panics on a value that does not parse: misconfiguration fails at startup.
fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid {}: {e}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}
