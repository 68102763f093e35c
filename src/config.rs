//! Process configuration.
//!
//! Loaded once from the environment at startup (`AppConfig::from_env`) and
//! shared as `Arc<AppConfig>`. Nothing reloads it; changing a value means
//! restarting the process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::engine::Operation;

/// Application-level constants
pub const APP_NAME: &str = "Frontdoor";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "frontdoor_lib=info,frontdoor=info,tower_http=warn"
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════

/// Retry policy for idempotent engine calls (`isalive`, `version`).
///
/// `max_attempts` counts the first try. Backoff doubles per retry and is
/// capped at `max_backoff_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 1_000,
        }
    }
}

/// Where the engine lives and how long each class of call may take.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEndpointConfig {
    pub base_url: String,
    pub fulltext_timeout_secs: u64,
    pub header_timeout_secs: u64,
    pub references_timeout_secs: u64,
    pub citation_timeout_secs: u64,
    /// Per-attempt timeout for `isalive` / `version`.
    pub probe_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Engine worker count; sizes the admission gate.
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
}

impl EngineEndpointConfig {
    pub fn timeout_for(&self, operation: Operation) -> Duration {
        let secs = match operation {
            Operation::Fulltext => self.fulltext_timeout_secs,
            Operation::Header => self.header_timeout_secs,
            Operation::References => self.references_timeout_secs,
            Operation::Citation => self.citation_timeout_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for EngineEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8070".into(),
            fulltext_timeout_secs: 180,
            header_timeout_secs: 120,
            references_timeout_secs: 180,
            citation_timeout_secs: 60,
            probe_timeout_ms: 2_000,
            connect_timeout_ms: 2_000,
            max_concurrency: 28,
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounded queue in front of the engine slots.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionConfig {
    /// Requests allowed to wait for a slot. Zero rejects as soon as the
    /// pool is exhausted.
    pub queue_depth: usize,
    /// Longest a queued request waits before `CapacityExceeded`.
    pub acquire_timeout_ms: u64,
}

impl AdmissionConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            queue_depth: 28,
            acquire_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthConfig {
    pub interval_secs: u64,
    /// Upper bound for one probe, retries included.
    pub probe_timeout_ms: u64,
    /// Consecutive failures before a component is declared unavailable.
    pub failure_threshold: u32,
    /// Shared volume probed with a stat + write. `None` skips the probe.
    pub storage_mount: Option<PathBuf>,
    /// Prefix the engine's version string must start with.
    pub expected_version: Option<String>,
    /// `/status` re-probes when the last verdict is older than this.
    pub status_max_age_ms: u64,
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn status_max_age(&self) -> Duration {
        Duration::from_millis(self.status_max_age_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            probe_timeout_ms: 5_000,
            failure_threshold: 3,
            storage_mount: None,
            expected_version: None,
            status_max_age_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleConfig {
    pub docker_bin: String,
    pub compose_file: PathBuf,
    /// `key=value` label selecting the engine's containers.
    pub container_label: String,
    /// Pause between `down` and `up` during a restart.
    pub restart_settle_ms: u64,
    pub command_timeout_secs: u64,
    /// Bring containers up at startup and down at shutdown.
    pub manage_containers: bool,
    pub default_log_lines: u32,
    pub max_log_lines: u32,
}

impl LifecycleConfig {
    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".into(),
            compose_file: PathBuf::from("docker/docker-compose.yml"),
            container_label: "frontdoor.role=engine".into(),
            restart_settle_ms: 2_000,
            command_timeout_secs: 120,
            manage_containers: false,
            default_log_lines: 100,
            max_log_lines: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsConfig {
    pub history_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { history_size: 100 }
    }
}

// ═══════════════════════════════════════════════════════════
// AppConfig
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    /// Largest accepted request body (multipart overhead included).
    pub body_limit_bytes: usize,
    pub engine: EngineEndpointConfig,
    pub admission: AdmissionConfig,
    pub health: HealthConfig,
    pub lifecycle: LifecycleConfig,
    pub events: EventsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8071)),
            body_limit_bytes: 100 * 1024 * 1024,
            engine: EngineEndpointConfig::default(),
            admission: AdmissionConfig::default(),
            health: HealthConfig::default(),
            lifecycle: LifecycleConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Missing keys keep their defaults; present keys must parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let defaults = AppConfig::default();

        let engine_defaults = defaults.engine;
        let retry_defaults = engine_defaults.retry.clone();
        let engine = EngineEndpointConfig {
            base_url: env
                .string("FRONTDOOR_ENGINE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(engine_defaults.base_url),
            fulltext_timeout_secs: env
                .parse("FRONTDOOR_ENGINE_FULLTEXT_TIMEOUT_SECS")?
                .unwrap_or(engine_defaults.fulltext_timeout_secs),
            header_timeout_secs: env
                .parse("FRONTDOOR_ENGINE_HEADER_TIMEOUT_SECS")?
                .unwrap_or(engine_defaults.header_timeout_secs),
            references_timeout_secs: env
                .parse("FRONTDOOR_ENGINE_REFERENCES_TIMEOUT_SECS")?
                .unwrap_or(engine_defaults.references_timeout_secs),
            citation_timeout_secs: env
                .parse("FRONTDOOR_ENGINE_CITATION_TIMEOUT_SECS")?
                .unwrap_or(engine_defaults.citation_timeout_secs),
            probe_timeout_ms: env
                .parse("FRONTDOOR_ENGINE_PROBE_TIMEOUT_MS")?
                .unwrap_or(engine_defaults.probe_timeout_ms),
            connect_timeout_ms: env
                .parse("FRONTDOOR_ENGINE_CONNECT_TIMEOUT_MS")?
                .unwrap_or(engine_defaults.connect_timeout_ms),
            max_concurrency: env
                .parse("FRONTDOOR_ENGINE_MAX_CONCURRENCY")?
                .unwrap_or(engine_defaults.max_concurrency),
            retry: RetryPolicy {
                max_attempts: env
                    .parse("FRONTDOOR_ENGINE_RETRY_ATTEMPTS")?
                    .unwrap_or(retry_defaults.max_attempts),
                initial_backoff_ms: env
                    .parse("FRONTDOOR_ENGINE_RETRY_BACKOFF_MS")?
                    .unwrap_or(retry_defaults.initial_backoff_ms),
                max_backoff_ms: env
                    .parse("FRONTDOOR_ENGINE_RETRY_MAX_BACKOFF_MS")?
                    .unwrap_or(retry_defaults.max_backoff_ms),
            },
        };

        let admission = AdmissionConfig {
            queue_depth: env
                .parse("FRONTDOOR_ADMISSION_QUEUE_DEPTH")?
                .unwrap_or(engine.max_concurrency),
            acquire_timeout_ms: env
                .parse("FRONTDOOR_ADMISSION_WAIT_MS")?
                .unwrap_or(defaults.admission.acquire_timeout_ms),
        };

        let health_defaults = defaults.health;
        let health = HealthConfig {
            interval_secs: env
                .parse("FRONTDOOR_HEALTH_INTERVAL_SECS")?
                .unwrap_or(health_defaults.interval_secs),
            probe_timeout_ms: env
                .parse("FRONTDOOR_HEALTH_PROBE_TIMEOUT_MS")?
                .unwrap_or(health_defaults.probe_timeout_ms),
            failure_threshold: env
                .parse("FRONTDOOR_HEALTH_FAILURE_THRESHOLD")?
                .unwrap_or(health_defaults.failure_threshold),
            storage_mount: env.string("FRONTDOOR_STORAGE_MOUNT").map(PathBuf::from),
            expected_version: env.string("FRONTDOOR_ENGINE_EXPECTED_VERSION"),
            status_max_age_ms: env
                .parse("FRONTDOOR_STATUS_MAX_AGE_MS")?
                .unwrap_or(health_defaults.status_max_age_ms),
        };

        let lifecycle_defaults = defaults.lifecycle;
        let lifecycle = LifecycleConfig {
            docker_bin: env
                .string("FRONTDOOR_DOCKER_BIN")
                .unwrap_or(lifecycle_defaults.docker_bin),
            compose_file: env
                .string("FRONTDOOR_COMPOSE_FILE")
                .map(PathBuf::from)
                .unwrap_or(lifecycle_defaults.compose_file),
            container_label: env
                .string("FRONTDOOR_CONTAINER_LABEL")
                .unwrap_or(lifecycle_defaults.container_label),
            restart_settle_ms: env
                .parse("FRONTDOOR_RESTART_SETTLE_MS")?
                .unwrap_or(lifecycle_defaults.restart_settle_ms),
            command_timeout_secs: env
                .parse("FRONTDOOR_DOCKER_TIMEOUT_SECS")?
                .unwrap_or(lifecycle_defaults.command_timeout_secs),
            manage_containers: env
                .flag("FRONTDOOR_MANAGE_CONTAINERS")?
                .unwrap_or(lifecycle_defaults.manage_containers),
            default_log_lines: env
                .parse("FRONTDOOR_DEFAULT_LOG_LINES")?
                .unwrap_or(lifecycle_defaults.default_log_lines),
            max_log_lines: env
                .parse("FRONTDOOR_MAX_LOG_LINES")?
                .unwrap_or(lifecycle_defaults.max_log_lines),
        };

        let config = AppConfig {
            listen_addr: env
                .parse("FRONTDOOR_LISTEN_ADDR")?
                .unwrap_or(defaults.listen_addr),
            body_limit_bytes: env
                .parse::<usize>("FRONTDOOR_BODY_LIMIT_MB")?
                .map(|mb| mb.saturating_mul(1024 * 1024))
                .unwrap_or(defaults.body_limit_bytes),
            engine,
            admission,
            health,
            lifecycle,
            events: EventsConfig {
                history_size: env
                    .parse("FRONTDOOR_EVENTS_HISTORY")?
                    .unwrap_or(defaults.events.history_size),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the rest of the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.engine.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "engine URL must be http(s), got {url:?}"
            )));
        }
        if self.engine.max_concurrency == 0 {
            return Err(ConfigError::Invalid("engine max concurrency must be > 0".into()));
        }
        if self.engine.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry attempts must be >= 1".into()));
        }
        if Operation::ALL
            .iter()
            .any(|op| self.engine.timeout_for(*op).is_zero())
        {
            return Err(ConfigError::Invalid("operation timeouts must be > 0".into()));
        }
        if self.health.interval_secs == 0 || self.health.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "health interval and failure threshold must be > 0".into(),
            ));
        }
        if self.lifecycle.default_log_lines == 0
            || self.lifecycle.default_log_lines > self.lifecycle.max_log_lines
        {
            return Err(ConfigError::Invalid(
                "default log lines must be within 1..=max log lines".into(),
            ));
        }
        if self.events.history_size == 0 {
            return Err(ConfigError::Invalid("event history size must be > 0".into()));
        }
        Ok(())
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &'static str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|value| {
                value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                    key,
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn flag(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        self.string(key)
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key,
                    value,
                    reason: "expected a boolean".into(),
                }),
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.engine.base_url, "http://localhost:8070");
        assert_eq!(config.engine.max_concurrency, 28);
        assert_eq!(config.admission.queue_depth, 28);
        assert_eq!(config.listen_addr.port(), 8071);
        assert_eq!(config.health.failure_threshold, 3);
        assert!(!config.lifecycle.manage_containers);
    }

    #[test]
    fn document_operations_get_longer_timeouts_than_metadata() {
        let engine = EngineEndpointConfig::default();
        assert_eq!(engine.timeout_for(Operation::Fulltext), Duration::from_secs(180));
        assert!(engine.timeout_for(Operation::Header) < engine.timeout_for(Operation::Fulltext));
        assert!(engine.timeout_for(Operation::Citation) < engine.timeout_for(Operation::Header));
        assert!(engine.probe_timeout() < Duration::from_secs(5));
    }

    #[test]
    fn environment_overrides_apply() {
        let config = AppConfig::from_lookup(lookup(&[
            ("FRONTDOOR_ENGINE_URL", "http://grobid:8070/"),
            ("FRONTDOOR_ENGINE_MAX_CONCURRENCY", "4"),
            ("FRONTDOOR_ADMISSION_WAIT_MS", "250"),
            ("FRONTDOOR_MANAGE_CONTAINERS", "true"),
            ("FRONTDOOR_STORAGE_MOUNT", "/mnt/shared"),
            ("FRONTDOOR_BODY_LIMIT_MB", "8"),
        ]))
        .unwrap();

        assert_eq!(config.engine.base_url, "http://grobid:8070");
        assert_eq!(config.engine.max_concurrency, 4);
        // Queue depth follows capacity unless set explicitly
        assert_eq!(config.admission.queue_depth, 4);
        assert_eq!(config.admission.acquire_timeout(), Duration::from_millis(250));
        assert!(config.lifecycle.manage_containers);
        assert_eq!(config.health.storage_mount, Some(PathBuf::from("/mnt/shared")));
        assert_eq!(config.body_limit_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn unparsable_value_names_the_key() {
        let err = AppConfig::from_lookup(lookup(&[("FRONTDOOR_ENGINE_MAX_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("FRONTDOOR_ENGINE_MAX_CONCURRENCY"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("FRONTDOOR_ENGINE_MAX_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn non_http_engine_url_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("FRONTDOOR_ENGINE_URL", "grobid:8070")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_flag_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("FRONTDOOR_MANAGE_CONTAINERS", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn retry_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 300,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
        assert_eq!(policy.backoff(10), Duration::from_millis(300));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }
}
