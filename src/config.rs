//! Configuration management for windowgate.
//!
//! Settings are plain data: hosts build a [`GateConfig`] in code or read one
//! from `WINDOWGATE_*` environment variables. There is no global state; the
//! config is handed to [`RateLimiter`](crate::ratelimit::RateLimiter) at
//! construction.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WindowGateError};
use crate::ratelimit::{LimitSpec, DEFAULT_HEADER_PREFIX};

/// Prefix of the environment variables read by [`GateConfig::from_env`].
pub const ENV_PREFIX: &str = "WINDOWGATE";

/// Main configuration for the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Master switch; when off every check admits
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// The environment this process runs in
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Environments in which limits are enforced
    #[serde(default = "default_environments")]
    pub environments: Vec<String>,

    /// First field of every event key
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Lifetime of an event key in seconds; must exceed every window
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Upper bound on a single store call in milliseconds
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Limits for call sites that do not name their own
    #[serde(default = "default_limits")]
    pub default_limits: LimitSpec,

    /// Emit rate limit headers unless a call site says otherwise
    #[serde(default = "default_send_headers")]
    pub send_headers: bool,

    /// Header prefix unless a call site says otherwise
    #[serde(default = "default_header_prefix")]
    pub header_prefix: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            environment: default_environment(),
            environments: default_environments(),
            namespace: default_namespace(),
            retention_secs: default_retention(),
            store_timeout_ms: default_store_timeout(),
            default_limits: default_limits(),
            send_headers: default_send_headers(),
            header_prefix: default_header_prefix(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_environments() -> Vec<String> {
    vec!["production".to_string()]
}

fn default_namespace() -> String {
    "windowgate".to_string()
}

fn default_retention() -> u64 {
    86_400
}

fn default_store_timeout() -> u64 {
    1000
}

fn default_limits() -> LimitSpec {
    LimitSpec::from_flat(&[100, 60]).expect("built-in default limits are valid")
}

fn default_send_headers() -> bool {
    true
}

fn default_header_prefix() -> String {
    DEFAULT_HEADER_PREFIX.to_string()
}

impl GateConfig {
    /// Load configuration from `WINDOWGATE_*` environment variables.
    ///
    /// `WINDOWGATE_ENVIRONMENTS` and `WINDOWGATE_DEFAULT_LIMITS` are
    /// comma-separated lists.
    pub fn from_env() -> Result<Self> {
        Self::from_environment(environment_source())
    }

    /// Load configuration from an explicit variable map, as if it were the
    /// process environment.
    pub fn from_vars(vars: config::Map<String, String>) -> Result<Self> {
        Self::from_environment(environment_source().source(Some(vars)))
    }

    fn from_environment(source: config::Environment) -> Result<Self> {
        let settings = config::Config::builder().add_source(source).build()?;
        let config: GateConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(WindowGateError::InvalidOption(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.header_prefix.is_empty() {
            return Err(WindowGateError::InvalidOption(
                "header_prefix must not be empty".to_string(),
            ));
        }
        if self.store_timeout_ms == 0 {
            return Err(WindowGateError::InvalidOption(
                "store_timeout_ms must be positive".to_string(),
            ));
        }
        self.check_retention(&self.default_limits)
    }

    /// Fail unless events outlive the longest window of `limits`.
    pub fn check_retention(&self, limits: &LimitSpec) -> Result<()> {
        if self.retention_secs <= limits.longest_window() {
            return Err(WindowGateError::InvalidSpec(format!(
                "retention of {}s must exceed the longest window of {}s",
                self.retention_secs,
                limits.longest_window()
            )));
        }
        Ok(())
    }

    /// Whether limits are enforced in the current environment.
    pub fn is_active(&self) -> bool {
        self.enabled && self.environments.iter().any(|e| e == &self.environment)
    }
}

fn environment_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("environments")
        .with_list_parse_key("default_limits")
}
