//! Permissions engine configuration.
//!
//! Configuration is organised into engine, cache and migration sections plus
//! per-tenant overrides keyed by `"<app>:<environment>"`. Every section
//! deserializes with defaults, so an empty TOML document is a valid
//! configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [engine]
//! evaluation_timeout = "10ms"
//! max_policy_complexity = 100
//!
//! [cache]
//! backend = "hybrid"
//! local_ttl = "5m"
//!
//! [tenants."app-1:prod"]
//! evaluation_timeout = "50ms"
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PermissionsError;
use crate::model::SCOPE_SEPARATOR;

/// Smallest accepted evaluation deadline.
pub const MIN_EVALUATION_TIMEOUT: Duration = Duration::from_millis(1);
/// Largest accepted evaluation deadline.
pub const MAX_EVALUATION_TIMEOUT: Duration = Duration::from_secs(1);

/// Root configuration for the permissions engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Evaluation engine limits.
    pub engine: EngineConfig,

    /// Compiled-policy cache settings.
    pub cache: CacheConfig,

    /// RBAC migration defaults.
    pub migration: MigrationConfig,

    /// Per-tenant overrides keyed by `"<app>:<environment>"`.
    pub tenants: HashMap<String, TenantOverride>,
}

/// Evaluation engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for one evaluation call (1ms to 1s).
    #[serde(with = "humantime_serde")]
    pub evaluation_timeout: Duration,

    /// Structural complexity ceiling for policy expressions (10 to 10000).
    pub max_policy_complexity: u32,

    /// Maximum number of policies per tenant scope (1 to 100000).
    pub max_policies_per_tenant: usize,

    /// Evaluate candidate policies concurrently.
    pub parallel_evaluation: bool,

    /// Fan-out bound for concurrent candidate evaluation (1 to 32).
    pub max_parallel_evaluations: usize,

    /// Maximum number of items accepted by one batch evaluation.
    pub max_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_timeout: Duration::from_millis(10),
            max_policy_complexity: 100,
            max_policies_per_tenant: 10_000,
            parallel_evaluation: true,
            max_parallel_evaluations: 4,
            max_batch_size: 100,
        }
    }
}

/// Where compiled policies and raw policy records are cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process cache only.
    #[default]
    Local,
    /// Shared cache only (local index is still used for compiled programs).
    Shared,
    /// Local cache in front of the shared cache.
    Hybrid,
}

impl CacheBackend {
    /// Whether the shared cache layer should be consulted.
    #[must_use]
    pub fn uses_shared(self) -> bool {
        matches!(self, Self::Shared | Self::Hybrid)
    }
}

/// Compiled-policy cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache backend selection.
    pub backend: CacheBackend,

    /// Maximum number of loaded (scope, resource type) slots kept locally.
    pub local_max_size: usize,

    /// How long a loaded slot stays valid locally.
    #[serde(with = "humantime_serde")]
    pub local_ttl: Duration,

    /// TTL applied to entries written to the shared cache.
    #[serde(with = "humantime_serde")]
    pub shared_ttl: Duration,

    /// Compile and index all enabled policies at startup.
    pub warm_on_start: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Local,
            local_max_size: 10_000,
            local_ttl: Duration::from_secs(300),
            shared_ttl: Duration::from_secs(900),
            warm_on_start: true,
        }
    }
}

/// RBAC migration defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Translate only; persist nothing.
    pub dry_run: bool,

    /// Compile and sanity-check every translated expression.
    pub validate_equivalence: bool,

    /// Append the legacy rule to the generated policy description.
    pub keep_original: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            validate_equivalence: true,
            keep_original: true,
        }
    }
}

/// Per-tenant overrides. Unset fields inherit the global engine settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TenantOverride {
    /// Evaluation deadline override.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub evaluation_timeout: Option<Duration>,

    /// Complexity ceiling override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_policy_complexity: Option<u32>,

    /// Policy cap override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_policies_per_tenant: Option<usize>,

    /// Parallel evaluation override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_evaluation: Option<bool>,

    /// Fan-out override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel_evaluations: Option<usize>,
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// The configuration file could not be read.
    #[error("Failed to read configuration file: {0}")]
    Io(String),
}

impl From<ConfigError> for PermissionsError {
    fn from(err: ConfigError) -> Self {
        PermissionsError::configuration(err.to_string())
    }
}

impl EngineConfig {
    /// Validates engine limits.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a value is outside its
    /// accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluation_timeout < MIN_EVALUATION_TIMEOUT
            || self.evaluation_timeout > MAX_EVALUATION_TIMEOUT
        {
            return Err(ConfigError::InvalidValue(format!(
                "evaluation_timeout must be between 1ms and 1s, got {:?}",
                self.evaluation_timeout
            )));
        }

        if !(10..=10_000).contains(&self.max_policy_complexity) {
            return Err(ConfigError::InvalidValue(format!(
                "max_policy_complexity must be between 10 and 10000, got {}",
                self.max_policy_complexity
            )));
        }

        if !(1..=100_000).contains(&self.max_policies_per_tenant) {
            return Err(ConfigError::InvalidValue(format!(
                "max_policies_per_tenant must be between 1 and 100000, got {}",
                self.max_policies_per_tenant
            )));
        }

        if !(1..=32).contains(&self.max_parallel_evaluations) {
            return Err(ConfigError::InvalidValue(format!(
                "max_parallel_evaluations must be between 1 and 32, got {}",
                self.max_parallel_evaluations
            )));
        }

        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max_batch_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    fn apply(&mut self, tenant: &TenantOverride) {
        if let Some(timeout) = tenant.evaluation_timeout {
            self.evaluation_timeout = timeout;
        }
        if let Some(complexity) = tenant.max_policy_complexity {
            self.max_policy_complexity = complexity;
        }
        if let Some(cap) = tenant.max_policies_per_tenant {
            self.max_policies_per_tenant = cap;
        }
        if let Some(parallel) = tenant.parallel_evaluation {
            self.parallel_evaluation = parallel;
        }
        if let Some(fan_out) = tenant.max_parallel_evaluations {
            self.max_parallel_evaluations = fan_out;
        }
    }
}

impl PermissionsConfig {
    /// Parses configuration from a TOML document and validates it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML and
    /// `ConfigError::InvalidValue` for out-of-range values.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise the
    /// errors of [`PermissionsConfig::from_toml`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&document)
    }

    /// Validates the configuration, including every tenant override merged
    /// over the global engine settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is out of range or a
    /// tenant key is not of the form `"<app>:<environment>"`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;

        if self.cache.local_max_size == 0 {
            return Err(ConfigError::InvalidValue(
                "cache.local_max_size must be > 0".to_string(),
            ));
        }

        if self.cache.local_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "cache.local_ttl must be > 0".to_string(),
            ));
        }

        for (key, tenant) in &self.tenants {
            let valid_key = key.split_once(SCOPE_SEPARATOR).is_some_and(|(app, env)| {
                !app.is_empty() && !env.is_empty() && !env.contains(SCOPE_SEPARATOR)
            });
            if !valid_key {
                return Err(ConfigError::InvalidValue(format!(
                    "tenant override key '{}' must be '<app>:<environment>'",
                    key
                )));
            }

            let mut merged = self.engine.clone();
            merged.apply(tenant);
            merged
                .validate()
                .map_err(|e| ConfigError::InvalidValue(format!("tenants.\"{}\": {}", key, e)))?;
        }

        Ok(())
    }

    /// Returns the engine settings for a tenant, with its overrides merged
    /// over the global defaults.
    ///
    /// Ids containing the separator never match an override.
    #[must_use]
    pub fn for_tenant(&self, app_id: &str, environment_id: &str) -> EngineConfig {
        let mut engine = self.engine.clone();
        if app_id.contains(SCOPE_SEPARATOR) || environment_id.contains(SCOPE_SEPARATOR) {
            return engine;
        }
        let key = format!("{}{}{}", app_id, SCOPE_SEPARATOR, environment_id);
        if let Some(tenant) = self.tenants.get(&key) {
            engine.apply(tenant);
        }
        engine
    }
}
