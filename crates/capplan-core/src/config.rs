//! capplan.toml configuration parser.
//!
//! The configuration is loaded once at process start and passed by
//! reference into the converter and orchestrator. Credentials are never
//! written to the file; they come from the environment via [`CapplanConfig::apply_env`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid capplan.toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapplanConfig {
    pub control_plane: ControlPlaneConfig,
    pub provision: ProvisionOptions,
    pub retry: RetrySettings,
    pub convert: ConvertSettings,
}

/// How requests authenticate against the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    #[default]
    Bearer,
    /// `x-api-key: <key>` plus `x-api-secret-key` when a secret is set.
    ApiKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub base_url: String,
    pub auth: AuthStyle,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
    pub account_id: Option<String>,
    pub cloud_provider: Option<String>,
    pub region: Option<String>,
    pub payment_method_id: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.redislabs.com/v1".to_string(),
            auth: AuthStyle::Bearer,
            api_key: None,
            api_secret: None,
            account_id: None,
            cloud_provider: None,
            region: None,
            payment_method_id: None,
            request_timeout_secs: 30,
        }
    }
}

impl ControlPlaneConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Caller-tunable knobs for one provisioning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionOptions {
    /// Seconds between aggregate status checks.
    pub poll_interval_secs: u64,
    /// Overall budget for the aggregate to become active.
    pub poll_timeout_secs: u64,
    /// Attempt ceiling for each retried remote call (first try included).
    pub max_retries: u32,
    /// Resource-creation calls allowed in flight at once.
    pub resource_concurrency: usize,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            poll_timeout_secs: 900,
            max_retries: 5,
            resource_concurrency: 4,
        }
    }
}

impl ProvisionOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

/// Backoff shape shared by aggregate submission and resource creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// No retry is scheduled once this much time has passed since the first attempt.
    pub max_elapsed_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            max_elapsed_secs: 300,
        }
    }
}

/// What to do with a row that fails normalization or materialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorPolicy {
    #[default]
    Abort,
    Skip,
}

/// Largest quantity a single row may request.
pub const DEFAULT_MAX_QUANTITY: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertSettings {
    pub on_invalid_row: RowErrorPolicy,
    /// Modules applied to resources whose row lists none.
    pub default_modules: Vec<String>,
    /// Worksheet to read from spreadsheet inputs (first sheet when unset).
    pub sheet: Option<String>,
    /// Keep only rows whose `env` column matches (case-insensitive).
    pub env_filter: Option<String>,
    /// Round dataset sizes to this many decimals. Unset keeps full precision.
    pub size_precision: Option<u32>,
    /// Rows asking for more instances than this are rejected.
    pub max_quantity: u32,
}

impl Default for ConvertSettings {
    fn default() -> Self {
        Self {
            on_invalid_row: RowErrorPolicy::default(),
            default_modules: Vec::new(),
            sheet: None,
            env_filter: None,
            size_precision: None,
            max_quantity: DEFAULT_MAX_QUANTITY,
        }
    }
}

impl CapplanConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: CapplanConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given (defaults otherwise), then overlay the
    /// process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay `CAPPLAN_*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let cp = &mut self.control_plane;

        if let Some(v) = get("CAPPLAN_BASE_URL") {
            cp.base_url = v;
        }
        if let Some(v) = get("CAPPLAN_API_KEY") {
            cp.api_key = Some(v);
        }
        if let Some(v) = get("CAPPLAN_API_SECRET") {
            cp.api_secret = Some(v);
        }
        if let Some(v) = get("CAPPLAN_ACCOUNT_ID") {
            cp.account_id = Some(v);
        }
        if let Some(v) = get("CAPPLAN_CLOUD_PROVIDER") {
            cp.cloud_provider = Some(v);
        }
        if let Some(v) = get("CAPPLAN_REGION") {
            cp.region = Some(v);
        }
        if let Some(v) = get("CAPPLAN_PAYMENT_METHOD_ID") {
            cp.payment_method_id = Some(v);
        }
        if let Some(v) = get("CAPPLAN_AUTH_HEADER") {
            match v.to_ascii_lowercase().as_str() {
                "x-api-key" | "api-key" => cp.auth = AuthStyle::ApiKey,
                "bearer" => cp.auth = AuthStyle::Bearer,
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let p = &self.provision;
        if p.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "provision.poll_interval_secs must be at least 1".into(),
            ));
        }
        if p.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "provision.max_retries must be at least 1".into(),
            ));
        }
        if p.resource_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "provision.resource_concurrency must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        if self.convert.max_quantity == 0 {
            return Err(ConfigError::Invalid(
                "convert.max_quantity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Fields required before any remote call can be made.
    pub fn missing_control_plane_fields(&self) -> Vec<&'static str> {
        let cp = &self.control_plane;
        let mut missing = Vec::new();
        if cp.api_key.is_none() {
            missing.push("CAPPLAN_API_KEY");
        }
        if cp.cloud_provider.is_none() {
            missing.push("CAPPLAN_CLOUD_PROVIDER");
        }
        if cp.region.is_none() {
            missing.push("CAPPLAN_REGION");
        }
        missing
    }
}
