pub mod config;
pub mod types;

pub use config::{
    AuthStyle, CapplanConfig, ConfigError, ConfigResult, ControlPlaneConfig, ConvertSettings,
    ProvisionOptions, RetrySettings, RowErrorPolicy, DEFAULT_MAX_QUANTITY,
};
pub use types::*;
