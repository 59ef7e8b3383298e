//! Configuration module for the Switchyard runtime.
//!
//! Settings are layered with figment (defaults, files, environment) and
//! validated before the runtime is built.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    DispatchConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, RuntimeConfig,
    SpanEventConfig, SwitchyardConfig,
};
pub use validation::validate_config;
