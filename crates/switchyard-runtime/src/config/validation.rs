//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{DispatchConfig, LogOutput, LoggingConfig, RuntimeConfig, SwitchyardConfig};

/// Shortest handler id accepted; shorter ids make collisions likely.
pub const MIN_ID_LENGTH: usize = 8;

/// Validates the entire configuration.
pub fn validate_config(config: &SwitchyardConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_dispatch_config(&config.dispatch)?;
    validate_runtime_config(&config.runtime)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output = \"file\"",
        ));
    }
    Ok(())
}

fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.id_length < MIN_ID_LENGTH {
        return Err(ConfigError::validation(format!(
            "dispatch.id_length must be at least {MIN_ID_LENGTH}, got {}",
            dispatch.id_length
        )));
    }
    Ok(())
}

fn validate_runtime_config(runtime: &RuntimeConfig) -> ConfigResult<()> {
    if runtime.workers == 0 {
        return Err(ConfigError::validation("runtime.workers must be greater than 0"));
    }
    if runtime.queue_capacity == 0 {
        return Err(ConfigError::validation(
            "runtime.queue_capacity must be greater than 0",
        ));
    }
    Ok(())
}
