use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - HTTP timeout is not 0
/// - Audit channel capacity is not 0 (a zero-capacity channel cannot be
///   constructed)
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.crawler.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "crawler.timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.audit.buffer == 0 {
        return Err(ConfigError::ValidationError(
            "audit.buffer cannot be 0".to_string(),
        ));
    }

    Ok(())
}
