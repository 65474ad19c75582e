use crate::config::types::AppConfig;

/// Checks an `AppConfig` against the constraints the rest of the crate
/// relies on. Returns the first violation found, if any.
pub fn validate_config(config: &AppConfig) -> Result<(), String> {
    if config.allowed_roots.is_empty() {
        return Err("allowed_roots must not be empty".to_string());
    }

    if config.reactors == 0 {
        return Err("reactors must be at least 1".to_string());
    }

    if config.writers == 0 {
        return Err("writers must be at least 1".to_string());
    }

    if config.max_pack_body > 128 * 1024 * 1024 {
        return Err(format!(
            "max_pack_body {} exceeds the wire format limit of {} bytes",
            config.max_pack_body,
            128 * 1024 * 1024
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ExtractionConfig, ListenConfig};

    fn base_config() -> AppConfig {
        AppConfig::default()
    }

    #[test]
    fn test_validate_default_ok() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_empty_allowed_roots_rejected() {
        let mut config = base_config();
        config.allowed_roots.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_reactors_rejected() {
        let mut config = base_config();
        config.reactors = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_writers_rejected() {
        let mut config = base_config();
        config.writers = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_oversized_max_pack_body_rejected() {
        let mut config = base_config();
        config.max_pack_body = 128 * 1024 * 1024 + 1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_custom_valid_config_ok() {
        let config = AppConfig {
            listen: ListenConfig { host: "127.0.0.1".to_string(), port: 9113 },
            reactors: 4,
            writers: 8,
            queue_depth: 8,
            max_pack_body: 64 * 1024 * 1024,
            allowed_roots: vec!["/data".to_string(), "/mnt/games".to_string()],
            extraction: ExtractionConfig { preset: "turbo".to_string() },
            log_dir: None,
            pid_file: None,
        };
        assert!(validate_config(&config).is_ok());
    }
}
