//! Ambient engine configuration, resolved from environment with sane defaults,
//! in the same env-var-overrides-default style the teacher's `config` module uses.

use std::time::Duration;

/// Resolved configuration for connecting to and driving the engine's database.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub default_page_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/metaform".to_string(),
            max_retries: 5,
            retry_delay: Duration::from_millis(200),
            default_page_size: 30,
        }
    }
}

impl EngineConfig {
    /// Resolve configuration from the environment, falling back to defaults
    /// for anything unset. Does not require a `.env` file to be present.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);

        let max_retries = std::env::var("ENGINE_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_retries);

        let retry_delay = std::env::var("ENGINE_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_delay);

        let default_page_size = std::env::var("ENGINE_DEFAULT_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.default_page_size);

        Self {
            database_url,
            max_retries,
            retry_delay,
            default_page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(200));
        assert_eq!(config.default_page_size, 30);
    }
}
