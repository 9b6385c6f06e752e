use crate::{env_or_default, ConfigError, FromEnv};

/// Redis connection settings
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl FromEnv for RedisConfig {
    /// Reads `REDIS_URL`, defaulting to a local instance.
    fn from_env() -> Result<Self, ConfigError> {
        let url = env_or_default("REDIS_URL", "redis://127.0.0.1:6379");
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ConfigError::Invalid {
                key: "REDIS_URL".to_string(),
                details: format!("expected a redis:// or rediss:// url, got '{}'", url),
            });
        }
        Ok(Self { url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_default() {
        temp_env::with_var_unset("REDIS_URL", || {
            let config = RedisConfig::from_env().unwrap();
            assert_eq!(config.url, "redis://127.0.0.1:6379");
        });
    }

    #[test]
    fn test_redis_config_from_env() {
        temp_env::with_var("REDIS_URL", Some("rediss://cache.internal:6380"), || {
            let config = RedisConfig::from_env().unwrap();
            assert_eq!(config.url, "rediss://cache.internal:6380");
        });
    }

    #[test]
    fn test_redis_config_rejects_other_schemes() {
        temp_env::with_var("REDIS_URL", Some("http://localhost:6379"), || {
            let err = RedisConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("REDIS_URL"));
        });
    }
}
