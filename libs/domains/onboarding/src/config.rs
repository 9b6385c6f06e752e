//! Component configuration.
//!
//! Each consumer is handed its config at construction time.

use crate::policy::PolicyConfig;
use core_config::{env_or_default, env_parse, ConfigError, FromEnv};

pub const DEFAULT_USERS_TABLE: &str = "users";
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;
pub const DEFAULT_CONFIRMATION_URL: &str = "http://fake.newsletter.com";

/// Configuration for the ingestion consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionConfig {
    /// Store namespace; records live under `{users_table}:{id}`.
    pub users_table: String,
    pub policy: PolicyConfig,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            users_table: DEFAULT_USERS_TABLE.to_string(),
            policy: PolicyConfig::default(),
        }
    }
}

impl IngestionConfig {
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }
}

impl FromEnv for IngestionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let users_table = env_or_default("USERS_TABLE", DEFAULT_USERS_TABLE);
        if users_table.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "USERS_TABLE".to_string(),
                details: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            users_table,
            policy: PolicyConfig::from_env()?,
        })
    }
}

/// Welcome email wording.
///
/// `{{name}}` is HTML-escaped in the body. The confirmation URL is inserted
/// as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeTemplateConfig {
    pub subject: String,
    pub welcome_html: String,
    pub confirmation_html: String,
    pub confirmation_url: String,
}

impl Default for WelcomeTemplateConfig {
    fn default() -> Self {
        Self {
            subject: "Bienvenido, {{name}}!".to_string(),
            welcome_html: "<p>Bienvenido a nuestro newsletter, <b>{{name}}</b>!</p>".to_string(),
            confirmation_html: "<p>Por favor confirmá tu email en el siguiente enlace -> \
                                {{{confirmation_url}}}</p>"
                .to_string(),
            confirmation_url: DEFAULT_CONFIRMATION_URL.to_string(),
        }
    }
}

impl FromEnv for WelcomeTemplateConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            confirmation_url: env_or_default("CONFIRMATION_URL", DEFAULT_CONFIRMATION_URL),
            ..Self::default()
        })
    }
}

/// Configuration for the change fan-out consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutConfig {
    /// Upper bound on jobs per submit call; the queue's own limit also applies.
    pub max_batch_size: usize,
    /// Submissions per job, including the first.
    pub max_submit_attempts: u32,
    /// Base delay before resubmitting failed entries. Zero disables waiting.
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub policy: PolicyConfig,
    pub template: WelcomeTemplateConfig,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_submit_attempts: 3,
            retry_backoff_ms: 100,
            max_backoff_ms: 5_000,
            policy: PolicyConfig::default(),
            template: WelcomeTemplateConfig::default(),
        }
    }
}

impl FanOutConfig {
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn with_max_submit_attempts(mut self, attempts: u32) -> Self {
        self.max_submit_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.retry_backoff_ms = backoff_ms;
        self
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_template(mut self, template: WelcomeTemplateConfig) -> Self {
        self.template = template;
        self
    }
}

impl FromEnv for FanOutConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_batch_size = env_parse("WELCOME_QUEUE_MAX_BATCH", defaults.max_batch_size)?;
        if max_batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "WELCOME_QUEUE_MAX_BATCH".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        let max_submit_attempts = env_parse("FANOUT_MAX_SUBMIT_ATTEMPTS", defaults.max_submit_attempts)?;
        if max_submit_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "FANOUT_MAX_SUBMIT_ATTEMPTS".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            max_batch_size,
            max_submit_attempts,
            retry_backoff_ms: env_parse("FANOUT_RETRY_BACKOFF_MS", defaults.retry_backoff_ms)?,
            max_backoff_ms: defaults.max_backoff_ms,
            policy: PolicyConfig::from_env()?,
            template: WelcomeTemplateConfig::from_env()?,
        })
    }
}
