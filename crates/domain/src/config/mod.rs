mod collab;
mod models;
mod server;
mod store;

pub use collab::*;
pub use models::*;
pub use server::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub collab: CollabConfig,
}

/// Deployment environment. Selects the stream-subscription max session
/// age among other thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Config {
    /// Apply environment-variable overrides on top of the file config.
    ///
    /// `vars` is passed in (rather than read here) so tests can inject.
    pub fn apply_env_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "PORT" => {
                    if let Ok(v) = value.parse() {
                        self.server.port = v;
                    }
                }
                "HOST" => self.server.host = value,
                "CORS_ORIGIN" => self.server.cors.allowed_origins = vec![value],
                "MODEL_CONTEXT_SIZE" => {
                    if let Ok(v) = value.parse() {
                        self.models.context_size = v;
                    }
                }
                "MODEL_BATCH_SIZE" => {
                    if let Ok(v) = value.parse() {
                        self.models.batch_size = v;
                    }
                }
                "MODEL_THREADS" => {
                    if let Ok(v) = value.parse() {
                        self.models.threads = v;
                    }
                }
                "MODEL_GPU_LAYERS" => {
                    if let Ok(v) = value.parse() {
                        self.models.gpu_layers = v;
                    }
                }
                "CONTEXTS_PER_MODEL" => {
                    if let Ok(v) = value.parse() {
                        self.models.contexts_per_model = v;
                    }
                }
                "REDIS_HOST" => self.store.redis_host = value,
                "REDIS_PORT" => {
                    if let Ok(v) = value.parse() {
                        self.store.redis_port = v;
                    }
                }
                "MAX_CONCURRENT_SESSIONS" => {
                    if let Ok(v) = value.parse() {
                        self.collab.max_concurrent_sessions = v;
                    }
                }
                "SESSION_TIMEOUT" => {
                    if let Ok(v) = value.parse() {
                        self.store.session_ttl_secs = v;
                    }
                }
                "ENVIRONMENT" | "NODE_ENV" => {
                    self.environment = if value.eq_ignore_ascii_case("production") {
                        Environment::Production
                    } else {
                        Environment::Development
                    };
                }
                // LOG_LEVEL is consumed by the tracing EnvFilter in main.
                _ => {}
            }
        }
    }

    /// Validate the configuration, returning severity-tagged issues.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut error = |field: &str, message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.to_owned(),
                message,
            });
        };

        if self.models.contexts_per_model == 0 {
            error(
                "models.contexts_per_model",
                "must be at least 1".to_owned(),
            );
        }
        if self.models.context_size < 512 {
            error(
                "models.context_size",
                format!("{} is too small to hold a prompt", self.models.context_size),
            );
        }
        if !(0.0..=1.0).contains(&self.collab.max_context_usage) {
            error(
                "collab.max_context_usage",
                "must be within [0,1]".to_owned(),
            );
        }
        if self.collab.max_rounds_per_phase == 0 {
            error("collab.max_rounds_per_phase", "must be at least 1".to_owned());
        }

        let mut warn = |field: &str, message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: field.to_owned(),
                message,
            });
        };
        if self.collab.max_context_usage > 0.9 {
            warn(
                "collab.max_context_usage",
                "leaves little headroom for template overhead".to_owned(),
            );
        }
        if self.server.cors.allowed_origins.iter().any(|o| o == "*") {
            warn("server.cors", "wildcard origin allows all origins".to_owned());
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean_of_errors() {
        let config = Config::default();
        let issues = config.validate();
        assert!(issues
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config.apply_env_overrides(vec![
            ("PORT".to_owned(), "9001".to_owned()),
            ("CONTEXTS_PER_MODEL".to_owned(), "4".to_owned()),
            ("NODE_ENV".to_owned(), "production".to_owned()),
            ("UNRELATED".to_owned(), "ignored".to_owned()),
        ]);
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.models.contexts_per_model, 4);
        assert_eq!(config.environment, Environment::Production);
    }

    #[test]
    fn garbage_env_values_are_ignored() {
        let mut config = Config::default();
        let before = config.server.port;
        config.apply_env_overrides(vec![("PORT".to_owned(), "not-a-port".to_owned())]);
        assert_eq!(config.server.port, before);
    }

    #[test]
    fn toml_round_trip() {
        let config = Config::default();
        let raw = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&raw).unwrap();
        assert_eq!(back.server.port, config.server.port);
        assert_eq!(back.models.context_size, config.models.context_size);
    }

    #[test]
    fn zero_pool_size_is_an_error() {
        let mut config = Config::default();
        config.models.contexts_per_model = 0;
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }
}
