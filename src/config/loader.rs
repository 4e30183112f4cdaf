//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{LogFormat, ServiceConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, then apply process
/// environment overrides, then validate.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`] with an injectable environment lookup.
pub fn load_with_env<F>(path: Option<&Path>, env: F) -> Result<ServiceConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => ServiceConfig::default(),
    };

    let mut errors = apply_env_overrides(&mut config, env);
    if let Err(mut invalid) = validate_config(&config) {
        errors.append(&mut invalid);
    }

    if errors.is_empty() {
        Ok(config)
    } else {
        Err(ConfigError::Validation(errors))
    }
}

/// Overlay environment variables onto `config`. Blank values are ignored.
fn apply_env_overrides<F>(config: &mut ServiceConfig, env: F) -> Vec<ValidationError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());
    let mut errors = Vec::new();

    if let Some(value) = lookup("APP_ENV") {
        match value.parse() {
            Ok(environment) => config.environment = environment,
            Err(reason) => errors.push(ValidationError::InvalidEnv { key: "APP_ENV", reason }),
        }
    }

    if let Some(value) = lookup("PORT") {
        match value.trim().parse::<u16>() {
            Ok(port) => config.port = port,
            Err(e) => errors.push(ValidationError::InvalidEnv {
                key: "PORT",
                reason: e.to_string(),
            }),
        }
    }

    if let Some(value) = lookup("SERVICE_NAME") {
        config.service_name = value;
    }
    if let Some(value) = lookup("DATABASE_URL") {
        config.database_url = Some(value);
    }
    if let Some(value) = lookup("REDIS_URL") {
        config.redis_url = Some(value);
    }

    if let Some(value) = lookup("ALLOWED_ORIGINS") {
        config.http.allowed_origins = value
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_owned)
            .collect();
    }

    if let Some(value) = lookup("LOG_LEVEL") {
        config.observability.log_level = value;
    }

    if let Some(value) = lookup("LOG_FORMAT") {
        match value.trim() {
            "json" => config.observability.log_format = LogFormat::Json,
            "pretty" => config.observability.log_format = LogFormat::Pretty,
            other => errors.push(ValidationError::InvalidEnv {
                key: "LOG_FORMAT",
                reason: format!("expected json or pretty, got '{other}'"),
            }),
        }
    }

    errors
}
