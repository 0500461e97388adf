//! `${env:NAME}` interpolation for credential-bearing configuration values.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

static ENV_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{env:([\w+_-]*)}").expect("env placeholder regex should compile"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpolationError {
    #[error("Missing environment variable: {name}")]
    MissingEnvVar { name: String },
}

/// Returns true when `value` contains at least one `${env:NAME}` placeholder.
pub fn contains_env_placeholder(value: &str) -> bool {
    ENV_PLACEHOLDER.is_match(value)
}

/// Replaces every `${env:NAME}` placeholder with the variable's value.
///
/// # Errors
/// Returns [`InterpolationError::MissingEnvVar`] for the first variable that
/// is not set.
pub fn interpolate_string(value: &str) -> Result<String, InterpolationError> {
    let mut resolved = Vec::new();
    for captures in ENV_PLACEHOLDER.captures_iter(value) {
        let name = captures[1].to_string();
        let env_value = std::env::var(&name).map_err(|_| InterpolationError::MissingEnvVar { name: name.clone() })?;
        debug!(variable = %name, "interpolated env var -> [REDACTED]");
        resolved.push((captures[0].to_string(), env_value));
    }

    let mut result = value.to_string();
    for (placeholder, env_value) in resolved {
        result = result.replace(&placeholder, &env_value);
    }
    Ok(result)
}
