//! Structural validation of the providers document.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::model::{NextPageStrategy, ProviderConfig, ProvidersDocument};

static PROVIDER_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9._-]+$").expect("provider name regex should compile"));

/// Validate document-level settings and provider name uniqueness.
///
/// Per-provider problems are reported by [`validate_provider`]; the snapshot
/// compiler uses it to exclude a single bad provider instead of the whole
/// document.
pub fn validate_document(document: &ProvidersDocument) -> Result<(), ValidationError> {
    if document.settings.max_workers == 0 {
        return Err(ValidationError::InvalidSetting {
            field: "max_workers".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    let mut seen = HashSet::new();
    for provider in &document.providers {
        if !seen.insert(provider.name.as_str()) {
            return Err(ValidationError::DuplicateProvider {
                name: provider.name.clone(),
            });
        }
    }
    Ok(())
}

/// Validate a provider name.
pub fn validate_provider_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::InvalidProviderName {
            name: name.to_string(),
            reason: "Provider name cannot be empty".to_string(),
        });
    }
    if !PROVIDER_NAME_REGEX.is_match(name) {
        return Err(ValidationError::InvalidProviderName {
            name: name.to_string(),
            reason: "Provider name must contain only lowercase letters, numbers, dots, underscores, and hyphens"
                .to_string(),
        });
    }
    Ok(())
}

/// Validate a single provider configuration.
pub fn validate_provider(provider: &ProviderConfig) -> Result<(), ValidationError> {
    validate_provider_name(&provider.name)?;
    let name = provider.name.as_str();

    validate_endpoint(name, "api_endpoint", &provider.search.api_endpoint)?;
    if let Some(url) = &provider.constraints_url {
        validate_endpoint(name, "constraints_url", url)?;
    }
    if let Some(url) = &provider.search.pagination.count_endpoint {
        validate_endpoint(name, "count_endpoint", url)?;
    }

    if provider.timeout_secs == 0 {
        return Err(invalid(name, "timeout_secs must be positive"));
    }
    if provider.max_attempts == 0 {
        return Err(invalid(name, "max_attempts must be at least 1"));
    }

    let pagination = &provider.search.pagination;
    if pagination.items_per_page == 0 {
        return Err(ValidationError::InvalidPagination {
            provider: name.to_string(),
            reason: "items_per_page must be positive".to_string(),
        });
    }
    if let Some(max) = pagination.max_items_per_page
        && max < pagination.items_per_page
    {
        return Err(ValidationError::InvalidPagination {
            provider: name.to_string(),
            reason: format!("max_items_per_page ({max}) is below items_per_page ({})", pagination.items_per_page),
        });
    }
    if matches!(pagination.next_page_strategy, NextPageStrategy::Cursor | NextPageStrategy::NextUrl)
        && pagination.next_page_key_path.is_none()
    {
        return Err(ValidationError::InvalidPagination {
            provider: name.to_string(),
            reason: "cursor and next_url strategies need next_page_key_path".to_string(),
        });
    }
    if pagination.next_page_strategy == NextPageStrategy::Cursor && pagination.cursor_param.is_none() {
        return Err(ValidationError::InvalidPagination {
            provider: name.to_string(),
            reason: "cursor strategy needs cursor_param".to_string(),
        });
    }

    if provider.products.keys().any(|product_type| product_type.trim().is_empty()) {
        return Err(invalid(name, "product type names cannot be empty"));
    }

    debug!(provider = %name, "validated provider configuration");
    Ok(())
}

/// Endpoint templates must at least name an http(s) scheme; literal
/// endpoints must parse as URLs.
fn validate_endpoint(provider: &str, field: &str, template: &str) -> Result<(), ValidationError> {
    let endpoint_error = |reason: String| ValidationError::InvalidEndpoint {
        provider: provider.to_string(),
        field: field.to_string(),
        reason,
    };
    let trimmed = template.trim();
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(endpoint_error(format!("'{trimmed}' must start with http:// or https://")));
    }
    if !trimmed.contains('{') {
        Url::parse(trimmed).map_err(|error| endpoint_error(format!("'{trimmed}': {error}")))?;
    }
    Ok(())
}

fn invalid(provider: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidProvider {
        provider: provider.to_string(),
        reason: reason.to_string(),
    }
}

/// Errors that can occur during validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid provider name '{name}': {reason}")]
    InvalidProviderName { name: String, reason: String },

    #[error("Provider '{name}' is declared more than once")]
    DuplicateProvider { name: String },

    #[error("Provider '{provider}' has an invalid {field}: {reason}")]
    InvalidEndpoint {
        provider: String,
        field: String,
        reason: String,
    },

    #[error("Provider '{provider}' has invalid pagination settings: {reason}")]
    InvalidPagination { provider: String, reason: String },

    #[error("Provider '{provider}' is invalid: {reason}")]
    InvalidProvider { provider: String, reason: String },

    #[error("Invalid setting '{field}': {reason}")]
    InvalidSetting { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(yaml: &str) -> ProviderConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_validate_provider_name() {
        assert!(validate_provider_name("peps").is_ok());
        assert!(validate_provider_name("earth_search-2").is_ok());
        assert!(validate_provider_name("").is_err());
        assert!(validate_provider_name("Peps").is_err());
        assert!(validate_provider_name("my provider").is_err());
    }

    #[test]
    fn test_validate_endpoint_templates() {
        let ok = provider("name: p\nsearch:\n  api_endpoint: https://x.example/collections/{collection}/items\n");
        assert!(validate_provider(&ok).is_ok());
        let bad = provider("name: p\nsearch:\n  api_endpoint: ftp://x.example\n");
        assert!(matches!(validate_provider(&bad), Err(ValidationError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_validate_pagination() {
        let bad = provider(
            "name: p\nsearch:\n  api_endpoint: https://x.example\n  pagination:\n    items_per_page: 50\n    max_items_per_page: 10\n",
        );
        assert!(matches!(validate_provider(&bad), Err(ValidationError::InvalidPagination { .. })));
        let bad = provider(
            "name: p\nsearch:\n  api_endpoint: https://x.example\n  pagination:\n    next_page_strategy: next_url\n",
        );
        assert!(matches!(validate_provider(&bad), Err(ValidationError::InvalidPagination { .. })));
    }

    #[test]
    fn test_duplicate_providers() {
        let document: ProvidersDocument = serde_yaml::from_str(
            "providers:\n  - name: p\n    search: {api_endpoint: 'https://a.example'}\n  - name: p\n    search: {api_endpoint: 'https://b.example'}\n",
        )
        .unwrap();
        assert_eq!(
            validate_document(&document),
            Err(ValidationError::DuplicateProvider { name: "p".to_string() })
        );
    }
}
