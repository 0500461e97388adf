//! Data model of the providers document.

use eogate_types::Queryable;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_RESULTS_ENTRY: &str = "$.features";
pub const DEFAULT_ITEMS_PER_PAGE: usize = 20;
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_CONSTRAINTS_TTL_SECS: u64 = 3600;

/// Top-level `providers.yaml` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidersDocument {
    #[serde(default)]
    pub settings: GatewaySettings,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySettings {
    /// Upper bound on concurrent provider searches in batch and multi-provider calls.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_constraints_ttl")]
    pub constraints_cache_ttl_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            constraints_cache_ttl_secs: DEFAULT_CONSTRAINTS_TTL_SECS,
        }
    }
}

/// One remote catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Higher wins; equal priorities keep declaration order.
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub search: SearchConfig,
    #[serde(default)]
    pub products: IndexMap<String, ProductTypeConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Provider-wide queryable declarations.
    #[serde(default)]
    pub queryables: IndexMap<String, Queryable>,
    /// Template of the URL serving external constraints for a product type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints_url: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchType {
    #[default]
    QueryStringSearch,
    PostJsonSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    #[serde(rename = "type", default)]
    pub search_type: SearchType,
    /// Endpoint template, e.g. `https://catalogue.example/collections/{collection}/items`.
    pub api_endpoint: String,
    #[serde(default = "default_results_entry")]
    pub results_entry: String,
    #[serde(default)]
    pub pagination: PaginationSettings,
    #[serde(default)]
    pub metadata_mapping: IndexMap<String, Value>,
    /// Parameters sent with every search.
    #[serde(default)]
    pub literal_search_params: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discover_metadata: Option<DiscoverMetadata>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextPageStrategy {
    #[default]
    Page,
    Cursor,
    NextUrl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaginationSettings {
    #[serde(default = "default_items_per_page")]
    pub items_per_page: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items_per_page: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_items_nb_key_path: Option<String>,
    #[serde(default)]
    pub next_page_strategy: NextPageStrategy,
    /// Template over `items_per_page`, `page`, `skip` and `skip_base_1`.
    /// Renders either `a=1&b=2` query parameters or a `{{...}}` body fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_params: Option<String>,
    /// Where the cursor token or next URL is read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_param: Option<String>,
    /// Dedicated count endpoint template; answers with a bare number or a
    /// document holding `total_items_nb_key_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_endpoint: Option<String>,
    #[serde(default = "default_start_page")]
    pub start_page: u32,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
            max_items_per_page: None,
            total_items_nb_key_path: None,
            next_page_strategy: NextPageStrategy::Page,
            next_page_params: None,
            next_page_key_path: None,
            cursor_param: None,
            count_endpoint: None,
            start_page: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoverMetadata {
    #[serde(default = "default_metadata_path")]
    pub metadata_path: String,
    #[serde(default = "default_metadata_pattern")]
    pub metadata_pattern: String,
}

/// Per product type settings. Keys not listed here are native parameters,
/// such as the provider's own `collection` or `productType` name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductTypeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata_mapping: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub queryables: IndexMap<String, Queryable>,
    #[serde(flatten)]
    pub params: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    /// Header values may use `${env:NAME}`.
    Header { headers: IndexMap<String, String> },
    /// API key style query parameters; values may use `${env:NAME}`.
    Query { params: IndexMap<String, String> },
    /// Basic auth from `~/.netrc`, keyed by `machine` or the endpoint host.
    Netrc {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        machine: Option<String>,
    },
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_constraints_ttl() -> u64 {
    DEFAULT_CONSTRAINTS_TTL_SECS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_results_entry() -> String {
    DEFAULT_RESULTS_ENTRY.to_string()
}

fn default_items_per_page() -> usize {
    DEFAULT_ITEMS_PER_PAGE
}

fn default_start_page() -> u32 {
    1
}

fn default_metadata_path() -> String {
    "$.properties.*".to_string()
}

fn default_metadata_pattern() -> String {
    "^[a-zA-Z0-9_:-]+$".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_defaults() {
        let provider: ProviderConfig = serde_yaml::from_str(
            "name: peps\nsearch:\n  api_endpoint: https://peps.example/search\n",
        )
        .unwrap();
        assert_eq!(provider.priority, 0);
        assert_eq!(provider.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(provider.search.search_type, SearchType::QueryStringSearch);
        assert_eq!(provider.search.results_entry, "$.features");
        assert_eq!(provider.search.pagination.items_per_page, 20);
        assert_eq!(provider.search.pagination.start_page, 1);
        assert_eq!(provider.auth, AuthConfig::None);
    }

    #[test]
    fn product_type_native_params_are_flattened() {
        let product: ProductTypeConfig = serde_yaml::from_str(
            "collection: SENTINEL2\nproductType: S2MSI1C\naliases: [S2_L1C]\n",
        )
        .unwrap();
        assert_eq!(product.aliases, vec!["S2_L1C".to_string()]);
        assert_eq!(product.params.len(), 2);
        assert_eq!(product.params["collection"], Value::String("SENTINEL2".into()));
    }

    #[test]
    fn auth_is_tagged_by_type() {
        let auth: AuthConfig = serde_yaml::from_str("type: header\nheaders:\n  X-Api-Key: ${env:KEY}\n").unwrap();
        assert!(matches!(auth, AuthConfig::Header { ref headers } if headers["X-Api-Key"] == "${env:KEY}"));
        let auth: AuthConfig = serde_yaml::from_str("type: netrc\n").unwrap();
        assert_eq!(auth, AuthConfig::Netrc { machine: None });
    }

    #[test]
    fn unknown_provider_keys_are_rejected() {
        let parsed: Result<ProviderConfig, _> =
            serde_yaml::from_str("name: p\nsearch:\n  api_endpoint: https://x.example\nbogus: 1\n");
        assert!(parsed.is_err());
    }
}
