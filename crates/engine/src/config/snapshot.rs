//! Compiled, immutable views of the providers document.
//!
//! A [`CatalogSnapshot`] is built once per document version. Searches clone
//! the current `Arc` and keep using it even if a newer snapshot is published
//! while they run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use eogate_types::Queryable;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::model::{AuthConfig, GatewaySettings, NextPageStrategy, ProductTypeConfig, ProviderConfig, ProvidersDocument};
use super::validation::validate_provider;
use crate::error::{GatewayError, ProviderFailure};
use crate::mapping::FieldMapping;
use crate::mapping::path::JsonPath;
use crate::mapping::template::Template;
use crate::plugin::SearchPlugin;

#[derive(Debug, Clone)]
pub struct CompiledPagination {
    pub items_per_page: usize,
    pub max_items_per_page: Option<usize>,
    pub total_items_path: Option<JsonPath>,
    pub strategy: NextPageStrategy,
    pub next_page_params: Option<Template>,
    pub next_page_path: Option<JsonPath>,
    pub cursor_param: Option<String>,
    pub count_endpoint: Option<Template>,
    pub start_page: u32,
}

impl CompiledPagination {
    /// Page size for a request, capped by the provider maximum.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        let size = requested.filter(|size| *size > 0).unwrap_or(self.items_per_page);
        match self.max_items_per_page {
            Some(max) => size.min(max),
            None => size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataDiscovery {
    pub path: JsonPath,
    pub pattern: Regex,
}

/// Everything needed to query one provider for one product type.
#[derive(Debug, Clone)]
pub struct ProviderMapping {
    pub provider: String,
    pub product_type: String,
    pub plugin: SearchPlugin,
    pub endpoint: Template,
    pub fields: FieldMapping,
    /// Product-type parameters such as the provider's collection name.
    pub native_params: IndexMap<String, Value>,
    pub literal_params: IndexMap<String, Value>,
    pub results_entry: JsonPath,
    pub pagination: CompiledPagination,
    pub discovery: Option<MetadataDiscovery>,
    pub auth: AuthConfig,
    pub timeout: Duration,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ProductTypeEntry {
    pub name: String,
    pub mapping: Arc<ProviderMapping>,
    /// Product-type queryable overrides.
    pub queryables: IndexMap<String, Queryable>,
}

#[derive(Debug, Clone)]
pub struct CompiledProvider {
    pub name: String,
    pub description: Option<String>,
    pub priority: i64,
    pub declaration_index: usize,
    pub plugin: SearchPlugin,
    pub products: IndexMap<String, ProductTypeEntry>,
    /// Alias to canonical product type name.
    pub aliases: HashMap<String, String>,
    pub queryables: IndexMap<String, Queryable>,
    pub constraints_url: Option<Template>,
}

impl CompiledProvider {
    /// Looks a product type up by name or alias.
    pub fn product(&self, product_type: &str) -> Option<&ProductTypeEntry> {
        self.products.get(product_type).or_else(|| {
            self.aliases
                .get(product_type)
                .and_then(|canonical| self.products.get(canonical))
        })
    }

    pub fn offers(&self, product_type: &str) -> bool {
        self.product(product_type).is_some()
    }
}

#[derive(Debug)]
pub struct CatalogSnapshot {
    pub version: u64,
    pub settings: GatewaySettings,
    /// Usable providers in declaration order.
    pub providers: IndexMap<String, Arc<CompiledProvider>>,
    /// Providers left out of this snapshot and why.
    pub excluded: Vec<ProviderFailure>,
    pub document: Arc<ProvidersDocument>,
}

impl CatalogSnapshot {
    /// Compiles every enabled provider. A provider that fails to compile is
    /// excluded on its own; the rest of the catalogue stays usable.
    pub fn compile(document: ProvidersDocument, version: u64) -> Self {
        let mut providers = IndexMap::new();
        let mut excluded = Vec::new();
        for (declaration_index, config) in document.providers.iter().enumerate() {
            if config.disabled {
                debug!(provider = %config.name, "provider disabled");
                continue;
            }
            match compile_provider(config, declaration_index) {
                Ok(compiled) => {
                    providers.insert(config.name.clone(), Arc::new(compiled));
                }
                Err(error) => {
                    warn!(provider = %config.name, %error, "excluding provider from catalogue");
                    excluded.push(ProviderFailure {
                        provider: config.name.clone(),
                        error,
                    });
                }
            }
        }
        info!(version, providers = providers.len(), excluded = excluded.len(), "compiled provider catalogue");
        Self {
            version,
            settings: document.settings.clone(),
            providers,
            excluded,
            document: Arc::new(document),
        }
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<CompiledProvider>> {
        self.providers.get(name)
    }
}

fn configuration(provider: &str, message: impl Into<String>) -> GatewayError {
    GatewayError::Configuration {
        provider: Some(provider.to_string()),
        message: message.into(),
    }
}

fn compile_provider(config: &ProviderConfig, declaration_index: usize) -> Result<CompiledProvider, GatewayError> {
    let name = config.name.as_str();
    validate_provider(config).map_err(|error| configuration(name, error.to_string()))?;

    let search = &config.search;
    let plugin = SearchPlugin::from(search.search_type);
    let endpoint = Template::parse(&search.api_endpoint).map_err(|error| GatewayError::mapping(name, "api_endpoint", error))?;
    let results_entry =
        JsonPath::parse(&search.results_entry).map_err(|error| GatewayError::mapping(name, "results_entry", error))?;
    let pagination = compile_pagination(config)?;
    let discovery = search
        .discover_metadata
        .as_ref()
        .map(|settings| {
            Ok::<_, GatewayError>(MetadataDiscovery {
                path: JsonPath::parse(&settings.metadata_path)
                    .map_err(|error| GatewayError::mapping(name, "discover_metadata", error))?,
                pattern: Regex::new(&settings.metadata_pattern)
                    .map_err(|error| GatewayError::mapping(name, "discover_metadata", error))?,
            })
        })
        .transpose()?;
    let constraints_url = config
        .constraints_url
        .as_deref()
        .map(Template::parse)
        .transpose()
        .map_err(|error| GatewayError::mapping(name, "constraints_url", error))?;

    let base_fields = FieldMapping::compile(name, &search.metadata_mapping)?;

    let mut products = IndexMap::new();
    let mut aliases = HashMap::new();
    for product_type in config.products.keys() {
        let resolved = resolve_product(name, &config.products, product_type, &mut Vec::new())?;
        let mut fields = base_fields.clone();
        fields.overlay(&FieldMapping::compile(name, &resolved.metadata_mapping)?);

        for alias in &config.products[product_type].aliases {
            if config.products.contains_key(alias) {
                warn!(provider = %name, %alias, "alias shadows a product type and is ignored");
                continue;
            }
            aliases.insert(alias.clone(), product_type.clone());
        }

        let mapping = ProviderMapping {
            provider: name.to_string(),
            product_type: product_type.clone(),
            plugin,
            endpoint: endpoint.clone(),
            fields,
            native_params: resolved.params,
            literal_params: search.literal_search_params.clone(),
            results_entry: results_entry.clone(),
            pagination: pagination.clone(),
            discovery: discovery.clone(),
            auth: config.auth.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_attempts,
        };
        products.insert(
            product_type.clone(),
            ProductTypeEntry {
                name: product_type.clone(),
                mapping: Arc::new(mapping),
                queryables: resolved.queryables,
            },
        );
    }

    debug!(provider = %name, product_types = products.len(), "compiled provider");
    Ok(CompiledProvider {
        name: name.to_string(),
        description: config.description.clone(),
        priority: config.priority,
        declaration_index,
        plugin,
        products,
        aliases,
        queryables: config.queryables.clone(),
        constraints_url,
    })
}

fn compile_pagination(config: &ProviderConfig) -> Result<CompiledPagination, GatewayError> {
    let name = config.name.as_str();
    let settings = &config.search.pagination;
    let path = |raw: &Option<String>, field: &str| {
        raw.as_deref()
            .map(JsonPath::parse)
            .transpose()
            .map_err(|error| GatewayError::mapping(name, field, error))
    };
    let template = |raw: &Option<String>, field: &str| {
        raw.as_deref()
            .map(Template::parse)
            .transpose()
            .map_err(|error| GatewayError::mapping(name, field, error))
    };
    Ok(CompiledPagination {
        items_per_page: settings.items_per_page,
        max_items_per_page: settings.max_items_per_page,
        total_items_path: path(&settings.total_items_nb_key_path, "total_items_nb_key_path")?,
        strategy: settings.next_page_strategy,
        next_page_params: template(&settings.next_page_params, "next_page_params")?,
        next_page_path: path(&settings.next_page_key_path, "next_page_key_path")?,
        cursor_param: settings.cursor_param.clone(),
        count_endpoint: template(&settings.count_endpoint, "count_endpoint")?,
        start_page: settings.start_page,
    })
}

/// Flattens the `from:` chain of a product type, parents first.
fn resolve_product(
    provider: &str,
    products: &IndexMap<String, ProductTypeConfig>,
    product_type: &str,
    chain: &mut Vec<String>,
) -> Result<ProductTypeConfig, GatewayError> {
    if chain.iter().any(|seen| seen == product_type) {
        chain.push(product_type.to_string());
        return Err(configuration(
            provider,
            format!("product type inheritance cycle: {}", chain.join(" -> ")),
        ));
    }
    let config = products.get(product_type).ok_or_else(|| {
        configuration(
            provider,
            format!(
                "product type '{}' inherits from unknown product type '{product_type}'",
                chain.last().map(String::as_str).unwrap_or_default()
            ),
        )
    })?;
    let Some(parent) = &config.from else {
        return Ok(config.clone());
    };

    chain.push(product_type.to_string());
    let mut merged = resolve_product(provider, products, parent, chain)?;
    chain.pop();

    for (field, entry) in &config.metadata_mapping {
        merged.metadata_mapping.insert(field.clone(), entry.clone());
    }
    for (field, queryable) in &config.queryables {
        merged.queryables.insert(field.clone(), queryable.clone());
    }
    for (param, value) in &config.params {
        merged.params.insert(param.clone(), value.clone());
    }
    merged.aliases = config.aliases.clone();
    merged.from = None;
    Ok(merged)
}

/// Holder of the current snapshot.
#[derive(Debug)]
pub struct SnapshotStore {
    current: RwLock<Arc<CatalogSnapshot>>,
    next_version: AtomicU64,
}

impl SnapshotStore {
    pub fn new(document: ProvidersDocument) -> Self {
        Self {
            current: RwLock::new(Arc::new(CatalogSnapshot::compile(document, 1))),
            next_version: AtomicU64::new(2),
        }
    }

    pub fn current(&self) -> Arc<CatalogSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Compiles and publishes `document`; in-flight searches keep their
    /// snapshot.
    pub fn publish(&self, document: ProvidersDocument) -> Arc<CatalogSnapshot> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let snapshot = Arc::new(CatalogSnapshot::compile(document, version));
        *guard = snapshot.clone();
        snapshot
    }

    /// Applies `change` to a copy of the current document and publishes the
    /// result. Writers are serialized by the write lock.
    pub fn update<F>(&self, change: F) -> Result<Arc<CatalogSnapshot>, GatewayError>
    where
        F: FnOnce(&mut ProvidersDocument) -> Result<(), GatewayError>,
    {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut document = (*guard.document).clone();
        change(&mut document)?;
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let snapshot = Arc::new(CatalogSnapshot::compile(document, version));
        *guard = snapshot.clone();
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn document(yaml: &str) -> ProvidersDocument {
        serde_yaml::from_str(yaml).unwrap()
    }

    const CATALOGUE: &str = r#"
providers:
  - name: peps
    priority: 1
    search:
      api_endpoint: https://peps.example/collections/{collection}/search
      metadata_mapping:
        id: $.id
        productType: [productType, $.properties.productType]
        cloudCover: ["cloudCover=[0,{cloudCover}]", $.properties.cloudCover]
    products:
      S2_MSI_L1C:
        collection: S2
        aliases: [S2_L1C]
      S2_MSI_L2A:
        from: S2_MSI_L1C
        collection: S2ST
        metadata_mapping:
          cloudCover: ["cc={cloudCover}", $.properties.cc]
  - name: broken
    search:
      api_endpoint: https://broken.example/search
      metadata_mapping:
        cloudCover: ["cloud={cloudCover#no_such_converter}"]
    products:
      S2_MSI_L1C: {}
"#;

    #[test]
    fn bad_mapping_excludes_only_that_provider() {
        let snapshot = CatalogSnapshot::compile(document(CATALOGUE), 1);
        assert!(snapshot.provider("peps").is_some());
        assert!(snapshot.provider("broken").is_none());
        assert_eq!(snapshot.excluded.len(), 1);
        assert_eq!(snapshot.excluded[0].error.kind(), ErrorKind::MappingSyntax);
    }

    #[test]
    fn inheritance_and_aliases() {
        let snapshot = CatalogSnapshot::compile(document(CATALOGUE), 1);
        let peps = snapshot.provider("peps").unwrap();
        assert_eq!(peps.product("S2_L1C").unwrap().name, "S2_MSI_L1C");

        let l2a = peps.product("S2_MSI_L2A").unwrap();
        assert_eq!(l2a.mapping.native_params["collection"], Value::String("S2ST".into()));
        assert!(l2a.mapping.fields.contains("productType"));
        let cloud = l2a.mapping.fields.get("cloudCover").unwrap();
        assert_eq!(cloud.build.as_ref().unwrap().value.source(), "{cloudCover}");
        assert!(!peps.offers("S1_SAR_GRD"));
    }

    #[test]
    fn inheritance_cycle_is_a_configuration_error() {
        let snapshot = CatalogSnapshot::compile(
            document(
                r#"
providers:
  - name: loop
    search: {api_endpoint: "https://loop.example/search"}
    products:
      A: {from: B}
      B: {from: A}
"#,
            ),
            1,
        );
        assert!(snapshot.providers.is_empty());
        let error = &snapshot.excluded[0].error;
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(error.to_string().contains("cycle"));
    }

    #[test]
    fn publishing_bumps_the_version() {
        let store = SnapshotStore::new(document(CATALOGUE));
        let first = store.current();
        assert_eq!(first.version, 1);
        let second = store
            .update(|document| {
                document.providers[0].priority = 5;
                Ok(())
            })
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(store.current().provider("peps").unwrap().priority, 5);
        assert_eq!(first.provider("peps").unwrap().priority, 1);
    }
}
