//! Queryables negotiator.
//!
//! Precedence, lowest first: fields implied by queryable mapping rules,
//! provider-wide declarations, product-type declarations, then external
//! constraints which may only narrow `allowed_values`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use eogate_types::{HttpMethod, ProviderQuery, Queryable, QueryableType, fields};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{CompiledProvider, ProductTypeEntry};
use crate::extract::response_tree;
use crate::transport::{AuthProvider, Transport};

/// Allowed values per canonical field, as published by a provider.
pub type Constraints = IndexMap<String, Vec<Value>>;

/// Queryables known without any network call.
pub fn local_queryables(provider: &CompiledProvider, entry: &ProductTypeEntry) -> IndexMap<String, Queryable> {
    let mut merged = IndexMap::new();

    let mut product_type = Queryable::new(fields::PRODUCT_TYPE, QueryableType::String).required(true);
    product_type.default = Some(Value::String(entry.name.clone()));
    merged.insert(fields::PRODUCT_TYPE.to_string(), product_type);

    for rule in entry.mapping.fields.queryable_rules() {
        merged
            .entry(rule.field.clone())
            .or_insert_with(|| Queryable::new(rule.field.as_str(), implied_type(&rule.field)));
    }
    for declarations in [&provider.queryables, &entry.queryables] {
        for (name, declared) in declarations {
            let mut queryable = declared.clone();
            if queryable.name.is_empty() {
                queryable.name = name.clone();
            }
            merged.insert(name.clone(), queryable);
        }
    }
    merged
}

fn implied_type(field: &str) -> QueryableType {
    match field {
        fields::GEOMETRY => QueryableType::Geometry,
        fields::START | fields::END => QueryableType::Datetime,
        _ => QueryableType::String,
    }
}

/// Narrows `queryables` with `constraints`. Unknown fields are ignored and
/// nothing but `allowed_values` changes.
pub fn apply_constraints(queryables: &mut IndexMap<String, Queryable>, constraints: &Constraints) {
    for (name, allowed) in constraints {
        if let Some(queryable) = queryables.get_mut(name) {
            queryable.narrow_allowed_values(allowed);
        }
    }
}

/// Merges per-provider queryables given in priority order; the first
/// provider declaring a field wins and is recorded as its source.
pub fn merge_across_providers(
    per_provider: impl IntoIterator<Item = (String, IndexMap<String, Queryable>)>,
) -> IndexMap<String, Queryable> {
    let mut merged = IndexMap::new();
    for (provider, queryables) in per_provider {
        for (name, mut queryable) in queryables {
            if merged.contains_key(&name) {
                continue;
            }
            queryable.source_provider = Some(provider.clone());
            merged.insert(name, queryable);
        }
    }
    merged
}

/// Accepts `{"field": [values]}` or `[{"field": value, ...}, ...]`.
pub fn parse_constraints(tree: &Value) -> Option<Constraints> {
    let mut constraints = Constraints::new();
    match tree {
        Value::Object(map) => {
            for (field, values) in map {
                let values = match values {
                    Value::Array(values) => values.clone(),
                    other => vec![other.clone()],
                };
                constraints.insert(field.clone(), values);
            }
        }
        Value::Array(rows) => {
            for row in rows {
                let Value::Object(row) = row else { return None };
                for (field, value) in row {
                    let values = constraints.entry(field.clone()).or_default();
                    let candidates = match value {
                        Value::Array(items) => items.clone(),
                        other => vec![other.clone()],
                    };
                    for candidate in candidates {
                        if !values.contains(&candidate) {
                            values.push(candidate);
                        }
                    }
                }
            }
        }
        _ => return None,
    }
    Some(constraints)
}

#[derive(Debug)]
struct CacheEntry {
    fetched_at: Instant,
    constraints: Arc<Constraints>,
}

type CacheKey = (String, String);

/// Time-bounded constraints cache, single-flight per (provider, product type).
#[derive(Debug)]
pub struct ConstraintCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, Arc<OnceCell<CacheEntry>>>>,
    fetches: AtomicUsize,
}

impl ConstraintCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Number of fetches started, successful or not.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn is_stale(&self, cell: &OnceCell<CacheEntry>) -> bool {
        cell.get().is_some_and(|entry| entry.fetched_at.elapsed() >= self.ttl)
    }

    /// Cached constraints for `key`, fetching them when missing or expired.
    /// Failed fetches are not cached.
    pub async fn get_or_fetch<F, Fut>(&self, provider: &str, product_type: &str, fetch: F) -> Option<Arc<Constraints>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Constraints, String>>,
    {
        let key = (provider.to_string(), product_type.to_string());
        let fresh = {
            let entries = self.entries.read().await;
            entries.get(&key).filter(|cell| !self.is_stale(cell)).cloned()
        };
        let cell = match fresh {
            Some(cell) => cell,
            None => {
                let mut entries = self.entries.write().await;
                let cell = entries.entry(key).or_default();
                if self.is_stale(cell) {
                    *cell = Arc::new(OnceCell::new());
                }
                Arc::clone(cell)
            }
        };

        let entry = cell
            .get_or_try_init(|| async {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                let constraints = fetch().await?;
                Ok::<_, String>(CacheEntry {
                    fetched_at: Instant::now(),
                    constraints: Arc::new(constraints),
                })
            })
            .await;
        match entry {
            Ok(entry) => Some(Arc::clone(&entry.constraints)),
            Err(reason) => {
                warn!(provider, product_type, %reason, "constraints unavailable, not narrowing queryables");
                None
            }
        }
    }
}

/// Computes queryables for one provider and product type.
pub struct QueryablesNegotiator {
    cache: ConstraintCache,
}

impl QueryablesNegotiator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: ConstraintCache::new(ttl),
        }
    }

    pub fn cache(&self) -> &ConstraintCache {
        &self.cache
    }

    pub async fn negotiate(
        &self,
        transport: &dyn Transport,
        auth: &dyn AuthProvider,
        provider: &CompiledProvider,
        entry: &ProductTypeEntry,
    ) -> IndexMap<String, Queryable> {
        let mut queryables = local_queryables(provider, entry);
        if provider.constraints_url.is_some() {
            let constraints = self
                .cache
                .get_or_fetch(&provider.name, &entry.name, || {
                    fetch_constraints(transport, auth, provider, entry)
                })
                .await;
            if let Some(constraints) = constraints {
                apply_constraints(&mut queryables, &constraints);
            }
        }
        debug!(provider = %provider.name, product_type = %entry.name, count = queryables.len(), "negotiated queryables");
        queryables
    }
}

async fn fetch_constraints(
    transport: &dyn Transport,
    auth: &dyn AuthProvider,
    provider: &CompiledProvider,
    entry: &ProductTypeEntry,
) -> Result<Constraints, String> {
    let Some(template) = &provider.constraints_url else {
        return Err("no constraints URL".to_string());
    };
    let mapping = &entry.mapping;
    let lookup = |name: &str| {
        if name == fields::PRODUCT_TYPE {
            return mapping
                .native_params
                .get(name)
                .cloned()
                .or_else(|| Some(Value::String(entry.name.clone())));
        }
        mapping.native_params.get(name).cloned()
    };
    let url = template
        .render(&lookup)
        .map_err(|error| error.to_string())?
        .ok_or_else(|| format!("constraints URL '{}' has unresolved parameters", template.source()))?;

    let mut query = ProviderQuery::new(provider.name.as_str(), HttpMethod::Get, url);
    auth.decorate(&mapping.auth, &mut query).map_err(|error| error.to_string())?;
    let raw = tokio::time::timeout(mapping.timeout, transport.send(&query))
        .await
        .map_err(|_| "constraints request timed out".to_string())?
        .map_err(|error| error.to_string())?;
    let tree = response_tree(&raw, &provider.name).map_err(|error| error.to_string())?;
    parse_constraints(&tree).ok_or_else(|| "constraints document has an unexpected shape".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::{CatalogSnapshot, ProvidersDocument};

    const CATALOGUE: &str = r#"
providers:
  - name: peps
    priority: 1
    search:
      api_endpoint: https://peps.example/search
      metadata_mapping:
        cloudCover: ["cloudCover=[0,{cloudCover}]", $.properties.cloudCover]
        platform: ["platform={platform}", $.properties.platform]
    queryables:
      cloudCover: {type: integer, default: 20}
    products:
      S2_MSI_L1C:
        queryables:
          cloudCover: {type: integer, required: true}
"#;

    fn snapshot() -> CatalogSnapshot {
        let document: ProvidersDocument = serde_yaml::from_str(CATALOGUE).unwrap();
        CatalogSnapshot::compile(document, 1)
    }

    #[test]
    fn product_declaration_replaces_provider_declaration() {
        let snapshot = snapshot();
        let peps = snapshot.provider("peps").unwrap();
        let queryables = local_queryables(peps, peps.product("S2_MSI_L1C").unwrap());

        assert!(queryables["productType"].required);
        let cloud = &queryables["cloudCover"];
        assert_eq!(cloud.name, "cloudCover");
        assert_eq!(cloud.value_type, QueryableType::Integer);
        assert!(cloud.required);
        assert_eq!(cloud.default, None);
        assert_eq!(queryables["platform"].value_type, QueryableType::String);
        assert!(!queryables["platform"].required);
    }

    #[test]
    fn constraints_only_narrow() {
        let snapshot = snapshot();
        let peps = snapshot.provider("peps").unwrap();
        let mut queryables = local_queryables(peps, peps.product("S2_MSI_L1C").unwrap());
        let constraints = parse_constraints(&json!([
            {"platform": "S2A", "orbitDirection": "ascending"},
            {"platform": "S2B"},
            {"platform": "S2A"}
        ]))
        .unwrap();
        apply_constraints(&mut queryables, &constraints);
        assert_eq!(queryables["platform"].allowed_values, Some(vec![json!("S2A"), json!("S2B")]));
        assert!(!queryables.contains_key("orbitDirection"));
        assert!(queryables["cloudCover"].required);
    }

    #[test]
    fn higher_priority_provider_wins_the_merge() {
        let mut first = IndexMap::new();
        first.insert("cloudCover".to_string(), Queryable::new("cloudCover", QueryableType::Integer));
        let mut second = IndexMap::new();
        second.insert("cloudCover".to_string(), Queryable::new("cloudCover", QueryableType::Number));
        second.insert("platform".to_string(), Queryable::new("platform", QueryableType::String));

        let merged = merge_across_providers([("a".to_string(), first), ("b".to_string(), second)]);
        assert_eq!(merged["cloudCover"].value_type, QueryableType::Integer);
        assert_eq!(merged["cloudCover"].source_provider.as_deref(), Some("a"));
        assert_eq!(merged["platform"].source_provider.as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_is_single_flight_and_expires() {
        let cache = Arc::new(ConstraintCache::new(Duration::from_secs(60)));
        let fetch = || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(Constraints::from([("platform".to_string(), vec![json!("S2A")])]))
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("peps", "S2", fetch),
            cache.get_or_fetch("peps", "S2", fetch)
        );
        assert!(a.is_some() && b.is_some());
        assert_eq!(cache.fetch_count(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.get_or_fetch("peps", "S2", fetch).await;
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let cache = ConstraintCache::new(Duration::from_secs(60));
        let failed = cache
            .get_or_fetch("peps", "S2", || async { Err("boom".to_string()) })
            .await;
        assert!(failed.is_none());
        let fetched = cache
            .get_or_fetch("peps", "S2", || async { Ok(Constraints::new()) })
            .await;
        assert!(fetched.is_some());
        assert_eq!(cache.fetch_count(), 2);
    }
}
