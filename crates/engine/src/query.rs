//! Query builder: renders a provider-specific request from a canonical
//! search request.

use eogate_types::{ProviderQuery, Queryable, SearchRequest};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::config::ProviderMapping;
use crate::error::GatewayError;

/// Canonical parameters for one provider query.
///
/// Request fields come first, queryable defaults fill the gaps, and
/// product-type native parameters override both.
pub fn query_parameters(
    request: &SearchRequest,
    mapping: &ProviderMapping,
    queryables: &IndexMap<String, Queryable>,
) -> IndexMap<String, Value> {
    let mut params = request.parameters();
    for queryable in queryables.values() {
        if let Some(default) = &queryable.default
            && !params.contains_key(&queryable.name)
        {
            params.insert(queryable.name.clone(), default.clone());
        }
    }
    for (name, value) in &mapping.native_params {
        params.insert(name.clone(), value.clone());
    }
    params
}

/// Builds the first-page query. Pagination parameters are added later by
/// the pagination controller.
///
/// Fails with `IncompleteQuery` before anything is sent when a required
/// queryable has neither a value nor a default.
pub fn build_query(
    request: &SearchRequest,
    mapping: &ProviderMapping,
    queryables: &IndexMap<String, Queryable>,
) -> Result<ProviderQuery, GatewayError> {
    let provider = mapping.provider.as_str();
    let params = query_parameters(request, mapping, queryables);

    let missing: Vec<String> = queryables
        .values()
        .filter(|queryable| queryable.required && !params.contains_key(&queryable.name))
        .map(|queryable| queryable.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(GatewayError::IncompleteQuery {
            provider: provider.to_string(),
            missing,
        });
    }

    let lookup = |name: &str| params.get(name).cloned();
    let url = mapping
        .endpoint
        .render(&lookup)
        .map_err(|error| GatewayError::InvalidParameter {
            provider: provider.to_string(),
            field: "api_endpoint".to_string(),
            reason: error.to_string(),
        })?
        .ok_or_else(|| GatewayError::IncompleteQuery {
            provider: provider.to_string(),
            missing: mapping
                .endpoint
                .fields()
                .filter(|field| !params.contains_key(*field))
                .map(str::to_string)
                .collect(),
        })?;

    let mut query = ProviderQuery::new(provider, mapping.plugin.method(), url);
    for rule in mapping.fields.queryable_rules() {
        if !params.contains_key(&rule.field) {
            continue;
        }
        let Some(build) = &rule.build else { continue };
        if let Some(fragment) = build.render(provider, &rule.field, &lookup)? {
            mapping.plugin.apply_fragment(&mut query, fragment);
        }
    }

    for (name, value) in &mapping.literal_params {
        mapping.plugin.apply_literal(&mut query, name, value);
    }

    for name in request.filters.keys() {
        let mapped = mapping.fields.get(name).is_some_and(|rule| rule.queryable);
        if !mapped {
            debug!(provider = %provider, filter = %name, "ignoring filter without a queryable mapping");
        }
    }

    debug!(
        provider = %provider,
        product_type = %mapping.product_type,
        params = query.query_params.len(),
        has_body = query.body.is_some(),
        "built provider query"
    );
    Ok(query)
}
