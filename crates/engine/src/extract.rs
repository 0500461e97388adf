//! Response extractor: turns a raw provider page into canonical products.

use std::borrow::Cow;
use std::collections::HashSet;

use eogate_types::{Geometry, Product, Provenance, RawProviderResponse, fields};
use eogate_util::{parse_datetime_utc, parse_response_json_strict};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProviderMapping;
use crate::error::GatewayError;
use crate::mapping::ExtractSpec;
use crate::mapping::converters::apply_chain;
use crate::mapping::path::JsonPath;
use crate::mapping::template::format_json_value;

/// A field that could not be converted and was left out of its product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedField {
    pub index: usize,
    pub field: String,
    pub reason: String,
}

/// Outcome of extracting one page.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Empty,
    Complete(Vec<Product>),
    /// Every item produced a product, but some fields were dropped.
    PartialFailure {
        products: Vec<Product>,
        dropped: Vec<DroppedField>,
    },
}

impl Extraction {
    pub fn products(&self) -> &[Product] {
        match self {
            Extraction::Empty => &[],
            Extraction::Complete(products) | Extraction::PartialFailure { products, .. } => products,
        }
    }

    pub fn into_products(self) -> Vec<Product> {
        match self {
            Extraction::Empty => Vec::new(),
            Extraction::Complete(products) | Extraction::PartialFailure { products, .. } => products,
        }
    }

    pub fn dropped(&self) -> &[DroppedField] {
        match self {
            Extraction::PartialFailure { dropped, .. } => dropped,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.products().len()
    }

    pub fn is_empty(&self) -> bool {
        self.products().is_empty()
    }
}

/// Where the page being extracted came from.
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    /// Canonical product type requested by the caller.
    pub product_type: &'a str,
    pub page: u32,
}

/// The parsed body of a response, or an `Extraction` error when it is not JSON.
pub fn response_tree<'a>(raw: &'a RawProviderResponse, provider: &str) -> Result<Cow<'a, Value>, GatewayError> {
    match &raw.tree {
        Some(tree) => Ok(Cow::Borrowed(tree)),
        None => parse_response_json_strict(&raw.bytes, Some(raw.status))
            .map(Cow::Owned)
            .map_err(|error| GatewayError::extraction(provider, format!("{error}; body: {}", error.body_preview()))),
    }
}

pub fn extract(
    raw: &RawProviderResponse,
    mapping: &ProviderMapping,
    context: ExtractContext<'_>,
) -> Result<Extraction, GatewayError> {
    let provider = mapping.provider.as_str();
    let tree = response_tree(raw, provider)?;

    let items = match mapping.results_entry.find(&tree).into_iter().next() {
        None | Some(Value::Null) => return Ok(Extraction::Empty),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(GatewayError::extraction(
                provider,
                format!(
                    "results entry '{}' is {} instead of a list",
                    mapping.results_entry,
                    json_type_name(other)
                ),
            ));
        }
    };
    if items.is_empty() {
        debug!(provider = %provider, page = context.page, "provider returned no items");
        return Ok(Extraction::Empty);
    }

    let mut products = Vec::with_capacity(items.len());
    let mut dropped = Vec::new();
    for (index, item) in items.iter().enumerate() {
        products.push(extract_item(item, index, mapping, context, &mut dropped));
    }
    debug!(
        provider = %provider,
        page = context.page,
        item_count = products.len(),
        dropped = dropped.len(),
        "extracted page"
    );

    if dropped.is_empty() {
        Ok(Extraction::Complete(products))
    } else {
        Ok(Extraction::PartialFailure { products, dropped })
    }
}

fn extract_item(
    item: &Value,
    index: usize,
    mapping: &ProviderMapping,
    context: ExtractContext<'_>,
    dropped: &mut Vec<DroppedField>,
) -> Product {
    let provider = mapping.provider.as_str();
    let mut drop_field = |field: &str, reason: String| {
        warn!(provider = %provider, page = context.page, index, field, %reason, "dropping field");
        dropped.push(DroppedField {
            index,
            field: field.to_string(),
            reason,
        });
    };

    let mut properties: IndexMap<String, Value> = IndexMap::new();
    let mut templates = Vec::new();
    // Nodes already read by a path; discovery skips them.
    let mut used: HashSet<*const Value> = HashSet::new();
    for rule in mapping.fields.iter() {
        match &rule.extract {
            None => {}
            Some(ExtractSpec::Template(template)) => templates.push((rule.field.as_str(), template)),
            Some(ExtractSpec::Constant(value)) => {
                properties.insert(rule.field.clone(), value.clone());
            }
            Some(ExtractSpec::Path { path, converters }) => match path.find_unique(item) {
                None | Some(Value::Null) => {}
                Some(matched) => {
                    used.insert(std::ptr::from_ref(matched));
                    match apply_chain(converters, matched.clone()) {
                        Ok(Value::Null) => {}
                        Ok(value) => {
                            properties.insert(rule.field.clone(), value);
                        }
                        Err(error) => drop_field(&rule.field, error.to_string()),
                    }
                }
            },
        }
    }

    for (field, template) in templates {
        let rendered = template.render_value(&|name| properties.get(name).cloned());
        match rendered {
            Ok(Some(value)) => {
                properties.insert(field.to_string(), value);
            }
            Ok(None) => {}
            Err(error) => drop_field(field, error.to_string()),
        }
    }

    if let Some(discovery) = &mapping.discovery {
        for (key, value) in discovery.path.find_with_keys(item) {
            if let Some(key) = key
                && !used.contains(&std::ptr::from_ref(value))
                && discovery.pattern.is_match(key)
                && !properties.contains_key(key)
                && !mapping.fields.contains(key)
            {
                properties.insert(key.to_string(), value.clone());
            }
        }
    }

    let id = properties
        .shift_remove(fields::ID)
        .map(|value| format_json_value(&value))
        .filter(|id| !id.is_empty());
    let geometry = properties
        .shift_remove(fields::GEOMETRY)
        .and_then(|value| match Geometry::from_value(&value) {
            Ok(geometry) => Some(geometry),
            Err(error) => {
                drop_field(fields::GEOMETRY, error.to_string());
                None
            }
        });
    let mut lift_date = |field: &str| {
        let value = properties.shift_remove(field)?;
        let parsed = value.as_str().and_then(parse_datetime_utc);
        if parsed.is_none() {
            drop_field(field, format!("{value} is not a datetime"));
        }
        parsed
    };
    let start = lift_date(fields::START);
    let end = lift_date(fields::END);
    // The canonical name goes in the product slot.
    properties.shift_remove(fields::PRODUCT_TYPE);

    Product {
        id,
        provider: provider.to_string(),
        product_type: context.product_type.to_string(),
        geometry,
        start,
        end,
        properties,
        provenance: Provenance {
            provider: provider.to_string(),
            page: context.page,
            index,
        },
    }
}

/// Reads a total count: a number, or a string holding one.
pub fn read_total(tree: &Value, path: &JsonPath) -> Option<u64> {
    match path.find_unique(tree)? {
        Value::Number(number) => number.as_u64().or_else(|| number.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a non-empty string, such as a cursor token or next-page URL.
pub fn read_text(tree: &Value, path: &JsonPath) -> Option<String> {
    match path.find_unique(tree)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
