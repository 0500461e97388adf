use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryableType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Datetime,
    Geometry,
    Array,
}

/// A search parameter a provider accepts for a product type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Queryable {
    /// Canonical field name; filled from the map key when declared in YAML.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: QueryableType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_provider: Option<String>,
}

impl Queryable {
    pub fn new(name: impl Into<String>, value_type: QueryableType) -> Self {
        Self {
            name: name.into(),
            value_type,
            ..Self::default()
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Intersects the allowed values with `constraint`. An unconstrained
    /// queryable takes `constraint` as its allowed set.
    pub fn narrow_allowed_values(&mut self, constraint: &[Value]) {
        let narrowed = match self.allowed_values.take() {
            Some(current) => current.into_iter().filter(|value| constraint.contains(value)).collect(),
            None => constraint.to_vec(),
        };
        self.allowed_values = Some(narrowed);
    }
}
