use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::fields;
use crate::geometry::{Geometry, GeometryError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("expected a GeoJSON Feature object")]
    NotAFeature,
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Where a product came from: provider, page number and position in page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub provider: String,
    pub page: u32,
    pub index: usize,
}

/// A search result normalized into the canonical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Option<String>,
    pub provider: String,
    /// The canonical product type that was searched for.
    pub product_type: String,
    pub geometry: Option<Geometry>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
    pub provenance: Provenance,
}

impl Product {
    /// GeoJSON `Feature` with the lifted fields folded back into properties.
    pub fn to_feature(&self) -> Value {
        let mut properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        properties.insert("provider".into(), Value::String(self.provider.clone()));
        properties.insert("productType".into(), Value::String(self.product_type.clone()));
        if let Some(start) = &self.start {
            properties.insert(
                "startTimeFromAscendingNode".into(),
                Value::String(start.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        if let Some(end) = &self.end {
            properties.insert(
                "completionTimeFromAscendingNode".into(),
                Value::String(end.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        json!({
            "type": "Feature",
            "id": self.id,
            "geometry": self.geometry.as_ref().map(Geometry::to_geojson_value),
            "properties": properties,
            "provenance": self.provenance,
        })
    }

    /// Reads back a feature written by [`Product::to_feature`]. Features
    /// from elsewhere are accepted too; a missing provenance points at
    /// page 0 and `index`.
    pub fn from_feature(feature: &Value, index: usize) -> Result<Self, FeatureError> {
        let object = feature.as_object().ok_or(FeatureError::NotAFeature)?;
        if object.get("type").and_then(Value::as_str) != Some("Feature") {
            return Err(FeatureError::NotAFeature);
        }
        let mut properties: IndexMap<String, Value> = match object.get("properties") {
            Some(Value::Object(map)) => map.iter().map(|(key, value)| (key.clone(), value.clone())).collect(),
            _ => IndexMap::new(),
        };
        let geometry = match object.get("geometry") {
            None | Some(Value::Null) => None,
            Some(value) => Some(Geometry::from_geojson_value(value)?),
        };
        let take_text = |properties: &mut IndexMap<String, Value>, key: &str| match properties.shift_remove(key) {
            Some(Value::String(text)) => Some(text),
            Some(other) => {
                properties.insert(key.to_string(), other);
                None
            }
            None => None,
        };
        let mut take_date = |key: &str| {
            let text = take_text(&mut properties, key)?;
            match DateTime::parse_from_rfc3339(&text) {
                Ok(parsed) => Some(parsed.with_timezone(&Utc)),
                Err(_) => {
                    properties.insert(key.to_string(), Value::String(text));
                    None
                }
            }
        };
        let start = take_date(fields::START);
        let end = take_date(fields::END);
        let provider = take_text(&mut properties, "provider").unwrap_or_default();
        let product_type = take_text(&mut properties, fields::PRODUCT_TYPE).unwrap_or_default();
        let id = match object.get("id") {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };
        let provenance = object
            .get("provenance")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_else(|| Provenance {
                provider: provider.clone(),
                page: 0,
                index,
            });

        Ok(Self {
            id,
            provider,
            product_type,
            geometry,
            start,
            end,
            properties,
            provenance,
        })
    }
}
