//! GeoJSON form of [`SearchResults`] and post-search filtering.
//!
//! Results are written as a `FeatureCollection` carrying the total, the
//! next-page cursor and a short context summary as foreign members, and
//! can be read back from that form.

use std::path::Path;

use anyhow::Context;
use eogate_types::{FeatureError, PageCursor, Product};
use serde_json::{Value, json};
use thiserror::Error;

use crate::crunch::Crunch;
use crate::gateway::{SearchContext, SearchResults};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResultsError {
    #[error("expected a GeoJSON FeatureCollection")]
    NotAFeatureCollection,
    #[error("feature {index}: {source}")]
    Feature {
        index: usize,
        #[source]
        source: FeatureError,
    },
    #[error("invalid next_cursor: {0}")]
    Cursor(String),
}

impl SearchResults {
    /// Keeps the products passing `crunch`; totals and cursors are left as
    /// the provider reported them.
    pub fn crunch(mut self, crunch: &Crunch) -> Self {
        self.products = crunch.apply(self.products);
        self.context.item_count = self.products.len();
        self
    }

    pub fn crunch_all<'a>(self, crunches: impl IntoIterator<Item = &'a Crunch>) -> Self {
        crunches.into_iter().fold(self, |results, crunch| results.crunch(crunch))
    }

    pub fn to_geojson(&self) -> Value {
        let context = &self.context;
        json!({
            "type": "FeatureCollection",
            "features": self.products.iter().map(Product::to_feature).collect::<Vec<_>>(),
            "total_count": self.total_count,
            "next_cursor": self.next_cursor,
            "provider": context.provider(),
            "errors": context
                .errors
                .iter()
                .map(|failure| json!({"provider": failure.provider, "error": failure.error.to_string()}))
                .collect::<Vec<_>>(),
        })
    }

    /// Reads a collection written by [`SearchResults::to_geojson`]. Provider
    /// errors are not restored.
    pub fn from_geojson(value: &Value) -> Result<Self, ResultsError> {
        if value.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
            return Err(ResultsError::NotAFeatureCollection);
        }
        let features = value
            .get("features")
            .and_then(Value::as_array)
            .ok_or(ResultsError::NotAFeatureCollection)?;
        let products = features
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                Product::from_feature(feature, index).map_err(|source| ResultsError::Feature { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let next_cursor: Option<PageCursor> = match value.get("next_cursor") {
            None | Some(Value::Null) => None,
            Some(cursor) => {
                Some(serde_json::from_value(cursor.clone()).map_err(|error| ResultsError::Cursor(error.to_string()))?)
            }
        };
        let provider = value
            .get("provider")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| products.first().map(|product| product.provider.clone()));

        let context = SearchContext {
            candidates: provider.into_iter().collect(),
            item_count: products.len(),
            terminal: next_cursor.is_none(),
            ..SearchContext::default()
        };
        Ok(Self {
            products,
            total_count: value.get("total_count").and_then(Value::as_u64),
            next_cursor,
            context,
        })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let value: Value =
            serde_json::from_str(&content).with_context(|| format!("{} is not valid JSON", path.display()))?;
        Self::from_geojson(&value).with_context(|| format!("failed to load search results from {}", path.display()))
    }
}
