use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields;
use crate::geometry::Geometry;

/// How much of a provider's result set a search should walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Fetch a single page.
    #[default]
    OnePage,
    /// Follow next pages until the provider is exhausted.
    AllPages,
    /// Only report the number of matching products.
    CountOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSearchModeError(String);

impl fmt::Display for ParseSearchModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid search mode '{}'; expected one of one-page, all-pages, count-only",
            self.0
        )
    }
}

impl std::error::Error for ParseSearchModeError {}

impl FromStr for SearchMode {
    type Err = ParseSearchModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "one-page" => Ok(Self::OnePage),
            "all-pages" => Ok(Self::AllPages),
            "count-only" | "count" => Ok(Self::CountOnly),
            _ => Err(ParseSearchModeError(s.to_string())),
        }
    }
}

/// Opaque continuation produced by a previous page; feed it back through
/// [`SearchRequest::cursor`] to resume where that page stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageCursor {
    Page { number: u32 },
    Token { value: String },
    NextUrl { url: String },
}

/// Provider-agnostic search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub product_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Additional canonical filters such as `cloudCover`.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub filters: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<PageCursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_per_page: Option<usize>,
    /// Restricts the search to this provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Ask for the total number of matches alongside the products.
    #[serde(default)]
    pub count: bool,
}

impl SearchRequest {
    pub fn new(product_type: impl Into<String>) -> Self {
        Self {
            product_type: product_type.into(),
            ..Self::default()
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_time_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_page(mut self, page: u32, items_per_page: usize) -> Self {
        self.page = Some(page);
        self.items_per_page = Some(items_per_page);
        self
    }

    pub fn with_count(mut self, count: bool) -> Self {
        self.count = count;
        self
    }

    /// Flattens the request into canonical parameters keyed by field name.
    ///
    /// Filters come first so the typed fields always win over a filter
    /// spelled with a canonical name. Dates are rendered as UTC ISO-8601
    /// with millisecond precision and the geometry as a GeoJSON object, which
    /// are the forms every converter accepts as input.
    pub fn parameters(&self) -> IndexMap<String, Value> {
        let mut parameters = self.filters.clone();
        let product_type = self.product_type.trim();
        if !product_type.is_empty() {
            parameters.insert(fields::PRODUCT_TYPE.to_string(), Value::String(product_type.to_string()));
        }
        if let Some(geometry) = &self.geometry {
            parameters.insert(fields::GEOMETRY.to_string(), geometry.to_geojson_value());
        }
        if let Some(start) = &self.start {
            parameters.insert(
                fields::START.to_string(),
                Value::String(start.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        if let Some(end) = &self.end {
            parameters.insert(
                fields::END.to_string(),
                Value::String(end.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        parameters
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn parameters_render_canonical_forms() {
        let start = Utc.with_ymd_and_hms(2021, 1, 1, 10, 30, 0).unwrap();
        let request = SearchRequest::new("S2_MSI_L1C")
            .with_time_range(Some(start), None)
            .with_filter("cloudCover", 20)
            .with_filter(fields::PRODUCT_TYPE, "ignored");

        let parameters = request.parameters();
        assert_eq!(parameters[fields::PRODUCT_TYPE], json!("S2_MSI_L1C"));
        assert_eq!(parameters[fields::START], json!("2021-01-01T10:30:00.000Z"));
        assert_eq!(parameters["cloudCover"], json!(20));
        assert!(!parameters.contains_key(fields::END));
        assert!(!parameters.contains_key(fields::GEOMETRY));
    }

    #[test]
    fn blank_product_type_is_left_out() {
        let request = SearchRequest::new("  ");
        assert!(!request.parameters().contains_key(fields::PRODUCT_TYPE));
    }

    #[test]
    fn search_mode_parses_cli_spellings() {
        assert_eq!("all-pages".parse::<SearchMode>().unwrap(), SearchMode::AllPages);
        assert_eq!("count_only".parse::<SearchMode>().unwrap(), SearchMode::CountOnly);
        assert!("everything".parse::<SearchMode>().is_err());
    }

    #[test]
    fn request_deserializes_from_yaml() {
        let request: SearchRequest = serde_yaml::from_str(
            "product_type: S1_SAR_GRD\ngeometry: [0, 40, 5, 45]\ncount: true\ncursor:\n  kind: token\n  value: abc\n",
        )
        .unwrap();
        assert_eq!(request.product_type, "S1_SAR_GRD");
        assert!(request.count);
        assert_eq!(request.cursor, Some(PageCursor::Token { value: "abc".into() }));
        assert!(matches!(request.geometry, Some(Geometry::BoundingBox(_))));
    }
}
