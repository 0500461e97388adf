//! Search behaviour families.
//!
//! Providers are compiled into one of a closed set of plugins; the query
//! builder and the pagination controller hand rendered fragments to the
//! plugin, which decides where they land in the request.

use eogate_types::{HttpMethod, ProviderQuery};
use serde_json::{Map, Value};

use crate::config::model::SearchType;
use crate::mapping::Fragment;
use crate::mapping::template::format_json_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchPlugin {
    /// GET with every parameter in the query string.
    QueryString,
    /// POST with a JSON body; plain parameters become body members.
    PostJson,
}

impl From<SearchType> for SearchPlugin {
    fn from(search_type: SearchType) -> Self {
        match search_type {
            SearchType::QueryStringSearch => SearchPlugin::QueryString,
            SearchType::PostJsonSearch => SearchPlugin::PostJson,
        }
    }
}

impl SearchPlugin {
    pub fn method(self) -> HttpMethod {
        match self {
            SearchPlugin::QueryString => HttpMethod::Get,
            SearchPlugin::PostJson => HttpMethod::Post,
        }
    }

    pub fn apply_fragment(self, query: &mut ProviderQuery, fragment: Fragment) {
        match fragment {
            Fragment::Param { name, value } => self.apply_param(query, name, value, false),
            Fragment::Header { name, value } => query.push_header(name, value),
            Fragment::Body(body) => query.merge_body(body),
        }
    }

    /// Applies a `name=value` pair, replacing same-named pairs when
    /// `replace` is set.
    pub fn apply_param(self, query: &mut ProviderQuery, name: String, value: String, replace: bool) {
        match self {
            SearchPlugin::QueryString if replace => query.set_param(&name, value),
            SearchPlugin::QueryString => query.push_param(name, value),
            SearchPlugin::PostJson => {
                let mut member = Map::new();
                member.insert(name, body_scalar(&value));
                query.merge_body(Value::Object(member));
            }
        }
    }

    /// Applies a constant parameter configured for every search.
    pub fn apply_literal(self, query: &mut ProviderQuery, name: &str, value: &Value) {
        match self {
            SearchPlugin::QueryString => query.push_param(name, format_json_value(value)),
            SearchPlugin::PostJson => {
                let mut member = Map::new();
                member.insert(name.to_string(), value.clone());
                query.merge_body(Value::Object(member));
            }
        }
    }

    /// Applies rendered next-page parameters: `a=1&b=2` pairs or a JSON
    /// object fragment.
    pub fn apply_pagination(self, query: &mut ProviderQuery, rendered: &str) -> Result<(), String> {
        let trimmed = rendered.trim();
        if trimmed.starts_with('{') {
            let fragment: Value = serde_json::from_str(trimmed)
                .map_err(|error| format!("pagination fragment is not JSON ({error}): {trimmed}"))?;
            query.merge_body(fragment);
            return Ok(());
        }
        for pair in trimmed.split('&').filter(|pair| !pair.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("pagination parameter '{pair}' is not name=value"))?;
            self.apply_param(query, name.trim().to_string(), value.trim().to_string(), true);
        }
        Ok(())
    }
}

/// Typed body member for a rendered parameter: JSON literals keep their
/// type, anything else stays a string.
fn body_scalar(value: &str) -> Value {
    match serde_json::from_str::<Value>(value) {
        Ok(parsed) if !parsed.is_string() => parsed,
        _ => Value::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn query_string_pagination_replaces_params() {
        let mut query = ProviderQuery::new("p", HttpMethod::Get, "https://x.example/search");
        query.push_param("page", "1");
        query.push_param("q", "a");
        SearchPlugin::QueryString
            .apply_pagination(&mut query, "page=2&maxRecords=20")
            .unwrap();
        assert_eq!(query.query_params, vec![
            ("page".to_string(), "2".to_string()),
            ("q".to_string(), "a".to_string()),
            ("maxRecords".to_string(), "20".to_string()),
        ]);
    }

    #[test]
    fn post_json_moves_params_into_the_body() {
        let mut query = ProviderQuery::new("p", SearchPlugin::PostJson.method(), "https://x.example/search");
        SearchPlugin::PostJson.apply_fragment(
            &mut query,
            Fragment::Param {
                name: "limit".into(),
                value: "20".into(),
            },
        );
        SearchPlugin::PostJson.apply_fragment(
            &mut query,
            Fragment::Param {
                name: "collections".into(),
                value: r#"["S2"]"#.into(),
            },
        );
        SearchPlugin::PostJson.apply_fragment(
            &mut query,
            Fragment::Param {
                name: "datetime".into(),
                value: "2021-01-01T00:00:00Z/..".into(),
            },
        );
        assert_eq!(
            query.body,
            Some(json!({"limit": 20, "collections": ["S2"], "datetime": "2021-01-01T00:00:00Z/.."}))
        );
        assert!(query.query_params.is_empty());
    }

    #[test]
    fn json_pagination_fragment_merges() {
        let mut query = ProviderQuery::new("p", HttpMethod::Post, "https://x.example/search");
        query.merge_body(json!({"limit": 20, "query": {"a": 1}}));
        SearchPlugin::PostJson
            .apply_pagination(&mut query, r#"{"page": 3}"#)
            .unwrap();
        assert_eq!(query.body, Some(json!({"limit": 20, "query": {"a": 1}, "page": 3})));
        assert!(SearchPlugin::PostJson.apply_pagination(&mut query, "{broken").is_err());
    }
}
