//! Provider-specific request and response envelopes exchanged with a
//! transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// A fully rendered request for one provider page.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProviderQuery {
    pub provider: String,
    pub method: HttpMethod,
    pub url: String,
    /// Query string pairs in render order.
    pub query_params: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    #[serde(skip)]
    pub basic_auth: Option<(String, String)>,
}

impl ProviderQuery {
    pub fn new(provider: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            method,
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn push_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.query_params.push((name.into(), value.into()));
    }

    /// Replaces every existing pair named `name` with a single new pair.
    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.query_params.iter().position(|(key, _)| key == name) {
            Some(index) => {
                self.query_params[index].1 = value;
                let mut seen = false;
                self.query_params.retain(|(key, _)| {
                    if key != name {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.query_params.push((name.to_string(), value)),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Deep-merges `fragment` into the JSON body, creating it when absent.
    pub fn merge_body(&mut self, fragment: Value) {
        match self.body.as_mut() {
            Some(body) => merge_json(body, fragment),
            None => self.body = Some(fragment),
        }
    }

    /// The URL with the query string applied, as a transport would send it.
    pub fn full_url(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.url)?;
        if !self.query_params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query_params.iter());
        }
        Ok(url)
    }
}

/// Recursively merges `overlay` into `target`. Objects merge key by key;
/// any other value in `overlay` replaces the target value.
pub fn merge_json(target: &mut Value, overlay: Value) {
    match (target, overlay) {
        (Value::Object(target_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target, overlay) => *target = overlay,
    }
}

/// Raw answer of a provider before extraction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawProviderResponse {
    pub status: u16,
    pub bytes: Vec<u8>,
    /// Parsed JSON body, absent when the body is not JSON.
    pub tree: Option<Value>,
}

impl RawProviderResponse {
    pub fn from_bytes(status: u16, bytes: Vec<u8>) -> Self {
        let tree = serde_json::from_slice(&bytes).ok();
        Self { status, bytes, tree }
    }

    pub fn from_json(status: u16, tree: Value) -> Self {
        let bytes = tree.to_string().into_bytes();
        Self {
            status,
            bytes,
            tree: Some(tree),
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn set_param_replaces_all_occurrences() {
        let mut query = ProviderQuery::new("p", HttpMethod::Get, "https://example.com/search");
        query.push_param("page", "1");
        query.push_param("q", "x");
        query.push_param("page", "9");
        query.set_param("page", "2");
        assert_eq!(
            query.query_params,
            vec![("page".to_string(), "2".to_string()), ("q".to_string(), "x".to_string())]
        );
    }

    #[test]
    fn merge_body_is_deep() {
        let mut query = ProviderQuery::new("p", HttpMethod::Post, "https://example.com/search");
        query.merge_body(json!({"query": {"a": 1}, "limit": 10}));
        query.merge_body(json!({"query": {"b": 2}, "limit": 20}));
        assert_eq!(query.body, Some(json!({"query": {"a": 1, "b": 2}, "limit": 20})));
    }

    #[test]
    fn full_url_encodes_params() {
        let mut query = ProviderQuery::new("p", HttpMethod::Get, "https://example.com/search");
        query.push_param("box", "1,2,3,4");
        assert_eq!(query.full_url().unwrap().as_str(), "https://example.com/search?box=1%2C2%2C3%2C4");
    }

    #[test]
    fn non_json_body_has_no_tree() {
        let response = RawProviderResponse::from_bytes(200, b"<html>".to_vec());
        assert!(response.tree.is_none());
        assert_eq!(response.body_text(), "<html>");
    }
}
