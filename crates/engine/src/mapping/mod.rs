//! Metadata mapping compiler.
//!
//! Each provider declares, per canonical field, how to put the field into a
//! query and how to read it back from a response. The raw YAML entry is
//! compiled once into a [`MappingRule`]:
//!
//! - `"<extract>"`: read-only field
//! - `["<build>", "<extract>"]`: queryable field with both directions
//! - `["<build>"]` or `["<build>", null]`: queryable, build only

pub mod converters;
pub mod path;
pub mod template;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use self::converters::{ConversionError, ConverterCall, apply_chain};
use self::path::JsonPath;
use self::template::{Template, parse_converter_chain};
use crate::error::GatewayError;

static PARAMETER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.:\-\[\]]*$").expect("parameter name regex should compile"));

/// Where a rendered build template goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildTarget {
    QueryParam { name: String },
    Header { name: String },
    JsonBody,
}

/// A rendered piece of a provider query.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Param { name: String, value: String },
    Header { name: String, value: String },
    Body(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTemplate {
    pub target: BuildTarget,
    pub value: Template,
}

impl BuildTemplate {
    /// Parses the build side of a mapping entry for canonical `field`.
    pub fn parse(field: &str, raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("header:") {
            let (name, value) = rest
                .split_once('=')
                .ok_or_else(|| format!("header template '{raw}' needs 'Name=value'"))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(format!("header template '{raw}' has no header name"));
            }
            return Ok(Self {
                target: BuildTarget::Header { name: name.to_string() },
                value: Template::parse(value.trim()).map_err(|error| error.to_string())?,
            });
        }

        if trimmed.starts_with("{{") {
            return Ok(Self {
                target: BuildTarget::JsonBody,
                value: Template::parse(trimmed).map_err(|error| error.to_string())?,
            });
        }

        if let Some(equals) = trimmed.find('=')
            && !trimmed[..equals].contains('{')
        {
            let name = trimmed[..equals].trim();
            if name.is_empty() {
                return Err(format!("parameter template '{raw}' has no parameter name"));
            }
            return Ok(Self {
                target: BuildTarget::QueryParam { name: name.to_string() },
                value: Template::parse(&trimmed[equals + 1..]).map_err(|error| error.to_string())?,
            });
        }

        let value = Template::parse(trimmed).map_err(|error| error.to_string())?;
        if !value.is_literal() {
            return Ok(Self {
                target: BuildTarget::QueryParam { name: field.to_string() },
                value,
            });
        }
        if PARAMETER_NAME.is_match(trimmed) {
            let carried = Template::parse(&format!("{{{field}}}")).map_err(|error| error.to_string())?;
            return Ok(Self {
                target: BuildTarget::QueryParam {
                    name: trimmed.to_string(),
                },
                value: carried,
            });
        }
        Err(format!("build template '{raw}' has no placeholder and is not a parameter name"))
    }

    /// Renders the fragment, or `Ok(None)` when a referenced field is absent.
    pub fn render(
        &self,
        provider: &str,
        field: &str,
        lookup: &dyn Fn(&str) -> Option<Value>,
    ) -> Result<Option<Fragment>, GatewayError> {
        let invalid = |reason: String| GatewayError::InvalidParameter {
            provider: provider.to_string(),
            field: field.to_string(),
            reason,
        };
        let Some(rendered) = self
            .value
            .render(lookup)
            .map_err(|error| invalid(error.to_string()))?
        else {
            return Ok(None);
        };
        let fragment = match &self.target {
            BuildTarget::QueryParam { name } => Fragment::Param {
                name: name.clone(),
                value: rendered,
            },
            BuildTarget::Header { name } => Fragment::Header {
                name: name.clone(),
                value: rendered,
            },
            BuildTarget::JsonBody => {
                let body = serde_json::from_str(&rendered)
                    .map_err(|error| invalid(format!("rendered body fragment is not JSON ({error}): {rendered}")))?;
                Fragment::Body(body)
            }
        };
        Ok(Some(fragment))
    }
}

/// How a field is read back from a result item.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractSpec {
    Path {
        path: JsonPath,
        converters: Vec<ConverterCall>,
    },
    /// Resolved over the item's other extracted properties.
    Template(Template),
    Constant(Value),
}

impl ExtractSpec {
    /// `Ok(None)` for an explicit `null`, which means "not extractable".
    pub fn parse(raw: &Value) -> Result<Option<Self>, String> {
        let text = match raw {
            Value::Null => return Ok(None),
            Value::String(text) => text.trim(),
            other => return Ok(Some(ExtractSpec::Constant(other.clone()))),
        };

        if text.starts_with('$') {
            return Self::parse_path(text).map(Some);
        }
        if let Some(inner) = text.strip_prefix("{$").and_then(|rest| rest.strip_suffix('}')) {
            return Self::parse_path(&format!("${inner}")).map(Some);
        }

        let template = Template::parse(text).map_err(|error| error.to_string())?;
        if template.is_literal() {
            let literal = template
                .render(&|_| None)
                .map_err(|error| error.to_string())?
                .unwrap_or_default();
            return Ok(Some(ExtractSpec::Constant(Value::String(literal))));
        }
        Ok(Some(ExtractSpec::Template(template)))
    }

    fn parse_path(text: &str) -> Result<Self, String> {
        let (path_text, chain_text) = match find_chain_separator(text) {
            Some(index) => (&text[..index], &text[index + 1..]),
            None => (text, ""),
        };
        let path = JsonPath::parse(path_text).map_err(|error| format!("invalid path '{path_text}': {error}"))?;
        let converters = parse_converter_chain(chain_text).map_err(|error| error.to_string())?;
        Ok(ExtractSpec::Path { path, converters })
    }

    /// Evaluates a path spec against one result item. A path must match
    /// exactly one value; anything else leaves the field absent.
    pub fn extract_from(&self, item: &Value) -> Option<Result<Value, ConversionError>> {
        match self {
            ExtractSpec::Path { path, converters } => {
                let matched = path.find_unique(item)?.clone();
                Some(apply_chain(converters, matched))
            }
            ExtractSpec::Constant(value) => Some(Ok(value.clone())),
            ExtractSpec::Template(_) => None,
        }
    }
}

/// First `#` outside brackets and quotes.
fn find_chain_separator(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (index, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '#') if depth == 0 => return Some(index),
            _ => {}
        }
    }
    None
}

/// Compiled mapping entry for one canonical field.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRule {
    pub field: String,
    pub queryable: bool,
    pub build: Option<BuildTemplate>,
    pub extract: Option<ExtractSpec>,
}

impl MappingRule {
    pub fn compile(provider: &str, field: &str, raw: &Value) -> Result<Self, GatewayError> {
        let syntax = |reason: String| GatewayError::mapping(provider, field, reason);
        match raw {
            Value::Array(entries) => {
                let (build_raw, extract_raw) = match entries.as_slice() {
                    [build] => (build, &Value::Null),
                    [build, extract] => (build, extract),
                    _ => {
                        return Err(syntax(format!(
                            "expected one or two entries for a queryable field, got {}",
                            entries.len()
                        )));
                    }
                };
                let build_text = build_raw
                    .as_str()
                    .ok_or_else(|| syntax("build template must be a string".to_string()))?;
                let build = BuildTemplate::parse(field, build_text).map_err(syntax)?;
                let extract = ExtractSpec::parse(extract_raw).map_err(syntax)?;
                Ok(Self {
                    field: field.to_string(),
                    queryable: true,
                    build: Some(build),
                    extract,
                })
            }
            Value::Null => Err(syntax("mapping entry is empty".to_string())),
            other => {
                let extract = ExtractSpec::parse(other).map_err(syntax)?;
                Ok(Self {
                    field: field.to_string(),
                    queryable: false,
                    build: None,
                    extract,
                })
            }
        }
    }
}

/// Ordered field table of a provider or product type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMapping {
    rules: IndexMap<String, MappingRule>,
}

impl FieldMapping {
    pub fn compile(provider: &str, raw: &IndexMap<String, Value>) -> Result<Self, GatewayError> {
        let rules = raw
            .iter()
            .map(|(field, entry)| Ok((field.clone(), MappingRule::compile(provider, field, entry)?)))
            .collect::<Result<IndexMap<_, _>, GatewayError>>()?;
        Ok(Self { rules })
    }

    /// Applies `other` on top. Redefined fields keep their original position.
    pub fn overlay(&mut self, other: &FieldMapping) {
        for (field, rule) in &other.rules {
            self.rules.insert(field.clone(), rule.clone());
        }
    }

    pub fn get(&self, field: &str) -> Option<&MappingRule> {
        self.rules.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.rules.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingRule> {
        self.rules.values()
    }

    pub fn queryable_rules(&self) -> impl Iterator<Item = &MappingRule> {
        self.rules.values().filter(|rule| rule.queryable)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
