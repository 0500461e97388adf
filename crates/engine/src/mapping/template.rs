//! Placeholder templates used by build rules, endpoint URLs and extract
//! templates.
//!
//! A template is literal text with `{field#converter(args)#other}`
//! placeholders. `{{` and `}}` stand for literal braces. Templates are parsed
//! once; rendering only looks values up and runs converters.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::converters::{ConversionError, ConverterCall, ConverterRegistry, apply_chain};

static CONVERTER_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?\s*$").expect("converter call regex should compile")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed placeholder starting at offset {0}")]
    UnclosedPlaceholder(usize),
    #[error("unmatched '}}' at offset {0}; write '}}}}' for a literal brace")]
    UnmatchedClose(usize),
    #[error("empty placeholder at offset {0}")]
    EmptyPlaceholder(usize),
    #[error("unbalanced parentheses in placeholder '{0}'")]
    UnbalancedArguments(String),
    #[error("invalid converter in placeholder '{placeholder}': {reason}")]
    Converter { placeholder: String, reason: String },
}

/// `field#conv1(args)#conv2` inside braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub field: String,
    pub converters: Vec<ConverterCall>,
}

impl Placeholder {
    /// Parses the text between the braces of a placeholder.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut parts = split_top_level(text, '#').ok_or_else(|| TemplateError::UnbalancedArguments(text.to_string()))?;
        let field = parts.remove(0).trim().to_string();
        let converters = resolve_calls(text, &parts)?;
        Ok(Self { field, converters })
    }

    /// Looks the field up and runs the converter chain. `Ok(None)` when the
    /// field is absent.
    pub fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Result<Option<Value>, ConversionError> {
        match lookup(&self.field) {
            Some(value) => apply_chain(&self.converters, value).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateNode {
    Literal(String),
    Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    nodes: Vec<TemplateNode>,
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let chars: Vec<char> = source.chars().collect();
        let mut nodes = Vec::new();
        let mut literal = String::new();
        let mut position = 0;

        while position < chars.len() {
            match chars[position] {
                '{' if chars.get(position + 1) == Some(&'{') => {
                    literal.push('{');
                    position += 2;
                }
                '}' if chars.get(position + 1) == Some(&'}') => {
                    literal.push('}');
                    position += 2;
                }
                '}' => return Err(TemplateError::UnmatchedClose(position)),
                '{' => {
                    let end = find_placeholder_end(&chars, position + 1)
                        .ok_or(TemplateError::UnclosedPlaceholder(position))?;
                    let text: String = chars[position + 1..end].iter().collect();
                    if text.trim().is_empty() {
                        return Err(TemplateError::EmptyPlaceholder(position));
                    }
                    if !literal.is_empty() {
                        nodes.push(TemplateNode::Literal(std::mem::take(&mut literal)));
                    }
                    nodes.push(TemplateNode::Placeholder(Placeholder::parse(&text)?));
                    position = end + 1;
                }
                ch => {
                    literal.push(ch);
                    position += 1;
                }
            }
        }
        if !literal.is_empty() {
            nodes.push(TemplateNode::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }

    /// Fields referenced by placeholders, in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter_map(|node| match node {
            TemplateNode::Placeholder(placeholder) => Some(placeholder.field.as_str()),
            TemplateNode::Literal(_) => None,
        })
    }

    pub fn is_literal(&self) -> bool {
        self.nodes.iter().all(|node| matches!(node, TemplateNode::Literal(_)))
    }

    /// Literal text before the first placeholder.
    pub fn leading_literal(&self) -> &str {
        match self.nodes.first() {
            Some(TemplateNode::Literal(text)) => text,
            _ => "",
        }
    }

    /// The placeholder when the template is exactly one placeholder.
    pub fn as_single_placeholder(&self) -> Option<&Placeholder> {
        match self.nodes.as_slice() {
            [TemplateNode::Placeholder(placeholder)] => Some(placeholder),
            _ => None,
        }
    }

    /// Renders the template to text. `Ok(None)` when any referenced field is
    /// absent, so the caller omits the whole fragment.
    pub fn render(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Result<Option<String>, ConversionError> {
        let mut rendered = String::new();
        for node in &self.nodes {
            match node {
                TemplateNode::Literal(text) => rendered.push_str(text),
                TemplateNode::Placeholder(placeholder) => match placeholder.evaluate(lookup)? {
                    Some(value) => rendered.push_str(&format_json_value(&value)),
                    None => return Ok(None),
                },
            }
        }
        Ok(Some(rendered))
    }

    /// Like [`Template::render`], but a template made of a single placeholder
    /// keeps the converted value's JSON type.
    pub fn render_value(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Result<Option<Value>, ConversionError> {
        match self.as_single_placeholder() {
            Some(placeholder) => placeholder.evaluate(lookup),
            None => Ok(self.render(lookup)?.map(Value::String)),
        }
    }
}

/// Text form of a value inside a rendered template.
pub fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parses a `conv1(args)#conv2` chain with no leading field.
pub fn parse_converter_chain(text: &str) -> Result<Vec<ConverterCall>, TemplateError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parts = split_top_level(text, '#').ok_or_else(|| TemplateError::UnbalancedArguments(text.to_string()))?;
    resolve_calls(text, &parts)
}

fn resolve_calls(placeholder: &str, parts: &[String]) -> Result<Vec<ConverterCall>, TemplateError> {
    let registry = ConverterRegistry::global();
    parts
        .iter()
        .map(|part| {
            let captures = CONVERTER_CALL.captures(part).ok_or_else(|| TemplateError::Converter {
                placeholder: placeholder.to_string(),
                reason: format!("'{}' is not a converter call", part.trim()),
            })?;
            let args = captures.get(2).map(|m| m.as_str());
            registry
                .resolve(&captures[1], args)
                .map_err(|reason| TemplateError::Converter {
                    placeholder: placeholder.to_string(),
                    reason,
                })
        })
        .collect()
}

/// Index of the `}` closing a placeholder whose body starts at `start`.
fn find_placeholder_end(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (offset, &ch) in chars[start..].iter().enumerate() {
        match (quote, ch) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') if depth > 0 => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, '}') if depth == 0 => return Some(start + offset),
            _ => {}
        }
    }
    None
}

/// Splits on `separator` outside parentheses and quotes. `None` when the
/// parentheses do not balance.
fn split_top_level(text: &str, separator: char) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for ch in text.chars() {
        match (quote, ch) {
            (Some(open), c) if c == open => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') if depth > 0 => {
                quote = Some(ch);
                current.push(ch);
            }
            (None, '(') => {
                depth += 1;
                current.push(ch);
            }
            (None, ')') => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
                current.push(ch);
            }
            (None, c) if c == separator && depth == 0 => parts.push(std::mem::take(&mut current)),
            (None, c) => current.push(c),
        }
    }
    if depth != 0 || quote.is_some() {
        return None;
    }
    parts.push(current);
    Some(parts)
}
