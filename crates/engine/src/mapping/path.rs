//! JSONPath subset used by extract specs and pagination settings.
//!
//! Supported syntax: `$`, `.name`, `['name']`, `["name"]`, `[n]`, `[-n]`,
//! `[*]`, `.*` and recursive descent `..name` / `..*`. Paths are parsed once
//! into a segment vector and evaluated without allocation beyond the match
//! list.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path must start with '$'")]
    MissingRoot,
    #[error("unclosed '[' at offset {0}")]
    UnclosedBracket(usize),
    #[error("unterminated quote at offset {0}")]
    UnterminatedQuote(usize),
    #[error("invalid array index '{0}'")]
    InvalidIndex(String),
    #[error("empty segment at offset {0}")]
    EmptySegment(usize),
    #[error("unexpected '{0}' at offset {1}")]
    UnexpectedCharacter(char, usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Child(String),
    Index(i64),
    Wildcard,
    Descendant(String),
    DescendantWildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    source: String,
    segments: Vec<PathSegment>,
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl JsonPath {
    pub fn parse(source: &str) -> Result<Self, PathError> {
        let trimmed = source.trim();
        let rest = trimmed.strip_prefix('$').ok_or(PathError::MissingRoot)?;
        let offset = trimmed.len() - rest.len();
        let segments = PathParser::new(rest, offset).parse()?;
        Ok(Self {
            source: trimmed.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// All values matched by the path, in document order.
    pub fn find<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        self.find_with_keys(root).into_iter().map(|(_, value)| value).collect()
    }

    /// Matches paired with the object key they were found under, if any.
    pub fn find_with_keys<'a>(&self, root: &'a Value) -> Vec<(Option<&'a str>, &'a Value)> {
        let mut current: Vec<(Option<&'a str>, &'a Value)> = vec![(None, root)];
        for segment in &self.segments {
            let mut next = Vec::new();
            for (_, value) in current {
                step(segment, value, &mut next);
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }

    /// The match when exactly one value matches; `None` for zero or several.
    pub fn find_unique<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let matches = self.find(root);
        match matches.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    pub fn first<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.find(root).into_iter().next()
    }
}

fn step<'a>(segment: &PathSegment, value: &'a Value, out: &mut Vec<(Option<&'a str>, &'a Value)>) {
    match segment {
        PathSegment::Child(name) => {
            if let Some((key, child)) = value.as_object().and_then(|map| map.get_key_value(name)) {
                out.push((Some(key.as_str()), child));
            }
        }
        PathSegment::Index(index) => {
            if let Some(items) = value.as_array() {
                let resolved = if *index < 0 { items.len() as i64 + index } else { *index };
                if let Some(item) = usize::try_from(resolved).ok().and_then(|i| items.get(i)) {
                    out.push((None, item));
                }
            }
        }
        PathSegment::Wildcard => push_children(value, out),
        PathSegment::Descendant(name) => collect_descendants(value, Some(name), out),
        PathSegment::DescendantWildcard => collect_descendants(value, None, out),
    }
}

fn push_children<'a>(value: &'a Value, out: &mut Vec<(Option<&'a str>, &'a Value)>) {
    match value {
        Value::Object(map) => out.extend(map.iter().map(|(key, child)| (Some(key.as_str()), child))),
        Value::Array(items) => out.extend(items.iter().map(|item| (None, item))),
        _ => {}
    }
}

fn collect_descendants<'a>(value: &'a Value, name: Option<&str>, out: &mut Vec<(Option<&'a str>, &'a Value)>) {
    match name {
        Some(name) => {
            if let Some((key, child)) = value.as_object().and_then(|map| map.get_key_value(name)) {
                out.push((Some(key.as_str()), child));
            }
        }
        None => push_children(value, out),
    }
    match value {
        Value::Object(map) => map.values().for_each(|child| collect_descendants(child, name, out)),
        Value::Array(items) => items.iter().for_each(|item| collect_descendants(item, name, out)),
        _ => {}
    }
}

struct PathParser<'a> {
    chars: Vec<char>,
    position: usize,
    offset: usize,
    _source: &'a str,
}

impl<'a> PathParser<'a> {
    fn new(source: &'a str, offset: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            position: 0,
            offset,
            _source: source,
        }
    }

    fn at(&self) -> usize {
        self.offset + self.position
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn parse(mut self) -> Result<Vec<PathSegment>, PathError> {
        let mut segments = Vec::new();
        while let Some(ch) = self.peek() {
            match ch {
                '.' => {
                    self.position += 1;
                    if self.peek() == Some('.') {
                        self.position += 1;
                        if self.peek() == Some('*') {
                            self.position += 1;
                            segments.push(PathSegment::DescendantWildcard);
                        } else if self.peek() == Some('[') {
                            match self.parse_bracket()? {
                                PathSegment::Child(name) => segments.push(PathSegment::Descendant(name)),
                                PathSegment::Wildcard => segments.push(PathSegment::DescendantWildcard),
                                other => {
                                    segments.push(PathSegment::DescendantWildcard);
                                    segments.push(other);
                                }
                            }
                        } else {
                            segments.push(PathSegment::Descendant(self.parse_name()?));
                        }
                    } else if self.peek() == Some('*') {
                        self.position += 1;
                        segments.push(PathSegment::Wildcard);
                    } else {
                        segments.push(PathSegment::Child(self.parse_name()?));
                    }
                }
                '[' => segments.push(self.parse_bracket()?),
                other if other.is_whitespace() => return Err(PathError::UnexpectedCharacter(other, self.at())),
                other => return Err(PathError::UnexpectedCharacter(other, self.at())),
            }
        }
        Ok(segments)
    }

    fn parse_name(&mut self) -> Result<String, PathError> {
        let start = self.position;
        while let Some(ch) = self.peek() {
            if matches!(ch, '.' | '[' | ']') {
                break;
            }
            self.position += 1;
        }
        if self.position == start {
            return Err(PathError::EmptySegment(self.at()));
        }
        Ok(self.chars[start..self.position].iter().collect())
    }

    fn parse_bracket(&mut self) -> Result<PathSegment, PathError> {
        let open = self.at();
        self.position += 1;
        self.skip_whitespace();
        let segment = match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                let quote_at = self.at();
                self.position += 1;
                let start = self.position;
                while self.peek().is_some_and(|ch| ch != quote) {
                    self.position += 1;
                }
                if self.peek().is_none() {
                    return Err(PathError::UnterminatedQuote(quote_at));
                }
                let name: String = self.chars[start..self.position].iter().collect();
                self.position += 1;
                PathSegment::Child(name)
            }
            Some('*') => {
                self.position += 1;
                PathSegment::Wildcard
            }
            Some(_) => {
                let start = self.position;
                while self.peek().is_some_and(|ch| ch != ']') {
                    self.position += 1;
                }
                let raw: String = self.chars[start..self.position].iter().collect();
                let index = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| PathError::InvalidIndex(raw.trim().to_string()))?;
                PathSegment::Index(index)
            }
            None => return Err(PathError::UnclosedBracket(open)),
        };
        self.skip_whitespace();
        if self.peek() != Some(']') {
            return Err(PathError::UnclosedBracket(open));
        }
        self.position += 1;
        Ok(segment)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.position += 1;
        }
    }
}
