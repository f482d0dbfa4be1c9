//! Destination and source paths such as `/name/first`, `/list[2]` or `/attrs['k']`.

use std::fmt;
use std::str::FromStr;

use crate::value::Value;

/// Largest array index a path may name. Arrays are dense, so an index
/// allocates every slot below it.
pub const MAX_ARRAY_INDEX: usize = 65_535;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    /// Element of the array held by the preceding field.
    Index(usize),
    /// Entry of the map held by the preceding field.
    MapKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    Empty,
    EmptySegment(usize),
    UnclosedBracket(String),
    InvalidIndex(String),
    IndexTooLarge(usize),
    TrailingText(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::Empty => write!(f, "path is empty"),
            PathError::EmptySegment(pos) => write!(f, "empty path segment at position {}", pos),
            PathError::UnclosedBracket(seg) => write!(f, "unclosed bracket in segment '{}'", seg),
            PathError::InvalidIndex(raw) => write!(f, "invalid index '{}'", raw),
            PathError::IndexTooLarge(index) => {
                write!(f, "index {} exceeds the maximum of {}", index, MAX_ARRAY_INDEX)
            }
            PathError::TrailingText(seg) => write!(f, "unexpected text after qualifier in '{}'", seg),
        }
    }
}

impl std::error::Error for PathError {}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathExpression {
    segments: Vec<PathSegment>,
}

impl PathExpression {
    /// Parses a slash-separated path. A missing leading `/` is added.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "/" {
            return Err(PathError::Empty);
        }
        let body = trimmed.strip_prefix('/').unwrap_or(trimmed);

        let mut segments = Vec::new();
        for (pos, raw) in split_segments(body)?.into_iter().enumerate() {
            parse_segment(raw.trim(), pos, &mut segments)?;
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Name of the top-level field this path writes under.
    pub fn root_field(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Field(name)) => Some(name),
            _ => None,
        }
    }

    /// Returns the field name when the path is a single top-level field.
    pub fn as_top_level_field(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [PathSegment::Field(name)] => Some(name),
            _ => None,
        }
    }

    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (PathSegment::Field(name), Value::Record(fields))
                | (PathSegment::Field(name), Value::Map(fields))
                | (PathSegment::MapKey(name), Value::Map(fields))
                | (PathSegment::MapKey(name), Value::Record(fields)) => fields.get(name)?,
                (PathSegment::Index(index), Value::List(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl FromStr for PathExpression {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathExpression::parse(s)
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                PathSegment::Field(name) => write!(f, "/{}", name)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
                PathSegment::MapKey(key) => write!(f, "['{}']", key)?,
            }
        }
        Ok(())
    }
}

/// Splits on `/` outside of brackets and quotes.
fn split_segments(body: &str) -> Result<Vec<&str>, PathError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in body.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') if depth > 0 => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '/') if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth > 0 || quote.is_some() {
        return Err(PathError::UnclosedBracket(body[start..].to_string()));
    }
    parts.push(&body[start..]);
    Ok(parts)
}

fn parse_segment(raw: &str, pos: usize, segments: &mut Vec<PathSegment>) -> Result<(), PathError> {
    let (name, mut rest) = match raw.find('[') {
        Some(idx) => (raw[..idx].trim(), &raw[idx..]),
        None => (raw, ""),
    };
    if name.is_empty() {
        return Err(PathError::EmptySegment(pos));
    }
    segments.push(PathSegment::Field(name.to_string()));

    while !rest.is_empty() {
        let close = rest
            .find(']')
            .ok_or_else(|| PathError::UnclosedBracket(raw.to_string()))?;
        let inner = rest[1..close].trim();
        let quoted = inner
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
        match quoted {
            Some(key) => segments.push(PathSegment::MapKey(key.to_string())),
            None => {
                let index = inner
                    .parse::<usize>()
                    .map_err(|_| PathError::InvalidIndex(inner.to_string()))?;
                if index > MAX_ARRAY_INDEX {
                    return Err(PathError::IndexTooLarge(index));
                }
                segments.push(PathSegment::Index(index));
            }
        }
        rest = rest[close + 1..].trim_start();
        if !rest.is_empty() && !rest.starts_with('[') {
            return Err(PathError::TrailingText(raw.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod path_tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str) -> PathSegment {
        PathSegment::Field(name.to_string())
    }

    #[test]
    fn test_parse_nested_fields() {
        let path = PathExpression::parse("/name/first").unwrap();
        assert_eq!(path.segments(), &[field("name"), field("first")]);
        assert_eq!(path.root_field(), Some("name"));
        assert_eq!(path.as_top_level_field(), None);
    }

    #[test]
    fn test_parse_adds_leading_slash_and_trims() {
        let path = PathExpression::parse("  id ").unwrap();
        assert_eq!(path.to_string(), "/id");
        assert_eq!(path.as_top_level_field(), Some("id"));

        let spaced = PathExpression::parse("/ name / first ").unwrap();
        assert_eq!(spaced.to_string(), "/name/first");
    }

    #[test]
    fn test_parse_index_and_map_key() {
        let path = PathExpression::parse("/list[4]/name['first']").unwrap();
        assert_eq!(
            path.segments(),
            &[
                field("list"),
                PathSegment::Index(4),
                field("name"),
                PathSegment::MapKey("first".to_string())
            ]
        );
        assert_eq!(path.to_string(), "/list[4]/name['first']");
    }

    #[test]
    fn test_map_key_may_contain_slash() {
        let path = PathExpression::parse("/attrs[\"a/b\"]").unwrap();
        assert_eq!(path.segments()[1], PathSegment::MapKey("a/b".to_string()));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(PathExpression::parse(""), Err(PathError::Empty));
        assert_eq!(PathExpression::parse("/a//b"), Err(PathError::EmptySegment(1)));
        assert!(matches!(PathExpression::parse("/a[1"), Err(PathError::UnclosedBracket(_))));
        assert!(matches!(PathExpression::parse("/a[x]"), Err(PathError::InvalidIndex(_))));
        assert!(matches!(PathExpression::parse("/a[1]x"), Err(PathError::TrailingText(_))));
    }

    #[test]
    fn test_index_is_bounded() {
        assert!(PathExpression::parse("/list[65535]").is_ok());
        assert_eq!(
            PathExpression::parse("/list[65536]"),
            Err(PathError::IndexTooLarge(65_536))
        );
        assert_eq!(
            PathExpression::parse("/list[4000000000]"),
            Err(PathError::IndexTooLarge(4_000_000_000))
        );
        assert!(matches!(
            PathExpression::parse("/list[18446744073709551616]"),
            Err(PathError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_get_walks_records_lists_and_maps() {
        let root = Value::from_json(json!({
            "address": {"city": "Beijing"},
            "list": ["a", "b"]
        }));
        let city = PathExpression::parse("/address/city").unwrap();
        assert_eq!(city.get(&root), Some(&Value::from("Beijing")));
        let second = PathExpression::parse("/list[1]").unwrap();
        assert_eq!(second.get(&root), Some(&Value::from("b")));
        let keyed = PathExpression::parse("/address['city']").unwrap();
        assert_eq!(keyed.get(&root), Some(&Value::from("Beijing")));
        let missing = PathExpression::parse("/address/zip").unwrap();
        assert_eq!(missing.get(&root), None);
    }
}
