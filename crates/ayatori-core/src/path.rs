//! JSONPath subset used to select from and write into documents.
//!
//! Supported syntax: `$`, `.name`, `['name']`, `["name"]`, `[n]`, `.*` and
//! `[*]`. Paths without a wildcard are *definite* and may be written to.

use crate::error::{kind_of, WorkflowError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reasons a path fails to parse or apply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path must start with '$'")]
    MissingRoot,

    #[error("unexpected character '{found}' at offset {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("unexpected end of path")]
    UnexpectedEnd,

    #[error("expected exactly one match, found {0}")]
    NotSingular(usize),

    #[error("path contains a wildcard and cannot be written to")]
    Indefinite,

    #[error("cannot descend into a {0} value")]
    NotContainer(&'static str),

    #[error("index {index} is out of bounds for an array of length {len}")]
    OutOfBounds { index: usize, len: usize },
}

impl PathError {
    /// Attaches the offending path text, producing a fatal workflow error.
    pub fn at(self, path: impl fmt::Display) -> WorkflowError {
        WorkflowError::InvalidPath {
            path: path.to_string(),
            reason: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

/// A parsed path.
///
/// ```
/// use ayatori_core::JsonPath;
/// use serde_json::json;
///
/// let doc = json!({"order": {"items": [{"sku": "a"}, {"sku": "b"}]}});
/// let path: JsonPath = "$.order.items[1].sku".parse().unwrap();
/// assert_eq!(path.query_one(&doc).unwrap(), &json!("b"));
///
/// let all: JsonPath = "$.order.items[*].sku".parse().unwrap();
/// assert_eq!(all.query(&doc).len(), 2);
/// assert!(!all.is_definite());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Returns the path as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns `true` for the bare root path `$`.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns `true` if the path contains no wildcard.
    pub fn is_definite(&self) -> bool {
        !self.segments.contains(&Segment::Wildcard)
    }

    /// Returns every value the path matches, in document order.
    pub fn query<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match (segment, value) {
                    (Segment::Field(name), Value::Object(map)) => next.extend(map.get(name)),
                    (Segment::Index(index), Value::Array(items)) => next.extend(items.get(*index)),
                    (Segment::Wildcard, Value::Object(map)) => next.extend(map.values()),
                    (Segment::Wildcard, Value::Array(items)) => next.extend(items.iter()),
                    _ => {}
                }
            }
            current = next;
        }
        current
    }

    /// Returns the single value the path matches.
    ///
    /// Zero or multiple matches are an error.
    pub fn query_one<'a>(&self, root: &'a Value) -> Result<&'a Value, PathError> {
        match self.query(root).as_slice() {
            [one] => Ok(*one),
            other => Err(PathError::NotSingular(other.len())),
        }
    }

    /// Selects a value for payload templates.
    ///
    /// Definite paths yield their single match; wildcard paths yield an array
    /// of every match.
    pub fn select(&self, root: &Value) -> Result<Value, PathError> {
        if self.is_definite() {
            self.query_one(root).cloned()
        } else {
            Ok(Value::Array(self.query(root).into_iter().cloned().collect()))
        }
    }

    /// Writes `value` at this path inside `target`.
    ///
    /// Missing intermediate fields are created as empty objects. The path must
    /// be definite, and array indices must already exist.
    pub fn set(&self, target: &mut Value, value: Value) -> Result<(), PathError> {
        let Some((last, parents)) = self.segments.split_last() else {
            *target = value;
            return Ok(());
        };

        let mut cursor = target;
        for segment in parents {
            cursor = match (segment, cursor) {
                (Segment::Field(name), Value::Object(map)) => map
                    .entry(name.clone())
                    .or_insert_with(|| Value::Object(Map::new())),
                (Segment::Index(index), Value::Array(items)) => {
                    let len = items.len();
                    items
                        .get_mut(*index)
                        .ok_or(PathError::OutOfBounds { index: *index, len })?
                }
                (Segment::Wildcard, _) => return Err(PathError::Indefinite),
                (_, other) => return Err(PathError::NotContainer(kind_of(other))),
            };
        }

        match (last, cursor) {
            (Segment::Field(name), Value::Object(map)) => {
                map.insert(name.clone(), value);
            }
            (Segment::Index(index), Value::Array(items)) => {
                let len = items.len();
                let slot = items
                    .get_mut(*index)
                    .ok_or(PathError::OutOfBounds { index: *index, len })?;
                *slot = value;
            }
            (Segment::Wildcard, _) => return Err(PathError::Indefinite),
            (_, other) => return Err(PathError::NotContainer(kind_of(other))),
        }
        Ok(())
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.char_indices().peekable();
        if !matches!(chars.next(), Some((_, '$'))) {
            return Err(PathError::MissingRoot);
        }

        let mut segments = Vec::new();
        while let Some((offset, c)) = chars.next() {
            match c {
                '.' => {
                    if chars.next_if(|&(_, c)| c == '*').is_some() {
                        segments.push(Segment::Wildcard);
                        continue;
                    }
                    let mut name = String::new();
                    while let Some((_, c)) = chars.next_if(|&(_, c)| c != '.' && c != '[') {
                        name.push(c);
                    }
                    if name.is_empty() {
                        return Err(match chars.peek() {
                            Some(&(offset, found)) => PathError::Unexpected { found, offset },
                            None => PathError::UnexpectedEnd,
                        });
                    }
                    segments.push(Segment::Field(name));
                }
                '[' => {
                    let segment = match chars.next() {
                        Some((_, '*')) => Segment::Wildcard,
                        Some((_, quote @ ('\'' | '"'))) => {
                            let mut name = String::new();
                            loop {
                                match chars.next() {
                                    Some((_, c)) if c == quote => break,
                                    Some((_, c)) => name.push(c),
                                    None => return Err(PathError::UnexpectedEnd),
                                }
                            }
                            Segment::Field(name)
                        }
                        Some((_, digit)) if digit.is_ascii_digit() => {
                            let mut digits = String::from(digit);
                            while let Some((_, d)) = chars.next_if(|&(_, c)| c.is_ascii_digit()) {
                                digits.push(d);
                            }
                            let index = digits.parse().map_err(|_| PathError::Unexpected {
                                found: digit,
                                offset: offset + 1,
                            })?;
                            Segment::Index(index)
                        }
                        Some((offset, found)) => return Err(PathError::Unexpected { found, offset }),
                        None => return Err(PathError::UnexpectedEnd),
                    };
                    match chars.next() {
                        Some((_, ']')) => {}
                        Some((offset, found)) => return Err(PathError::Unexpected { found, offset }),
                        None => return Err(PathError::UnexpectedEnd),
                    }
                    segments.push(segment);
                }
                found => return Err(PathError::Unexpected { found, offset }),
            }
        }

        Ok(Self {
            raw: s.to_string(),
            segments,
        })
    }
}

impl<'de> Deserialize<'de> for JsonPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// How a state field such as `InputPath` was declared.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PathSpec {
    /// Field absent or `"$"`: the whole document.
    #[default]
    Root,
    /// Field `null` or `""`: discard.
    Discard,
    /// Any other path.
    At(JsonPath),
}

impl PathSpec {
    /// Builds a spec from an optional path string, where `None` means `null`.
    pub fn parse(raw: Option<&str>) -> Result<Self, PathError> {
        match raw {
            None | Some("") => Ok(PathSpec::Discard),
            Some(raw) => {
                let path: JsonPath = raw.parse()?;
                Ok(if path.is_root() {
                    PathSpec::Root
                } else {
                    PathSpec::At(path)
                })
            }
        }
    }
}

impl<'de> Deserialize<'de> for PathSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        PathSpec::parse(raw.as_deref()).map_err(D::Error::custom)
    }
}

/// Deserializes a path field where absence and `null` must stay distinct.
pub(crate) fn present_path_spec<'de, D>(deserializer: D) -> Result<Option<PathSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    PathSpec::deserialize(deserializer).map(Some)
}
