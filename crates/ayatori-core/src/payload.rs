//! Payload templates used by `Parameters` and `ResultSelector`.

use crate::error::{names, StatesError};
use crate::intrinsic;
use crate::path::{JsonPath, PathError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

const DYNAMIC_SUFFIX: &str = ".$";

/// Reasons a payload template is rejected when it is compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("value of '{key}' must be a path or intrinsic string")]
    NotAString { key: String },

    #[error("invalid path '{path}' for '{key}': {source}")]
    InvalidPath {
        key: String,
        path: String,
        source: PathError,
    },

    #[error("value of '{key}' must start with '$' or 'States.', got '{found}'")]
    UnknownForm { key: String, found: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Template {
    Literal(Value),
    Path(JsonPath),
    Intrinsic(String),
    Object(Vec<(String, Template)>),
    Array(Vec<Template>),
}

impl Template {
    fn compile(value: Value) -> Result<Self, TemplateError> {
        match value {
            Value::Object(map) => {
                let mut fields = Vec::with_capacity(map.len());
                for (key, value) in map {
                    match key.strip_suffix(DYNAMIC_SUFFIX) {
                        Some(name) => fields.push((name.to_string(), Self::dynamic(&key, value)?)),
                        None => fields.push((key, Self::compile(value)?)),
                    }
                }
                Ok(Template::Object(fields))
            }
            Value::Array(items) => items
                .into_iter()
                .map(Self::compile)
                .collect::<Result<_, _>>()
                .map(Template::Array),
            literal => Ok(Template::Literal(literal)),
        }
    }

    fn dynamic(key: &str, value: Value) -> Result<Self, TemplateError> {
        let Value::String(raw) = value else {
            return Err(TemplateError::NotAString { key: key.to_string() });
        };
        if raw.starts_with('$') {
            match raw.parse() {
                Ok(path) => Ok(Template::Path(path)),
                Err(source) => Err(TemplateError::InvalidPath {
                    key: key.to_string(),
                    path: raw,
                    source,
                }),
            }
        } else if intrinsic::is_invocation(&raw) {
            Ok(Template::Intrinsic(raw))
        } else {
            Err(TemplateError::UnknownForm {
                key: key.to_string(),
                found: raw,
            })
        }
    }

    fn resolve(&self, input: &Value) -> Result<Value, StatesError> {
        match self {
            Template::Literal(value) => Ok(value.clone()),
            Template::Path(path) => path.select(input).map_err(|e| {
                StatesError::new(
                    names::PARAMETER_PATH_FAILURE,
                    format!("path '{path}' could not be resolved: {e}"),
                )
            }),
            Template::Intrinsic(expression) => {
                intrinsic::evaluate(expression, input).map_err(StatesError::from)
            }
            Template::Object(fields) => {
                let mut out = Map::with_capacity(fields.len());
                for (key, template) in fields {
                    out.insert(key.clone(), template.resolve(input)?);
                }
                Ok(Value::Object(out))
            }
            Template::Array(items) => items
                .iter()
                .map(|item| item.resolve(input))
                .collect::<Result<_, _>>()
                .map(Value::Array),
        }
    }
}

/// A JSON template whose `.$`-suffixed keys are resolved against a document.
///
/// ```
/// use ayatori_core::Payload;
/// use serde_json::json;
///
/// let payload = Payload::new(json!({
///     "greeting.$": "States.Format('Hi {}', $.user.name)",
///     "id.$": "$.user.id",
///     "fixed": [1, 2]
/// }))
/// .unwrap();
///
/// let out = payload.resolve(&json!({"user": {"name": "Ada", "id": 7}})).unwrap();
/// assert_eq!(out, json!({"greeting": "Hi Ada", "id": 7, "fixed": [1, 2]}));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Payload(Template);

impl Payload {
    /// Compiles a template, checking every dynamic field up front.
    pub fn new(template: Value) -> Result<Self, TemplateError> {
        Template::compile(template).map(Self)
    }

    /// Resolves the template against `input`.
    ///
    /// Unresolvable paths raise `States.ParameterPathFailure` and failed
    /// intrinsic calls raise `States.IntrinsicFailure`.
    pub fn resolve(&self, input: &Value) -> Result<Value, StatesError> {
        self.0.resolve(input)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Payload::new(Value::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_templates_resolve() {
        let payload = Payload::new(json!({
            "outer": {"inner.$": "$.a", "keep": true},
            "list": [{"x.$": "$.b"}, 3]
        }))
        .unwrap();
        let out = payload.resolve(&json!({"a": "A", "b": "B"})).unwrap();
        assert_eq!(
            out,
            json!({"outer": {"inner": "A", "keep": true}, "list": [{"x": "B"}, 3]})
        );
    }

    #[test]
    fn test_wildcard_path_yields_array() {
        let payload = Payload::new(json!({"ids.$": "$.items[*].id"})).unwrap();
        let out = payload
            .resolve(&json!({"items": [{"id": 1}, {"id": 2}]}))
            .unwrap();
        assert_eq!(out, json!({"ids": [1, 2]}));
    }

    #[test]
    fn test_invalid_templates_rejected() {
        assert_eq!(
            Payload::new(json!({"a.$": 5})),
            Err(TemplateError::NotAString { key: "a.$".to_string() })
        );
        assert_eq!(
            Payload::new(json!({"nested": {"b.$": "plain"}})),
            Err(TemplateError::UnknownForm {
                key: "b.$".to_string(),
                found: "plain".to_string(),
            })
        );
        assert!(matches!(
            Payload::new(json!({"c.$": "$$"})),
            Err(TemplateError::InvalidPath { ref key, .. }) if key == "c.$"
        ));

        let err = serde_json::from_value::<Payload>(json!({"d.$": true})).unwrap_err();
        assert!(err.to_string().contains("'d.$'"));
    }

    #[test]
    fn test_resolution_failures_are_classified() {
        let missing = Payload::new(json!({"a.$": "$.missing"})).unwrap();
        let err = missing.resolve(&json!({})).unwrap_err();
        assert_eq!(err.name, names::PARAMETER_PATH_FAILURE);

        let bad_call = Payload::new(json!({"a.$": "States.Format('{} {}', 'x')"})).unwrap();
        let err = bad_call.resolve(&json!({})).unwrap_err();
        assert_eq!(err.name, names::INTRINSIC_FAILURE);
    }

    #[test]
    fn test_scalar_template_is_literal() {
        let payload: Payload = serde_json::from_value(json!("constant")).unwrap();
        assert_eq!(payload.resolve(&json!({"x": 1})).unwrap(), json!("constant"));
    }
}
