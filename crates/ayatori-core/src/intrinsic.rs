//! Intrinsic functions usable inside payload templates.
//!
//! A template value such as `"States.Format('Hello {}!', $.name)"` is parsed
//! into a call and evaluated against the current effective input.

use crate::error::{kind_of, names, StatesError};
use crate::path::JsonPath;
use serde_json::{Number, Value};
use std::fmt;
use thiserror::Error;

const PLACEHOLDER: &[u8] = b"{}";
const ESCAPED_PLACEHOLDER: &[u8] = b"\\{}";

/// Errors raised by intrinsic functions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntrinsicError {
    #[error("template has {placeholders} placeholders but {arguments} arguments were given")]
    ArgumentCount { placeholders: usize, arguments: usize },

    #[error("a {0} argument cannot be substituted into a template")]
    StructuredArgument(&'static str),

    #[error("unknown intrinsic function '{0}'")]
    UnknownFunction(String),

    #[error("{function} expects {expected}")]
    InvalidArguments {
        function: &'static str,
        expected: &'static str,
    },

    #[error("syntax error at offset {offset}: {reason}")]
    Syntax { offset: usize, reason: String },

    #[error("path '{path}' failed: {reason}")]
    Path { path: String, reason: String },

    #[error("invalid JSON text: {0}")]
    InvalidJson(String),
}

impl From<IntrinsicError> for StatesError {
    fn from(err: IntrinsicError) -> Self {
        StatesError::new(names::INTRINSIC_FAILURE, err.to_string())
    }
}

/// A value that may be substituted into a format template.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Number(Number),
    Bool(bool),
    Null,
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::String(s) => f.write_str(s),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Null => f.write_str("null"),
        }
    }
}

impl TryFrom<&Value> for Scalar {
    type Error = IntrinsicError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(Scalar::String(s.clone())),
            Value::Number(n) => Ok(Scalar::Number(n.clone())),
            Value::Bool(b) => Ok(Scalar::Bool(*b)),
            Value::Null => Ok(Scalar::Null),
            other => Err(IntrinsicError::StructuredArgument(kind_of(other))),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::String(s)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Number(n.into())
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// Byte offsets of every unescaped `{}` in `template`.
fn placeholder_sites(template: &str) -> Vec<usize> {
    let bytes = template.as_bytes();
    let mut sites = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(ESCAPED_PLACEHOLDER) {
            i += ESCAPED_PLACEHOLDER.len();
        } else if bytes[i..].starts_with(PLACEHOLDER) {
            sites.push(i);
            i += PLACEHOLDER.len();
        } else {
            i += 1;
        }
    }
    sites
}

/// Substitutes `args` into the unescaped `{}` markers of `template`.
///
/// `\{}` is literal text: it is neither consumed nor unescaped.
///
/// ```
/// use ayatori_core::intrinsic::{format, Scalar};
///
/// assert_eq!(format("Hello {}!", &["World".into()]).unwrap(), "Hello World!");
/// assert_eq!(format("a\\{}b{}", &["X".into()]).unwrap(), "a\\{}bX");
/// assert!(format("{} and {}", &[Scalar::from(1)]).is_err());
/// ```
pub fn format(template: &str, args: &[Scalar]) -> Result<String, IntrinsicError> {
    let sites = placeholder_sites(template);
    if sites.len() != args.len() {
        return Err(IntrinsicError::ArgumentCount {
            placeholders: sites.len(),
            arguments: args.len(),
        });
    }

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for (site, arg) in sites.iter().zip(args) {
        out.push_str(&template[last..*site]);
        out.push_str(&arg.to_string());
        last = site + PLACEHOLDER.len();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Parses JSON text into a document.
pub fn string_to_json(text: &str) -> Result<Value, IntrinsicError> {
    serde_json::from_str(text).map_err(|e| IntrinsicError::InvalidJson(e.to_string()))
}

/// Serializes a document into compact JSON text.
pub fn json_to_string(value: &Value) -> Result<String, IntrinsicError> {
    serde_json::to_string(value).map_err(|e| IntrinsicError::InvalidJson(e.to_string()))
}

/// Returns `true` if `text` looks like an intrinsic invocation.
pub fn is_invocation(text: &str) -> bool {
    text.trim_start().starts_with("States.")
}

/// Parses and evaluates an intrinsic invocation against `input`.
///
/// ```
/// use ayatori_core::intrinsic::evaluate;
/// use serde_json::json;
///
/// let input = json!({"name": "Ada", "n": 3});
/// let out = evaluate("States.Format('{} has {} items', $.name, $.n)", &input).unwrap();
/// assert_eq!(out, json!("Ada has 3 items"));
/// ```
pub fn evaluate(expression: &str, input: &Value) -> Result<Value, IntrinsicError> {
    let mut parser = Parser::new(expression);
    let call = parser.call()?;
    parser.skip_whitespace();
    if let Some(found) = parser.peek() {
        return Err(parser.syntax(format!("unexpected '{found}' after call")));
    }
    call.evaluate(input)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Format,
    StringToJson,
    JsonToString,
    Array,
}

impl Function {
    fn lookup(name: &str) -> Result<Self, IntrinsicError> {
        match name {
            "States.Format" => Ok(Function::Format),
            "States.StringToJson" => Ok(Function::StringToJson),
            "States.JsonToString" => Ok(Function::JsonToString),
            "States.Array" => Ok(Function::Array),
            other => Err(IntrinsicError::UnknownFunction(other.to_string())),
        }
    }
}

#[derive(Debug)]
enum Arg {
    Literal(Value),
    Path(JsonPath),
    Call(Call),
}

impl Arg {
    fn evaluate(&self, input: &Value) -> Result<Value, IntrinsicError> {
        match self {
            Arg::Literal(value) => Ok(value.clone()),
            Arg::Path(path) => path.select(input).map_err(|e| IntrinsicError::Path {
                path: path.to_string(),
                reason: e.to_string(),
            }),
            Arg::Call(call) => call.evaluate(input),
        }
    }
}

#[derive(Debug)]
struct Call {
    function: Function,
    args: Vec<Arg>,
}

impl Call {
    fn evaluate(&self, input: &Value) -> Result<Value, IntrinsicError> {
        let args = self
            .args
            .iter()
            .map(|arg| arg.evaluate(input))
            .collect::<Result<Vec<_>, _>>()?;

        match self.function {
            Function::Format => {
                let Some((Value::String(template), rest)) = args.split_first() else {
                    return Err(IntrinsicError::InvalidArguments {
                        function: "States.Format",
                        expected: "a template string followed by scalar arguments",
                    });
                };
                let scalars = rest
                    .iter()
                    .map(Scalar::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                format(template, &scalars).map(Value::String)
            }
            Function::StringToJson => match args.as_slice() {
                [Value::String(text)] => string_to_json(text),
                _ => Err(IntrinsicError::InvalidArguments {
                    function: "States.StringToJson",
                    expected: "exactly one string argument",
                }),
            },
            Function::JsonToString => match args.as_slice() {
                [value] => json_to_string(value).map(Value::String),
                _ => Err(IntrinsicError::InvalidArguments {
                    function: "States.JsonToString",
                    expected: "exactly one argument",
                }),
            },
            Function::Array => Ok(Value::Array(args)),
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn syntax(&self, reason: impl Into<String>) -> IntrinsicError {
        IntrinsicError::Syntax {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn take_while(&mut self, mut keep: impl FnMut(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&mut keep) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn call(&mut self) -> Result<Call, IntrinsicError> {
        self.skip_whitespace();
        let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '.');
        let function = Function::lookup(name)?;

        self.skip_whitespace();
        if self.bump() != Some('(') {
            return Err(self.syntax("expected '('"));
        }

        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(Call { function, args });
        }
        loop {
            args.push(self.arg()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(')') => break,
                Some(found) => return Err(self.syntax(format!("expected ',' or ')', found '{found}'"))),
                None => return Err(self.syntax("unterminated argument list")),
            }
        }
        Ok(Call { function, args })
    }

    fn arg(&mut self) -> Result<Arg, IntrinsicError> {
        self.skip_whitespace();
        match self.peek() {
            Some('\'') => self.string().map(|s| Arg::Literal(Value::String(s))),
            Some('$') => self.path(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some('S') => self.call().map(Arg::Call),
            Some(_) => {
                let word = self.take_while(|c| c.is_ascii_alphabetic());
                match word {
                    "true" => Ok(Arg::Literal(Value::Bool(true))),
                    "false" => Ok(Arg::Literal(Value::Bool(false))),
                    "null" => Ok(Arg::Literal(Value::Null)),
                    other => Err(self.syntax(format!("unexpected token '{other}'"))),
                }
            }
            None => Err(self.syntax("expected an argument")),
        }
    }

    fn string(&mut self) -> Result<String, IntrinsicError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\'') => return Ok(out),
                // Only quote and backslash are unescaped; `\{` stays for `format`.
                Some('\\') => match self.peek() {
                    Some(c @ ('\'' | '\\')) => {
                        self.bump();
                        out.push(c);
                    }
                    _ => out.push('\\'),
                },
                Some(c) => out.push(c),
                None => return Err(self.syntax("unterminated string literal")),
            }
        }
    }

    fn path(&mut self) -> Result<Arg, IntrinsicError> {
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let raw = self.take_while(|c| match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                true
            }
            (Some(_), _) => true,
            (None, '\'' | '"') => {
                quote = Some(c);
                true
            }
            (None, '[') => {
                depth += 1;
                true
            }
            (None, ']') => {
                depth = depth.saturating_sub(1);
                true
            }
            (None, ',' | ')') => depth > 0,
            (None, c) => !c.is_whitespace(),
        });
        raw.parse::<JsonPath>()
            .map(Arg::Path)
            .map_err(|e| IntrinsicError::Path {
                path: raw.to_string(),
                reason: e.to_string(),
            })
    }

    fn number(&mut self) -> Result<Arg, IntrinsicError> {
        let raw = self.take_while(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'));
        match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Number(_)) => Ok(Arg::Literal(value)),
            _ => Err(self.syntax(format!("invalid number '{raw}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_substitutes_left_to_right() {
        let out = format("{}-{}-{}", &["a".into(), 2.into(), true.into()]).unwrap();
        assert_eq!(out, "a-2-true");
        assert_eq!(format("{}", &[Scalar::Null]).unwrap(), "null");
    }

    #[test]
    fn test_format_counts_only_unescaped_markers() {
        assert_eq!(
            format("a\\{}b{}", &[]),
            Err(IntrinsicError::ArgumentCount {
                placeholders: 1,
                arguments: 0
            })
        );
        assert_eq!(format("\\{}", &[]).unwrap(), "\\{}");
        assert_eq!(format("no markers", &[]).unwrap(), "no markers");
    }

    #[test]
    fn test_format_handles_multibyte_text() {
        assert_eq!(format("紡{}ぐ", &["X".into()]).unwrap(), "紡Xぐ");
    }

    #[test]
    fn test_scalar_rejects_structured_values() {
        assert_eq!(
            Scalar::try_from(&json!({"a": 1})),
            Err(IntrinsicError::StructuredArgument("object"))
        );
        assert_eq!(
            Scalar::try_from(&json!([1])),
            Err(IntrinsicError::StructuredArgument("array"))
        );
    }

    #[test]
    fn test_evaluate_rejects_object_argument() {
        let input = json!({"obj": {"a": 1}});
        let err = evaluate("States.Format('{}', $.obj)", &input).unwrap_err();
        assert_eq!(err, IntrinsicError::StructuredArgument("object"));
    }

    #[test]
    fn test_evaluate_nested_calls() {
        let input = json!({"payload": "{\"k\": [1, 2]}"});
        let out = evaluate("States.Array(States.StringToJson($.payload), 'x', -1.5, null)", &input).unwrap();
        assert_eq!(out, json!([{"k": [1, 2]}, "x", -1.5, null]));

        let out = evaluate("States.JsonToString($.payload)", &input).unwrap();
        assert_eq!(out, json!("\"{\\\"k\\\": [1, 2]}\""));
    }

    #[test]
    fn test_evaluate_string_escapes() {
        let out = evaluate("States.Format('it\\'s \\{} {}', 'x')", &json!({})).unwrap();
        assert_eq!(out, json!("it's \\{} x"));
    }

    #[test]
    fn test_evaluate_bracket_path_argument() {
        let input = json!({"a, b": "v"});
        let out = evaluate("States.Format('{}', $['a, b'])", &input).unwrap();
        assert_eq!(out, json!("v"));
    }

    #[test]
    fn test_evaluate_errors() {
        assert!(matches!(
            evaluate("States.Nope()", &json!({})),
            Err(IntrinsicError::UnknownFunction(name)) if name == "States.Nope"
        ));
        assert!(matches!(
            evaluate("States.Array('a'", &json!({})),
            Err(IntrinsicError::Syntax { .. })
        ));
        assert!(matches!(
            evaluate("States.StringToJson(1)", &json!({})),
            Err(IntrinsicError::InvalidArguments { .. })
        ));
        assert!(matches!(
            evaluate("States.Format('{}', $.missing)", &json!({})),
            Err(IntrinsicError::Path { .. })
        ));
    }

    #[test]
    fn test_intrinsic_error_is_classified() {
        let err: StatesError = IntrinsicError::UnknownFunction("x".into()).into();
        assert_eq!(err.name, names::INTRINSIC_FAILURE);
    }
}
