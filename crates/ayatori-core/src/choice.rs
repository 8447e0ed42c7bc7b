//! Choice rules and the condition language they are written in.

use crate::error::{kind_of, WorkflowError};
use crate::path::JsonPath;
use crate::state::StateName;
use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// The five ordering comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    LessThan,
    GreaterThan,
    LessThanEquals,
    GreaterThanEquals,
}

impl Comparison {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "Equals" => Some(Comparison::Equals),
            "LessThan" => Some(Comparison::LessThan),
            "GreaterThan" => Some(Comparison::GreaterThan),
            "LessThanEquals" => Some(Comparison::LessThanEquals),
            "GreaterThanEquals" => Some(Comparison::GreaterThanEquals),
            _ => None,
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Equals => ordering == Ordering::Equal,
            Comparison::LessThan => ordering == Ordering::Less,
            Comparison::GreaterThan => ordering == Ordering::Greater,
            Comparison::LessThanEquals => ordering != Ordering::Greater,
            Comparison::GreaterThanEquals => ordering != Ordering::Less,
        }
    }
}

/// What a comparison operator interprets its operands as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    String,
    Numeric,
    Timestamp,
}

impl Operand {
    fn compare(self, left: &Value, right: &Value) -> Option<Ordering> {
        match (self, left, right) {
            (Operand::String, Value::String(l), Value::String(r)) => Some(l.cmp(r)),
            (Operand::Numeric, Value::Number(l), Value::Number(r)) => {
                l.as_f64()?.partial_cmp(&r.as_f64()?)
            }
            (Operand::Timestamp, Value::String(l), Value::String(r)) => {
                Some(timestamp(l)?.cmp(&timestamp(r)?))
            }
            _ => None,
        }
    }

    fn accepts_literal(self, value: &Value) -> bool {
        match (self, value) {
            (Operand::String, Value::String(_)) | (Operand::Numeric, Value::Number(_)) => true,
            (Operand::Timestamp, Value::String(s)) => timestamp(s).is_some(),
            _ => false,
        }
    }
}

fn timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

/// The right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Against {
    Literal(Value),
    Path(JsonPath),
}

impl Against {
    fn resolve<'a>(&'a self, input: &'a Value) -> Result<&'a Value, WorkflowError> {
        match self {
            Against::Literal(value) => Ok(value),
            Against::Path(path) => path.query_one(input).map_err(|e| e.at(path)),
        }
    }
}

/// JSON kind checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCheck {
    IsNull,
    IsNumeric,
    IsString,
    IsBoolean,
    IsTimestamp,
}

impl TypeCheck {
    fn holds(self, value: &Value) -> bool {
        match self {
            TypeCheck::IsNull => value.is_null(),
            TypeCheck::IsNumeric => value.is_number(),
            TypeCheck::IsString => value.is_string(),
            TypeCheck::IsBoolean => value.is_boolean(),
            TypeCheck::IsTimestamp => value.as_str().and_then(timestamp).is_some(),
        }
    }
}

/// A single test applied to a `Variable`.
#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    Compare {
        operand: Operand,
        comparison: Comparison,
        against: Against,
    },
    StringMatches(StringPattern),
    BooleanEquals(Against),
    IsPresent(bool),
    Is(TypeCheck, bool),
}

/// A boolean condition over the state's effective input.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Variable { variable: JsonPath, test: Test },
}

impl Condition {
    /// Evaluates the condition against `input`.
    ///
    /// Type-mismatched comparisons are false. A `Variable` (or `...Path`
    /// operand) that selects nothing is an error, except under `IsPresent`.
    pub fn evaluate(&self, input: &Value) -> Result<bool, WorkflowError> {
        match self {
            Condition::And(all) => {
                for condition in all {
                    if !condition.evaluate(input)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or(any) => {
                for condition in any {
                    if condition.evaluate(input)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(inner) => Ok(!inner.evaluate(input)?),
            Condition::Variable { variable, test } => {
                if let Test::IsPresent(expected) = test {
                    return Ok(!variable.query(input).is_empty() == *expected);
                }
                let value = variable.query_one(input).map_err(|e| e.at(variable))?;
                test.apply(value, input)
            }
        }
    }

    fn parse(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(format!("condition must be an object, got {}", kind_of(&other))),
        }
    }

    fn from_map(mut map: Map<String, Value>) -> Result<Self, String> {
        map.remove("Comment");

        if let Some(all) = map.remove("And") {
            return Self::parse_list(all, "And").map(Condition::And);
        }
        if let Some(any) = map.remove("Or") {
            return Self::parse_list(any, "Or").map(Condition::Or);
        }
        if let Some(inner) = map.remove("Not") {
            return Self::parse(inner).map(|c| Condition::Not(Box::new(c)));
        }

        let variable = match map.remove("Variable") {
            Some(Value::String(raw)) => raw
                .parse::<JsonPath>()
                .map_err(|e| format!("invalid Variable '{raw}': {e}"))?,
            Some(other) => return Err(format!("Variable must be a string, got {}", kind_of(&other))),
            None => return Err("condition needs Variable, And, Or or Not".to_string()),
        };

        let mut operators = map.into_iter();
        let (operator, operand) = match (operators.next(), operators.next()) {
            (Some(pair), None) => pair,
            (None, _) => return Err(format!("condition on {variable} has no operator")),
            (Some(_), Some(_)) => {
                return Err(format!("condition on {variable} has more than one operator"))
            }
        };
        let test = Test::parse(&operator, operand)?;
        Ok(Condition::Variable { variable, test })
    }

    fn parse_list(value: Value, operator: &str) -> Result<Vec<Self>, String> {
        match value {
            Value::Array(items) if !items.is_empty() => {
                items.into_iter().map(Self::parse).collect()
            }
            _ => Err(format!("{operator} must be a non-empty array")),
        }
    }
}

impl Test {
    fn apply(&self, value: &Value, input: &Value) -> Result<bool, WorkflowError> {
        Ok(match self {
            Test::Compare {
                operand,
                comparison,
                against,
            } => {
                let other = against.resolve(input)?;
                operand
                    .compare(value, other)
                    .is_some_and(|ordering| comparison.holds(ordering))
            }
            Test::StringMatches(pattern) => value
                .as_str()
                .is_some_and(|text| pattern.is_match(text)),
            Test::BooleanEquals(against) => {
                let other = against.resolve(input)?;
                matches!((value, other), (Value::Bool(l), Value::Bool(r)) if l == r)
            }
            Test::IsPresent(expected) => *expected,
            Test::Is(check, expected) => check.holds(value) == *expected,
        })
    }

    fn parse(operator: &str, operand: Value) -> Result<Self, String> {
        let flag = |operand: &Value| {
            operand
                .as_bool()
                .ok_or_else(|| format!("{operator} expects a boolean"))
        };
        let type_check = match operator {
            "IsPresent" => return flag(&operand).map(Test::IsPresent),
            "IsNull" => Some(TypeCheck::IsNull),
            "IsNumeric" => Some(TypeCheck::IsNumeric),
            "IsString" => Some(TypeCheck::IsString),
            "IsBoolean" => Some(TypeCheck::IsBoolean),
            "IsTimestamp" => Some(TypeCheck::IsTimestamp),
            _ => None,
        };
        if let Some(check) = type_check {
            return flag(&operand).map(|expected| Test::Is(check, expected));
        }

        if operator == "StringMatches" {
            return match operand {
                Value::String(pattern) => StringPattern::new(pattern).map(Test::StringMatches),
                _ => Err("StringMatches expects a string pattern".to_string()),
            };
        }

        let (base, by_path) = match operator.strip_suffix("Path") {
            Some(base) => (base, true),
            None => (operator, false),
        };
        let against = if by_path {
            match operand {
                Value::String(raw) => Against::Path(
                    raw.parse()
                        .map_err(|e| format!("invalid {operator} '{raw}': {e}"))?,
                ),
                _ => return Err(format!("{operator} expects a path string")),
            }
        } else {
            Against::Literal(operand)
        };

        if base == "BooleanEquals" {
            if let Against::Literal(ref literal) = against {
                if !literal.is_boolean() {
                    return Err("BooleanEquals expects a boolean".to_string());
                }
            }
            return Ok(Test::BooleanEquals(against));
        }

        let (operand_kind, suffix) = [
            ("String", Operand::String),
            ("Numeric", Operand::Numeric),
            ("Timestamp", Operand::Timestamp),
        ]
        .into_iter()
        .find_map(|(prefix, kind)| base.strip_prefix(prefix).map(|suffix| (kind, suffix)))
        .ok_or_else(|| format!("unknown choice operator '{operator}'"))?;
        let comparison = Comparison::from_suffix(suffix)
            .ok_or_else(|| format!("unknown choice operator '{operator}'"))?;

        if let Against::Literal(ref literal) = against {
            if !operand_kind.accepts_literal(literal) {
                return Err(format!(
                    "{operator} cannot compare against a {}",
                    kind_of(literal)
                ));
            }
        }

        Ok(Test::Compare {
            operand: operand_kind,
            comparison,
            against,
        })
    }
}

/// A `StringMatches` pattern: `*` matches any run of characters and `\*`
/// matches a literal asterisk.
#[derive(Debug, Clone)]
pub struct StringPattern {
    source: String,
    regex: Regex,
}

impl StringPattern {
    /// Compiles `source` into an anchored regular expression.
    pub fn new(source: impl Into<String>) -> Result<Self, String> {
        let source = source.into();
        let mut expression = String::with_capacity(source.len() + 8);
        expression.push_str("^(?s:");
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&'*') => {
                    chars.next();
                    literal.push('*');
                }
                '*' => {
                    expression.push_str(&regex::escape(&literal));
                    literal.clear();
                    expression.push_str(".*");
                }
                other => literal.push(other),
            }
        }
        expression.push_str(&regex::escape(&literal));
        expression.push_str(")$");

        let regex = Regex::new(&expression)
            .map_err(|e| format!("invalid StringMatches pattern '{source}': {e}"))?;
        Ok(Self { source, regex })
    }

    /// Returns the pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` if the whole of `text` matches.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for StringPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// A top-level Choice rule: a condition and the state to go to when it holds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct ChoiceRule {
    pub condition: Condition,
    pub next: StateName,
}

impl TryFrom<Map<String, Value>> for ChoiceRule {
    type Error = String;

    fn try_from(mut map: Map<String, Value>) -> Result<Self, Self::Error> {
        let next = match map.remove("Next") {
            Some(Value::String(next)) => StateName::new(next),
            _ => return Err("choice rule needs a string Next".to_string()),
        };
        let condition = Condition::from_map(map)?;
        Ok(Self { condition, next })
    }
}

/// Returns the successor chosen by the first rule whose condition holds,
/// falling back to `default`. `None` means nothing matched.
pub fn select<'a>(
    rules: &'a [ChoiceRule],
    default: Option<&'a StateName>,
    input: &Value,
) -> Result<Option<&'a StateName>, WorkflowError> {
    for rule in rules {
        if rule.condition.evaluate(input)? {
            return Ok(Some(&rule.next));
        }
    }
    Ok(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(value: Value) -> ChoiceRule {
        serde_json::from_value(value).unwrap()
    }

    fn holds(condition: Value, input: Value) -> bool {
        let mut condition = condition;
        condition["Next"] = json!("N");
        rule(condition).condition.evaluate(&input).unwrap()
    }

    #[test]
    fn test_comparisons() {
        let input = json!({"n": 5, "s": "beta", "t": "2024-05-01T10:00:00Z"});
        assert!(holds(json!({"Variable": "$.n", "NumericEquals": 5}), input.clone()));
        assert!(holds(json!({"Variable": "$.n", "NumericGreaterThanEquals": 5.0}), input.clone()));
        assert!(!holds(json!({"Variable": "$.n", "NumericLessThan": 5}), input.clone()));
        assert!(holds(json!({"Variable": "$.s", "StringGreaterThan": "alpha"}), input.clone()));
        assert!(holds(
            json!({"Variable": "$.t", "TimestampLessThan": "2024-05-01T12:00:00+01:00"}),
            input.clone()
        ));
        assert!(holds(
            json!({"Variable": "$.t", "TimestampEquals": "2024-05-01T11:00:00+01:00"}),
            input
        ));
    }

    #[test]
    fn test_type_mismatch_is_false() {
        let input = json!({"n": "5"});
        assert!(!holds(json!({"Variable": "$.n", "NumericEquals": 5}), input.clone()));
        assert!(!holds(json!({"Variable": "$.n", "BooleanEquals": true}), input));
    }

    #[test]
    fn test_path_operands() {
        let input = json!({"a": 3, "b": 3, "flag": true, "expected": true});
        assert!(holds(json!({"Variable": "$.a", "NumericEqualsPath": "$.b"}), input.clone()));
        assert!(holds(json!({"Variable": "$.flag", "BooleanEqualsPath": "$.expected"}), input));
    }

    #[test]
    fn test_type_checks_and_presence() {
        let input = json!({"nothing": null, "when": "2024-01-01T00:00:00Z"});
        assert!(holds(json!({"Variable": "$.nothing", "IsNull": true}), input.clone()));
        assert!(holds(json!({"Variable": "$.when", "IsTimestamp": true}), input.clone()));
        assert!(holds(json!({"Variable": "$.when", "IsNumeric": false}), input.clone()));
        assert!(holds(json!({"Variable": "$.gone", "IsPresent": false}), input.clone()));
        assert!(!holds(json!({"Variable": "$.when", "IsPresent": false}), input));
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let condition = rule(json!({"Variable": "$.gone", "StringEquals": "x", "Next": "N"}));
        assert!(matches!(
            condition.condition.evaluate(&json!({})),
            Err(WorkflowError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_boolean_combinators() {
        let input = json!({"n": 7, "s": "x"});
        assert!(holds(
            json!({"And": [
                {"Variable": "$.n", "NumericGreaterThan": 5},
                {"Not": {"Variable": "$.s", "StringEquals": "y"}}
            ]}),
            input.clone()
        ));
        assert!(!holds(
            json!({"Or": [
                {"Variable": "$.n", "NumericLessThan": 5},
                {"Variable": "$.s", "StringEquals": "y"}
            ]}),
            input
        ));
    }

    #[test]
    fn test_string_matches() {
        let matches = |pattern: &str, text: &str| StringPattern::new(pattern).unwrap().is_match(text);
        assert!(matches("log-*.txt", "log-2024.txt"));
        assert!(matches("*", ""));
        assert!(matches("a*b*c", "aXXbYYc"));
        assert!(!matches("a*b", "aXXc"));
        assert!(matches("star\\*", "star*"));
        assert!(!matches("star\\*", "starry"));
        assert!(matches("1+1=(2)?", "1+1=(2)?"));
        assert!(!matches("1+1", "11"));
        assert!(matches("multi*line", "multi\nline"));
        assert!(holds(
            json!({"Variable": "$.f", "StringMatches": "*.csv"}),
            json!({"f": "data.csv"})
        ));
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let bad = [
            json!({"Variable": "$.a", "Next": "N"}),
            json!({"Variable": "$.a", "StringEquals": "x", "IsNull": true, "Next": "N"}),
            json!({"Variable": "$.a", "NumericEquals": "x", "Next": "N"}),
            json!({"Variable": "$.a", "StringSounds": "x", "Next": "N"}),
            json!({"Variable": "$.a", "IsNull": true}),
            json!({"And": [], "Next": "N"}),
        ];
        for value in bad {
            assert!(serde_json::from_value::<ChoiceRule>(value.clone()).is_err(), "{value}");
        }
    }

    #[test]
    fn test_select_first_match_then_default() {
        let rules = vec![
            rule(json!({"Variable": "$.n", "NumericGreaterThan": 10, "Next": "Big"})),
            rule(json!({"Variable": "$.n", "NumericGreaterThan": 0, "Next": "Positive"})),
        ];
        let default = StateName::new("Other");
        let pick = |n: i64| {
            select(&rules, Some(&default), &json!({"n": n}))
                .unwrap()
                .map(|name| name.as_str().to_string())
        };
        assert_eq!(pick(50).as_deref(), Some("Big"));
        assert_eq!(pick(5).as_deref(), Some("Positive"));
        assert_eq!(pick(-1).as_deref(), Some("Other"));
        assert_eq!(select(&rules, None, &json!({"n": -1})).unwrap(), None);
    }
}
