//! State model: the closed set of state kinds and their bodies.

use crate::choice::ChoiceRule;
use crate::path::{JsonPath, PathSpec};
use crate::payload::Payload;
use crate::retry::{CatchRule, RetryRule};
use crate::workflow::{Definition, Workflow};
use chrono::{DateTime, FixedOffset};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Type-safe state name wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct StateName(String);

impl StateName {
    /// Creates a new StateName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the state name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StateName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StateName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A compiled state.
#[derive(Debug, Clone)]
pub struct State {
    /// Unique name within its workflow.
    pub name: StateName,
    /// Free-form description.
    pub comment: Option<String>,
    /// Static successor.
    pub next: Option<StateName>,
    /// Marks a branch-terminal state.
    pub end: bool,
    /// Type-specific body.
    pub kind: StateKind,
}

impl State {
    /// Creates a state with no transition.
    pub fn new(name: impl Into<StateName>, kind: StateKind) -> Self {
        Self {
            name: name.into(),
            comment: None,
            next: None,
            end: false,
            kind,
        }
    }

    /// Sets the static successor.
    pub fn with_next(mut self, next: impl Into<StateName>) -> Self {
        self.next = Some(next.into());
        self.end = false;
        self
    }

    /// Marks the state as branch-terminal.
    pub fn with_end(mut self) -> Self {
        self.next = None;
        self.end = true;
        self
    }

    /// Returns every state name this state may transition to.
    pub fn targets(&self) -> impl Iterator<Item = &StateName> {
        self.next.iter().chain(self.kind.jump_targets())
    }
}

/// Input and output filters shared by every kind except Fail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IoPaths {
    #[serde(default)]
    pub input_path: PathSpec,
    #[serde(default)]
    pub output_path: PathSpec,
}

/// Ordered `Retry` and `Catch` rule lists.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorPolicy {
    #[serde(default)]
    pub retry: Vec<RetryRule>,
    #[serde(default)]
    pub catch: Vec<CatchRule>,
}

impl ErrorPolicy {
    /// Returns `true` when no rules are declared.
    pub fn is_empty(&self) -> bool {
        self.retry.is_empty() && self.catch.is_empty()
    }
}

/// The eight state kinds, tagged by `Type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Type")]
pub enum StateKind {
    Pass(PassState),
    Task(TaskState),
    Choice(ChoiceState),
    Wait(WaitState),
    Succeed(SucceedState),
    Fail(FailState),
    Parallel(ParallelState),
    Map(MapState),
}

impl StateKind {
    /// Returns the `Type` name.
    pub fn type_name(&self) -> &'static str {
        match self {
            StateKind::Pass(_) => "Pass",
            StateKind::Task(_) => "Task",
            StateKind::Choice(_) => "Choice",
            StateKind::Wait(_) => "Wait",
            StateKind::Succeed(_) => "Succeed",
            StateKind::Fail(_) => "Fail",
            StateKind::Parallel(_) => "Parallel",
            StateKind::Map(_) => "Map",
        }
    }

    /// Returns the input and output filters. Fail states have none.
    pub fn io(&self) -> Option<&IoPaths> {
        match self {
            StateKind::Pass(s) => Some(&s.io),
            StateKind::Task(s) => Some(&s.io),
            StateKind::Choice(s) => Some(&s.io),
            StateKind::Wait(s) => Some(&s.io),
            StateKind::Succeed(s) => Some(&s.io),
            StateKind::Parallel(s) => Some(&s.io),
            StateKind::Map(s) => Some(&s.io),
            StateKind::Fail(_) => None,
        }
    }

    /// Returns the retry and catch rules of Task, Parallel and Map states.
    pub fn error_policy(&self) -> Option<&ErrorPolicy> {
        match self {
            StateKind::Task(s) => Some(&s.policy),
            StateKind::Parallel(s) => Some(&s.policy),
            StateKind::Map(s) => Some(&s.policy),
            _ => None,
        }
    }

    /// Returns `true` for Succeed and Fail, which end a branch on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StateKind::Succeed(_) | StateKind::Fail(_))
    }

    /// Returns `true` if the state picks its successor at run time.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, StateKind::Choice(_))
    }

    /// Targets reached other than through `Next`: Choice rules, `Default`
    /// and Catch rules.
    pub fn jump_targets(&self) -> Box<dyn Iterator<Item = &StateName> + '_> {
        match self {
            StateKind::Choice(choice) => Box::new(
                choice
                    .choices
                    .iter()
                    .map(|rule| &rule.next)
                    .chain(choice.default.iter()),
            ),
            other => match other.error_policy() {
                Some(policy) => Box::new(policy.catch.iter().map(|rule| &rule.next)),
                None => Box::new(std::iter::empty()),
            },
        }
    }
}

/// Passes its input to its output, optionally injecting a fixed result.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PassState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(default)]
    pub parameters: Option<Payload>,
    #[serde(default, deserialize_with = "present_value")]
    pub result: Option<Value>,
    #[serde(default)]
    pub result_path: PathSpec,
}

/// `<type>:<locator>` reference to a task handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    kind: String,
    locator: String,
}

impl Resource {
    /// Creates a resource reference.
    pub fn new(kind: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            locator: locator.into(),
        }
    }

    /// Handler registry key.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Handler-specific locator.
    pub fn locator(&self) -> &str {
        &self.locator
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.locator)
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, locator) = s.split_once(':').unwrap_or((s, ""));
        if kind.is_empty() {
            return Err(format!("resource '{s}' has no type"));
        }
        Ok(Self::new(kind, locator))
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(D::Error::custom)
    }
}

/// Invokes a registered task handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    #[serde(flatten)]
    pub io: IoPaths,
    pub resource: Resource,
    #[serde(default)]
    pub parameters: Option<Payload>,
    #[serde(default)]
    pub result_selector: Option<Payload>,
    #[serde(default)]
    pub result_path: PathSpec,
    #[serde(default)]
    pub timeout_seconds: Option<NonZeroU64>,
    #[serde(flatten)]
    pub policy: ErrorPolicy,
}

impl TaskState {
    /// Creates a task body with default filters and no rules.
    pub fn new(resource: Resource) -> Self {
        Self {
            io: IoPaths::default(),
            resource,
            parameters: None,
            result_selector: None,
            result_path: PathSpec::Root,
            timeout_seconds: None,
            policy: ErrorPolicy::default(),
        }
    }

    /// Per-invocation timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(|s| Duration::from_secs(s.get()))
    }
}

/// Picks a successor from ordered rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceState {
    #[serde(flatten)]
    pub io: IoPaths,
    pub choices: Vec<ChoiceRule>,
    #[serde(default)]
    pub default: Option<StateName>,
}

/// How long a Wait state suspends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "WaitFields")]
pub enum WaitFor {
    Seconds(u64),
    SecondsPath(JsonPath),
    Timestamp(DateTime<FixedOffset>),
    TimestampPath(JsonPath),
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitFields {
    #[serde(default)]
    seconds: Option<u64>,
    #[serde(default)]
    seconds_path: Option<JsonPath>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    timestamp_path: Option<JsonPath>,
}

impl TryFrom<WaitFields> for WaitFor {
    type Error = String;

    fn try_from(fields: WaitFields) -> Result<Self, Self::Error> {
        match fields {
            WaitFields {
                seconds: Some(seconds),
                seconds_path: None,
                timestamp: None,
                timestamp_path: None,
            } => Ok(WaitFor::Seconds(seconds)),
            WaitFields {
                seconds: None,
                seconds_path: Some(path),
                timestamp: None,
                timestamp_path: None,
            } => Ok(WaitFor::SecondsPath(path)),
            WaitFields {
                seconds: None,
                seconds_path: None,
                timestamp: Some(raw),
                timestamp_path: None,
            } => DateTime::parse_from_rfc3339(&raw)
                .map(WaitFor::Timestamp)
                .map_err(|e| format!("invalid Timestamp '{raw}': {e}")),
            WaitFields {
                seconds: None,
                seconds_path: None,
                timestamp: None,
                timestamp_path: Some(path),
            } => Ok(WaitFor::TimestampPath(path)),
            _ => Err(
                "Wait needs exactly one of Seconds, SecondsPath, Timestamp or TimestampPath"
                    .to_string(),
            ),
        }
    }
}

/// Suspends the branch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(flatten)]
    pub wait: WaitFor,
}

/// Ends the branch successfully.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SucceedState {
    #[serde(flatten)]
    pub io: IoPaths,
}

/// Ends the branch with a declared failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailState {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cause: Option<String>,
}

/// Runs independent sub-workflows over the same input.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParallelState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(deserialize_with = "compile_branches")]
    pub branches: Vec<Arc<Workflow>>,
    #[serde(default)]
    pub parameters: Option<Payload>,
    #[serde(default)]
    pub result_selector: Option<Payload>,
    #[serde(default)]
    pub result_path: PathSpec,
    #[serde(flatten)]
    pub policy: ErrorPolicy,
}

/// Runs one sub-workflow per element of a sequence.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(alias = "ItemProcessor", deserialize_with = "compile_branch")]
    pub iterator: Arc<Workflow>,
    #[serde(default)]
    pub items_path: PathSpec,
    /// Zero means unbounded.
    #[serde(default)]
    pub max_concurrency: usize,
    #[serde(default)]
    pub result_selector: Option<Payload>,
    #[serde(default)]
    pub result_path: PathSpec,
    #[serde(flatten)]
    pub policy: ErrorPolicy,
}

/// Keeps an explicit `null` distinct from an absent field.
fn present_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

fn compile_branch<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Arc<Workflow>, D::Error> {
    let definition = Definition::deserialize(deserializer)?;
    Workflow::compile(definition)
        .map(Arc::new)
        .map_err(D::Error::custom)
}

fn compile_branches<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<Arc<Workflow>>, D::Error> {
    Vec::<Definition>::deserialize(deserializer)?
        .into_iter()
        .map(|definition| Workflow::compile(definition).map(Arc::new))
        .collect::<Result<_, _>>()
        .map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kind(value: Value) -> StateKind {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_state_name() {
        let name = StateName::new("test");
        assert_eq!(name.as_str(), "test");

        let name: StateName = "test".into();
        assert_eq!(name.to_string(), "test");
    }

    #[test]
    fn test_resource_splits_on_first_colon() {
        let resource: Resource = "script:/opt/run:fast".parse().unwrap();
        assert_eq!(resource.kind(), "script");
        assert_eq!(resource.locator(), "/opt/run:fast");

        let bare: Resource = "noop".parse().unwrap();
        assert_eq!(bare.locator(), "");
        assert!(":x".parse::<Resource>().is_err());
    }

    #[test]
    fn test_pass_distinguishes_null_result() {
        let StateKind::Pass(pass) = kind(json!({"Type": "Pass", "Result": null})) else {
            panic!("expected Pass");
        };
        assert_eq!(pass.result, Some(Value::Null));

        let StateKind::Pass(pass) = kind(json!({"Type": "Pass"})) else {
            panic!("expected Pass");
        };
        assert_eq!(pass.result, None);
        assert_eq!(pass.io, IoPaths::default());
    }

    #[test]
    fn test_task_body() {
        let StateKind::Task(task) = kind(json!({
            "Type": "Task",
            "Resource": "script:hello.sh",
            "InputPath": "$.in",
            "ResultPath": null,
            "TimeoutSeconds": 5,
            "Retry": [{"ErrorEquals": ["States.ALL"]}],
            "Catch": [{"ErrorEquals": ["States.ALL"], "Next": "Recover"}]
        })) else {
            panic!("expected Task");
        };
        assert_eq!(task.resource, Resource::new("script", "hello.sh"));
        assert_eq!(task.result_path, PathSpec::Discard);
        assert_eq!(task.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(task.policy.retry.len(), 1);
        assert!(matches!(task.io.input_path, PathSpec::At(_)));
    }

    #[test]
    fn test_wait_needs_exactly_one_duration() {
        let StateKind::Wait(wait) = kind(json!({"Type": "Wait", "Seconds": 3})) else {
            panic!("expected Wait");
        };
        assert_eq!(wait.wait, WaitFor::Seconds(3));

        let ts = kind(json!({"Type": "Wait", "Timestamp": "2024-01-01T00:00:00Z"}));
        assert!(matches!(ts, StateKind::Wait(WaitState { wait: WaitFor::Timestamp(_), .. })));

        let both = serde_json::from_value::<StateKind>(
            json!({"Type": "Wait", "Seconds": 3, "SecondsPath": "$.s"}),
        );
        assert!(both.is_err());
        let none = serde_json::from_value::<StateKind>(json!({"Type": "Wait"}));
        assert!(none.is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_value::<StateKind>(json!({"Type": "Sleep"})).is_err());
    }

    #[test]
    fn test_jump_targets() {
        let choice = kind(json!({
            "Type": "Choice",
            "Choices": [{"Variable": "$.x", "IsPresent": true, "Next": "A"}],
            "Default": "B"
        }));
        let targets: Vec<_> = choice.jump_targets().map(StateName::as_str).collect();
        assert_eq!(targets, ["A", "B"]);
        assert!(choice.is_dynamic());

        let fail = kind(json!({"Type": "Fail", "Error": "E"}));
        assert!(fail.is_terminal());
        assert!(fail.io().is_none());
        assert_eq!(fail.jump_targets().count(), 0);
    }
}
