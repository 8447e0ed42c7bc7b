//! Workflow error types.

use crate::state::StateName;
use serde_json::{json, Value};
use thiserror::Error;

/// Well-known error names used in `ErrorEquals` lists.
pub mod names {
    /// Wildcard matching any error name.
    pub const ALL: &str = "States.ALL";
    /// A task ran longer than its `TimeoutSeconds`.
    pub const TIMEOUT: &str = "States.Timeout";
    /// A task handler failed without naming an error.
    pub const TASK_FAILED: &str = "States.TaskFailed";
    /// A Parallel or Map branch ended in an unnamed failure.
    pub const BRANCH_FAILED: &str = "States.BranchFailed";
    /// A Choice state found no matching rule and has no `Default`.
    pub const NO_CHOICE_MATCHED: &str = "States.NoChoiceMatched";
    /// An intrinsic function call failed.
    pub const INTRINSIC_FAILURE: &str = "States.IntrinsicFailure";
    /// A `Parameters` or `ResultSelector` path could not be resolved.
    pub const PARAMETER_PATH_FAILURE: &str = "States.ParameterPathFailure";
    /// Catch-all for runtime failures with no better name.
    pub const RUNTIME: &str = "States.Runtime";
}

/// A classified failure raised while evaluating a state body.
///
/// The `name` is what `Retry` and `Catch` rules match against; the `cause`
/// is carried along for diagnostics and written into catch results.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}: {cause}")]
pub struct StatesError {
    /// Error name matched by `ErrorEquals`.
    pub name: String,
    /// Human readable cause.
    pub cause: String,
}

impl StatesError {
    /// Creates a classified error with an explicit name.
    pub fn new(name: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cause: cause.into(),
        }
    }

    /// Creates a `States.TaskFailed` error.
    pub fn task_failed(cause: impl Into<String>) -> Self {
        Self::new(names::TASK_FAILED, cause)
    }

    /// Creates a `States.Timeout` error.
    pub fn timeout(cause: impl Into<String>) -> Self {
        Self::new(names::TIMEOUT, cause)
    }

    /// Returns the fault details document written by catch rules.
    ///
    /// ```
    /// use ayatori_core::StatesError;
    /// use serde_json::json;
    ///
    /// let err = StatesError::new("Custom.Error", "boom");
    /// assert_eq!(err.to_value(), json!({"Error": "Custom.Error", "Cause": "boom"}));
    /// ```
    pub fn to_value(&self) -> Value {
        json!({
            "Error": self.name,
            "Cause": self.cause,
        })
    }
}

/// Errors that abort a run outright.
///
/// These cover malformed compiled workflows, malformed documents and engine
/// misconfiguration. They are never offered to `Retry` or `Catch` rules.
///
/// # Non-Exhaustive
///
/// Always include a wildcard arm when matching on this enum.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A transition names a state that is not in the index.
    #[error("State not found: {0}")]
    StateNotFound(StateName),

    /// `StartAt` does not name a state.
    #[error("Invalid start state: {0}")]
    InvalidStartAt(StateName),

    /// Two states in the same scope share a name.
    #[error("Duplicate state name: {0}")]
    DuplicateState(StateName),

    /// The definition could not be compiled.
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// A path could not be parsed or applied to a document.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        /// The path text.
        path: String,
        /// Why it failed.
        reason: String,
    },

    /// A document is not well-formed JSON or has the wrong shape.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// No task handler is registered for a resource type.
    #[error("No task handler registered for resource type '{0}'")]
    UnknownResource(String),

    /// Task input was not a JSON object.
    #[error("Task input for state '{state}' must be an object, got {found}")]
    InvalidTaskInput {
        /// The task state.
        state: StateName,
        /// JSON kind that was found instead.
        found: &'static str,
    },

    /// A Parallel or Map branch task could not be joined.
    #[error("Branch of state '{state}' aborted: {details}")]
    BranchAborted {
        /// The Parallel or Map state.
        state: StateName,
        /// Join failure details.
        details: String,
    },

    /// The engine configuration is invalid.
    #[error("Invalid engine configuration: {0}")]
    Configuration(String),
}

/// Returns a short name for the JSON kind of `value`.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
