//! Run outcomes reported to callers.

use ayatori_core::{names, StatesError, WorkflowError};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Why a run failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// A Fail state was reached.
    Declared {
        error: Option<String>,
        cause: Option<String>,
    },
    /// A classified error was not recovered by any Retry or Catch rule.
    Unhandled(StatesError),
    /// A structural, data or configuration error aborted the run.
    Engine(WorkflowError),
}

impl Failure {
    /// Returns the error name, if the failure carries one.
    pub fn error(&self) -> Option<&str> {
        match self {
            Failure::Declared { error, .. } => error.as_deref(),
            Failure::Unhandled(e) => Some(&e.name),
            Failure::Engine(_) => None,
        }
    }

    /// Returns the human readable cause.
    pub fn cause(&self) -> String {
        match self {
            Failure::Declared { cause, .. } => cause.clone().unwrap_or_default(),
            Failure::Unhandled(e) => e.cause.clone(),
            Failure::Engine(e) => e.to_string(),
        }
    }

    /// Converts a failed sub-workflow branch into what its parent state sees.
    ///
    /// A Fail state becomes a classified error named by its `Error`, or
    /// `States.BranchFailed` if it declares none.
    pub(crate) fn into_branch_fault(self) -> Fault {
        match self {
            Failure::Declared { error, cause } => Fault::States(StatesError::new(
                error.unwrap_or_else(|| names::BRANCH_FAILED.to_string()),
                cause.unwrap_or_default(),
            )),
            Failure::Unhandled(e) => Fault::States(e),
            Failure::Engine(e) => Fault::Fatal(e),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Declared { error, cause } => write!(
                f,
                "{}: {}",
                error.as_deref().unwrap_or("Failed"),
                cause.as_deref().unwrap_or("")
            ),
            Failure::Unhandled(e) => write!(f, "unhandled error {e}"),
            Failure::Engine(e) => write!(f, "{e}"),
        }
    }
}

/// Terminal status of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run reached a Succeed state or a branch end.
    Succeeded(Value),
    /// The run failed.
    Failed(Failure),
    /// The run's cancellation signal fired or its deadline passed.
    Cancelled,
}

impl RunOutcome {
    /// Returns the final document of a successful run.
    pub fn output(&self) -> Option<&Value> {
        match self {
            RunOutcome::Succeeded(output) => Some(output),
            _ => None,
        }
    }

    /// Returns `true` for [`RunOutcome::Succeeded`].
    pub fn is_succeeded(&self) -> bool {
        matches!(self, RunOutcome::Succeeded(_))
    }

    /// Returns `true` for [`RunOutcome::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled)
    }

    /// Returns the failure of a failed run.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            RunOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// The result of [`Engine::execute`](crate::Engine::execute).
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// Identifier of the top-level run.
    pub run_id: Uuid,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Wall time spent in the run.
    pub elapsed: Duration,
}

impl Execution {
    /// Returns the final document of a successful run.
    pub fn output(&self) -> Option<&Value> {
        self.outcome.output()
    }
}

/// Internal reason a state evaluation stopped short.
#[derive(Debug)]
pub(crate) enum Fault {
    /// Offered to Retry and Catch rules.
    States(StatesError),
    /// Ends the run.
    Fatal(WorkflowError),
    Cancelled,
}

impl From<StatesError> for Fault {
    fn from(e: StatesError) -> Self {
        Fault::States(e)
    }
}

impl From<WorkflowError> for Fault {
    fn from(e: WorkflowError) -> Self {
        Fault::Fatal(e)
    }
}

impl From<Fault> for RunOutcome {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::States(e) => RunOutcome::Failed(Failure::Unhandled(e)),
            Fault::Fatal(e) => RunOutcome::Failed(Failure::Engine(e)),
            Fault::Cancelled => RunOutcome::Cancelled,
        }
    }
}
