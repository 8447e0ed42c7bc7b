//! Per-invocation context handed to task handlers.

use crate::state::StateName;
use std::fmt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a task handler knows about the invocation it serves.
///
/// # Examples
///
/// ```
/// use ayatori_core::{StateName, TaskContext};
/// use tokio_util::sync::CancellationToken;
/// use uuid::Uuid;
///
/// let ctx = TaskContext::new(Uuid::new_v4(), StateName::new("Fetch"), CancellationToken::new());
/// assert_eq!(ctx.state().as_str(), "Fetch");
/// assert!(!ctx.is_cancelled());
/// ```
#[derive(Clone)]
pub struct TaskContext {
    run_id: Uuid,
    state: StateName,
    cancellation: CancellationToken,
}

impl TaskContext {
    /// Creates a new TaskContext.
    pub fn new(run_id: Uuid, state: StateName, cancellation: CancellationToken) -> Self {
        Self {
            run_id,
            state,
            cancellation,
        }
    }

    /// Identifier of the execution frame running the task.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Name of the Task state being evaluated.
    pub fn state(&self) -> &StateName {
        &self.state
    }

    /// The run's cancellation signal.
    ///
    /// Handlers doing long or blocking work should observe it; the engine
    /// does not interrupt a handler that is already running.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `true` once the run has been cancelled or its deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = TaskContext::new(Uuid::new_v4(), "Work".into(), token.child_token());
        assert!(!ctx.is_cancelled());

        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.cancellation().is_cancelled());
    }

    #[test]
    fn test_context_debug() {
        let ctx = TaskContext::new(Uuid::nil(), "Work".into(), CancellationToken::new());
        let debug = format!("{ctx:?}");
        assert!(debug.contains("Work"));
        assert!(debug.contains("cancelled: false"));
    }
}
