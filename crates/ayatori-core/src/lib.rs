//! Core types for the ayatori state-machine engine.
//!
//! This crate holds everything that does not need an async runtime: the
//! state model, the definition compiler, the data filters and the rule
//! types. Handler authors depend on it to implement [`TaskHandler`].
//!
//! # Core Types
//!
//! - [`Workflow`] - A compiled, immutable workflow
//! - [`State`] / [`StateKind`] - The eight state kinds
//! - [`TaskHandler`] - Plugin trait for Task resources
//! - [`StatesError`] - Classified errors seen by Retry and Catch
//! - [`WorkflowError`] - Fatal structural and data errors
//!
//! # Data Flow Helpers
//!
//! - [`filter`] - `InputPath`, `ResultPath` and `OutputPath`
//! - [`Payload`] - `Parameters` and `ResultSelector` templates
//! - [`intrinsic`] - `States.Format` and friends

pub mod choice;
mod context;
mod error;
pub mod filter;
pub mod intrinsic;
mod path;
mod payload;
mod retry;
mod state;
mod traits;
mod workflow;

pub use choice::{ChoiceRule, Condition, StringPattern};
pub use context::TaskContext;
pub use error::{kind_of, names, StatesError, WorkflowError};
pub use intrinsic::{IntrinsicError, Scalar};
pub use path::{JsonPath, PathError, PathSpec};
pub use payload::{Payload, TemplateError};
pub use retry::{first_match, CatchRule, ErrorRule, RetryRule, RetryRuleError};
pub use state::{
    ChoiceState, ErrorPolicy, FailState, IoPaths, MapState, ParallelState, PassState, Resource,
    State, StateKind, StateName, SucceedState, TaskState, WaitFor, WaitState,
};
pub use traits::TaskHandler;
pub use workflow::{Definition, Position, StateDefinition, Workflow};
