//! An embeddable executor for JSON state-machine workflows.
//!
//! A workflow definition names a start state and a set of states (Pass,
//! Task, Choice, Wait, Succeed, Fail, Parallel and Map). Task states call
//! into handlers registered on the [`Engine`]; everything else is driven by
//! the definition alone.
//!
//! # Example
//!
//! ```rust,ignore
//! use ayatori::prelude::*;
//! use serde_json::{json, Map, Value};
//! use std::sync::Arc;
//!
//! fn greet(_locator: &str, input: Map<String, Value>) -> Result<Value, StatesError> {
//!     Ok(json!({ "greeting": format!("hello {}", input["name"]) }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WorkflowError> {
//!     let workflow = Arc::new(Workflow::from_json(r#"{
//!         "StartAt": "Greet",
//!         "States": {
//!             "Greet": { "Type": "Task", "Resource": "fn:greet", "ResultPath": "$.out", "End": true }
//!         }
//!     }"#)?);
//!
//!     let engine = Engine::builder().register("fn", greet).build()?;
//!     let execution = engine.execute(workflow, json!({ "name": "ayatori" })).await;
//!     println!("{:?}", execution.output());
//!     Ok(())
//! }
//! ```

mod compose;
mod dispatch;
mod engine;
mod outcome;
mod policy;
mod wait;
mod walker;

// Re-export core types
pub use ayatori_core::*;

pub use engine::{Engine, EngineBuilder, EngineConfig};
pub use outcome::{Execution, Failure, RunOutcome};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        names, Engine, EngineBuilder, EngineConfig, Execution, Failure, RunOutcome, StatesError,
        TaskContext, TaskHandler, Workflow, WorkflowError,
    };
}
