//! The task handler plugin seam.

use crate::context::TaskContext;
use crate::error::StatesError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Executes the work behind a Task state's resource.
///
/// A handler is registered under a resource type (the part of `Resource`
/// before the first `:`) and receives the rest as `locator`. It is invoked
/// exactly once per attempt; retries are the engine's business.
///
/// Returning a [`StatesError`] makes the failure visible to the state's
/// `Retry` and `Catch` rules under the error's name.
///
/// # Examples
///
/// ```
/// use ayatori_core::{StatesError, TaskContext, TaskHandler};
/// use async_trait::async_trait;
/// use serde_json::{json, Map, Value};
///
/// #[derive(Debug)]
/// struct Greet;
///
/// #[async_trait]
/// impl TaskHandler for Greet {
///     async fn invoke(
///         &self,
///         _ctx: &TaskContext,
///         locator: &str,
///         input: Map<String, Value>,
///     ) -> Result<Value, StatesError> {
///         let name = input
///             .get("name")
///             .and_then(Value::as_str)
///             .ok_or_else(|| StatesError::new("Greet.MissingName", "no name"))?;
///         Ok(json!(format!("{locator}, {name}")))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Runs one invocation.
    async fn invoke(
        &self,
        ctx: &TaskContext,
        locator: &str,
        input: Map<String, Value>,
    ) -> Result<Value, StatesError>;
}

#[async_trait]
impl<F> TaskHandler for F
where
    F: Fn(&str, Map<String, Value>) -> Result<Value, StatesError> + Send + Sync,
{
    async fn invoke(
        &self,
        _ctx: &TaskContext,
        locator: &str,
        input: Map<String, Value>,
    ) -> Result<Value, StatesError> {
        self(locator, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateName;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_closure_handler() {
        let handler = |locator: &str, input: Map<String, Value>| -> Result<Value, StatesError> {
            Ok(json!({"locator": locator, "keys": input.len()}))
        };
        let ctx = TaskContext::new(Uuid::new_v4(), StateName::new("T"), CancellationToken::new());

        let mut input = Map::new();
        input.insert("a".to_string(), json!(1));
        let out = handler.invoke(&ctx, "echo", input).await.unwrap();
        assert_eq!(out, json!({"locator": "echo", "keys": 1}));
    }
}
