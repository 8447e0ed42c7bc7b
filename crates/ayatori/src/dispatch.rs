//! Task handler registry.

use crate::outcome::Fault;
use ayatori_core::{kind_of, Resource, StatesError, TaskContext, TaskHandler, WorkflowError};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Maps resource types to handlers.
#[derive(Clone, Default)]
pub(crate) struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("TaskRegistry").field("kinds", &kinds).finish()
    }
}

impl TaskRegistry {
    pub(crate) fn insert(&mut self, kind: String, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub(crate) fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Invokes the handler for `resource` exactly once.
    ///
    /// Non-object input and unregistered resource types are fatal. A handler
    /// running past `limit` raises `States.Timeout`.
    pub(crate) async fn invoke(
        &self,
        ctx: &TaskContext,
        resource: &Resource,
        input: Value,
        limit: Option<Duration>,
    ) -> Result<Value, Fault> {
        let input = match input {
            Value::Object(map) => map,
            other => {
                return Err(Fault::Fatal(WorkflowError::InvalidTaskInput {
                    state: ctx.state().clone(),
                    found: kind_of(&other),
                }))
            }
        };
        let handler = self
            .handlers
            .get(resource.kind())
            .ok_or_else(|| WorkflowError::UnknownResource(resource.kind().to_string()))?;

        let call = handler.invoke(ctx, resource.locator(), input);
        let result = match limit {
            Some(limit) => timeout(limit, call).await.map_err(|_| {
                StatesError::timeout(format!(
                    "task '{}' did not finish within {}s",
                    ctx.state(),
                    limit.as_secs()
                ))
            })?,
            None => call.await,
        };
        result.map_err(Fault::States)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ayatori_core::{names, StateName};
    use serde_json::{json, Map};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx() -> TaskContext {
        TaskContext::new(Uuid::new_v4(), StateName::new("T"), CancellationToken::new())
    }

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::default();
        let echo = |locator: &str, input: Map<String, Value>| -> Result<Value, StatesError> {
            Ok(json!({"locator": locator, "input": input}))
        };
        registry.insert("echo".to_string(), Arc::new(echo));
        registry
    }

    #[tokio::test]
    async fn test_dispatch_by_resource_type() {
        let out = registry()
            .invoke(&ctx(), &"echo:greet".parse().unwrap(), json!({"a": 1}), None)
            .await
            .unwrap();
        assert_eq!(out, json!({"locator": "greet", "input": {"a": 1}}));
    }

    #[tokio::test]
    async fn test_non_object_input_is_fatal() {
        let err = registry()
            .invoke(&ctx(), &"echo:x".parse().unwrap(), json!([1]), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Fault::Fatal(WorkflowError::InvalidTaskInput { found: "array", .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_resource_is_fatal() {
        let err = registry()
            .invoke(&ctx(), &"script:run.sh".parse().unwrap(), json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Fault::Fatal(WorkflowError::UnknownResource(kind)) if kind == "script"
        ));
    }

    #[derive(Debug)]
    struct Stall;

    #[async_trait::async_trait]
    impl TaskHandler for Stall {
        async fn invoke(
            &self,
            _ctx: &TaskContext,
            _locator: &str,
            _input: Map<String, Value>,
        ) -> Result<Value, StatesError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_classified() {
        let mut registry = TaskRegistry::default();
        registry.insert("stall".to_string(), Arc::new(Stall));
        let err = registry
            .invoke(
                &ctx(),
                &"stall".parse().unwrap(),
                json!({}),
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Fault::States(e) if e.name == names::TIMEOUT));
    }
}
