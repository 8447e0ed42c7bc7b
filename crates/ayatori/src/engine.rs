//! Engine construction and the caller-facing execute calls.

use crate::dispatch::TaskRegistry;
use crate::outcome::{Execution, Failure, RunOutcome};
use crate::walker::Frame;
use ayatori_core::{TaskHandler, Workflow, WorkflowError};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Engine-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Run deadline used when a workflow declares no `TimeoutSeconds`.
    pub default_timeout: Option<Duration>,
    /// Concurrency cap for Map states that declare no `MaxConcurrency`.
    pub max_concurrency: Option<usize>,
}

/// Executes compiled workflows.
///
/// Cheap to clone; clones share the handler registry.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) registry: TaskRegistry,
    pub(crate) config: EngineConfig,
    span: Option<Span>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Engine {
    /// Creates a new engine builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Returns `true` if a handler is registered for `kind`.
    pub fn has_handler(&self, kind: &str) -> bool {
        self.inner.registry.contains(kind)
    }

    pub(crate) fn inner(&self) -> &EngineInner {
        &self.inner
    }

    /// Runs `workflow` against `input` until it succeeds, fails or is
    /// cancelled by its deadline.
    ///
    /// A `null` input is treated as an empty object.
    pub async fn execute(&self, workflow: Arc<Workflow>, input: Value) -> Execution {
        self.execute_with_cancellation(workflow, input, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but parses `input` first.
    ///
    /// Blank input is an empty object. Malformed JSON fails the run with an
    /// [`WorkflowError::InvalidDocument`] error.
    pub async fn execute_json(&self, workflow: Arc<Workflow>, input: &str) -> Execution {
        let document = if input.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            match serde_json::from_str(input) {
                Ok(document) => document,
                Err(e) => {
                    warn!(error = %e, "rejected malformed input document");
                    return Execution {
                        run_id: Uuid::new_v4(),
                        outcome: RunOutcome::Failed(Failure::Engine(
                            WorkflowError::InvalidDocument(e.to_string()),
                        )),
                        elapsed: Duration::ZERO,
                    };
                }
            }
        };
        self.execute(workflow, document).await
    }

    /// Like [`execute`](Self::execute), but the run also stops when `token`
    /// is cancelled.
    ///
    /// The deadline never cancels the caller's token; the run observes a
    /// child of it.
    pub async fn execute_with_cancellation(
        &self,
        workflow: Arc<Workflow>,
        input: Value,
        token: CancellationToken,
    ) -> Execution {
        let started = Instant::now();
        let input = match input {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let frame = Frame::new(workflow, input, token.child_token());
        let run_id = frame.run_id;
        let span = match &self.inner.span {
            Some(parent) => info_span!(parent: parent, "run", run_id = %run_id),
            None => info_span!("run", run_id = %run_id),
        };

        let deadline = frame
            .workflow
            .timeout()
            .or(self.inner.config.default_timeout);
        let timer = deadline.map(|limit| {
            let token = frame.token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                token.cancel();
            })
        });

        let outcome = async {
            info!(start_at = %frame.workflow.start_at(), "run started");
            let outcome = self.run_frame(frame).await;
            match &outcome {
                RunOutcome::Succeeded(_) => info!("run succeeded"),
                RunOutcome::Failed(failure) => warn!(%failure, "run failed"),
                RunOutcome::Cancelled => warn!("run cancelled"),
            }
            outcome
        }
        .instrument(span)
        .await;

        if let Some(timer) = timer {
            timer.abort();
        }
        Execution {
            run_id,
            outcome,
            elapsed: started.elapsed(),
        }
    }
}

/// Builder for constructing [`Engine`] instances.
#[derive(Default)]
pub struct EngineBuilder {
    registry: TaskRegistry,
    config: EngineConfig,
    span: Option<Span>,
}

impl EngineBuilder {
    /// Creates a new builder with no handlers and default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for Task resources of type `kind`.
    ///
    /// A later registration for the same type replaces the earlier one.
    pub fn register<H: TaskHandler + 'static>(self, kind: impl Into<String>, handler: H) -> Self {
        self.register_arc(kind, Arc::new(handler))
    }

    /// Registers a shared handler.
    pub fn register_arc(mut self, kind: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.registry.insert(kind.into(), handler);
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the deadline for workflows that declare none.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    /// Caps concurrently running iterations of each Map state.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = Some(limit);
        self
    }

    /// Parents every run span under `span` instead of the caller's current span.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Builds the engine.
    pub fn build(self) -> Result<Engine, WorkflowError> {
        if self.config.max_concurrency == Some(0) {
            return Err(WorkflowError::Configuration(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.config.default_timeout == Some(Duration::ZERO) {
            return Err(WorkflowError::Configuration(
                "default_timeout must be greater than 0".to_string(),
            ));
        }
        if self.registry.contains("") {
            return Err(WorkflowError::Configuration(
                "resource type must not be empty".to_string(),
            ));
        }

        Ok(Engine {
            inner: Arc::new(EngineInner {
                registry: self.registry,
                config: self.config,
                span: self.span,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ayatori_core::StatesError;
    use serde_json::json;

    fn echo(_locator: &str, input: Map<String, Value>) -> Result<Value, StatesError> {
        Ok(Value::Object(input))
    }

    #[test]
    fn test_builder_validation() {
        let result = Engine::builder().max_concurrency(0).build();
        assert!(matches!(result, Err(WorkflowError::Configuration(_))));

        let result = Engine::builder().default_timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(WorkflowError::Configuration(_))));

        let result = Engine::builder().register("", echo).build();
        assert!(matches!(result, Err(WorkflowError::Configuration(_))));
    }

    #[test]
    fn test_builder_registers_handlers() {
        let engine = Engine::builder()
            .register("echo", echo)
            .config(EngineConfig {
                default_timeout: Some(Duration::from_secs(60)),
                max_concurrency: Some(4),
            })
            .build()
            .unwrap();
        assert!(engine.has_handler("echo"));
        assert!(!engine.has_handler("script"));
        assert_eq!(engine.config().max_concurrency, Some(4));
    }

    #[tokio::test]
    async fn test_execute_json_input_forms() {
        let engine = Engine::builder().build().unwrap();
        let workflow = Arc::new(
            Workflow::from_json(r#"{"StartAt": "P", "States": {"P": {"Type": "Pass", "End": true}}}"#)
                .unwrap(),
        );

        let blank = engine.execute_json(Arc::clone(&workflow), "  ").await;
        assert_eq!(blank.output(), Some(&json!({})));

        let parsed = engine.execute_json(Arc::clone(&workflow), r#"{"k": 1}"#).await;
        assert_eq!(parsed.output(), Some(&json!({"k": 1})));

        let malformed = engine.execute_json(workflow, "{nope").await;
        assert!(matches!(
            malformed.outcome,
            RunOutcome::Failed(Failure::Engine(WorkflowError::InvalidDocument(_)))
        ));
    }

    #[tokio::test]
    async fn test_caller_cancellation() {
        let engine = Engine::builder().build().unwrap();
        let workflow = Arc::new(
            Workflow::from_json(r#"{"StartAt": "P", "States": {"P": {"Type": "Pass", "End": true}}}"#)
                .unwrap(),
        );
        let token = CancellationToken::new();
        token.cancel();
        let execution = engine
            .execute_with_cancellation(workflow, json!({}), token)
            .await;
        assert!(execution.outcome.is_cancelled());
    }
}
