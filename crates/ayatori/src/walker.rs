//! The branch walker: steps one execution frame through its workflow.

use crate::engine::Engine;
use crate::outcome::{Failure, Fault, RunOutcome};
use crate::wait;
use ayatori_core::filter::{filter_input, filter_output, merge_result};
use ayatori_core::{
    choice, names, Payload, Position, State, StateKind, StateName, StatesError, TaskContext,
    TaskState, Workflow, WorkflowError,
};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, Instrument};
use uuid::Uuid;

/// Private state of one walker.
pub(crate) struct Frame {
    pub(crate) run_id: Uuid,
    pub(crate) workflow: Arc<Workflow>,
    pub(crate) document: Value,
    pub(crate) token: CancellationToken,
}

impl Frame {
    pub(crate) fn new(workflow: Arc<Workflow>, document: Value, token: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            workflow,
            document,
            token,
        }
    }
}

/// What a state evaluation asks the walker to do next.
pub(crate) enum Transition {
    /// Carry on with `output`. `next` overrides the state's static `Next`.
    Continue {
        output: Value,
        next: Option<StateName>,
    },
    Succeed(Value),
    Fail {
        error: Option<String>,
        cause: Option<String>,
    },
}

/// Applies an optional payload template.
pub(crate) fn shape(template: Option<&Payload>, value: Value) -> Result<Value, Fault> {
    match template {
        Some(template) => Ok(template.resolve(&value)?),
        None => Ok(value),
    }
}

impl Engine {
    /// Runs `frame` to a terminal outcome.
    ///
    /// Boxed so Parallel and Map can re-enter the walker from spawned tasks.
    pub(crate) fn run_frame(&self, frame: Frame) -> BoxFuture<'static, RunOutcome> {
        let engine = self.clone();
        async move { engine.walk(frame).await }.boxed()
    }

    async fn walk(&self, mut frame: Frame) -> RunOutcome {
        let workflow = Arc::clone(&frame.workflow);
        let Some(mut position) = workflow.position_of(workflow.start_at().as_str()) else {
            return Fault::Fatal(WorkflowError::InvalidStartAt(workflow.start_at().clone())).into();
        };

        loop {
            let Some(state) = workflow.state_at(position) else {
                return Fault::Fatal(WorkflowError::InvalidDefinition(format!(
                    "no state at branch {} offset {}",
                    position.branch, position.offset
                )))
                .into();
            };
            if frame.token.is_cancelled() {
                debug!(state = %state.name, "cancelled before state");
                return RunOutcome::Cancelled;
            }

            let span = debug_span!(
                "state",
                run_id = %frame.run_id,
                state = %state.name,
                kind = state.kind.type_name(),
            );
            let evaluated = self.evaluate(&frame, state).instrument(span).await;
            // A state that finishes after the signal does not count as completed.
            if frame.token.is_cancelled() {
                debug!(state = %state.name, "cancelled during state");
                return RunOutcome::Cancelled;
            }
            let transition = match evaluated {
                Ok(transition) => transition,
                Err(fault) => return fault.into(),
            };

            let (output, dynamic) = match transition {
                Transition::Succeed(output) => return RunOutcome::Succeeded(output),
                Transition::Fail { error, cause } => {
                    return RunOutcome::Failed(Failure::Declared { error, cause })
                }
                Transition::Continue { output, next } => (output, next),
            };

            position = match dynamic.as_ref().or(state.next.as_ref()) {
                Some(next) => match workflow.position_of(next.as_str()) {
                    Some(position) => {
                        debug!(from = %state.name, to = %next, "transition");
                        position
                    }
                    None => return Fault::Fatal(WorkflowError::StateNotFound(next.clone())).into(),
                },
                None if state.end => return RunOutcome::Succeeded(output),
                None => {
                    let following = Position {
                        branch: position.branch,
                        offset: position.offset + 1,
                    };
                    if workflow.state_at(following).is_none() {
                        return RunOutcome::Succeeded(output);
                    }
                    following
                }
            };
            frame.document = output;
        }
    }

    async fn evaluate(&self, frame: &Frame, state: &State) -> Result<Transition, Fault> {
        let document = &frame.document;
        match &state.kind {
            StateKind::Pass(pass) => {
                let input = filter_input(document, &pass.io.input_path)?;
                let raw = match (&pass.result, &pass.parameters) {
                    (Some(result), _) => result.clone(),
                    (None, parameters) => shape(parameters.as_ref(), input)?,
                };
                let merged = merge_result(document, raw, &pass.result_path)?;
                Ok(Transition::Continue {
                    output: filter_output(&merged, &pass.io.output_path)?,
                    next: None,
                })
            }
            StateKind::Choice(body) => {
                let input = filter_input(document, &body.io.input_path)?;
                let next = choice::select(&body.choices, body.default.as_ref(), &input)?
                    .cloned()
                    .ok_or_else(|| {
                        StatesError::new(
                            names::NO_CHOICE_MATCHED,
                            format!("no choice rule matched in state '{}'", state.name),
                        )
                    })?;
                Ok(Transition::Continue {
                    output: filter_output(&input, &body.io.output_path)?,
                    next: Some(next),
                })
            }
            StateKind::Wait(body) => {
                let input = filter_input(document, &body.io.input_path)?;
                let duration = wait::resolve(&body.wait, &input, Utc::now())?;
                debug!(seconds = duration.as_secs_f64(), "waiting");
                wait::sleep_or_cancel(duration, &frame.token).await?;
                Ok(Transition::Continue {
                    output: filter_output(&input, &body.io.output_path)?,
                    next: None,
                })
            }
            StateKind::Succeed(body) => {
                let input = filter_input(document, &body.io.input_path)?;
                Ok(Transition::Succeed(filter_output(&input, &body.io.output_path)?))
            }
            StateKind::Fail(body) => Ok(Transition::Fail {
                error: body.error.clone(),
                cause: body.cause.clone(),
            }),
            StateKind::Task(task) => {
                self.guard(frame, state, &task.io, &task.result_path, &task.policy, move |input| {
                    self.invoke_task(frame, state, task, input)
                })
                .await
            }
            StateKind::Parallel(parallel) => {
                self.guard(
                    frame,
                    state,
                    &parallel.io,
                    &parallel.result_path,
                    &parallel.policy,
                    move |input| self.run_parallel(frame, state, parallel, input),
                )
                .await
            }
            StateKind::Map(map) => {
                self.guard(frame, state, &map.io, &map.result_path, &map.policy, move |input| {
                    self.run_map(frame, state, map, input)
                })
                .await
            }
        }
    }

    async fn invoke_task(
        &self,
        frame: &Frame,
        state: &State,
        task: &TaskState,
        input: Value,
    ) -> Result<Value, Fault> {
        let input = shape(task.parameters.as_ref(), input)?;
        let ctx = TaskContext::new(frame.run_id, state.name.clone(), frame.token.clone());
        debug!(resource = %task.resource, "invoking task");
        let raw = self
            .inner()
            .registry
            .invoke(&ctx, &task.resource, input, task.timeout())
            .await?;
        shape(task.result_selector.as_ref(), raw)
    }
}
