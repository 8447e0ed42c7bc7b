//! Parallel and Map: fan-out over sub-workflows with an ordered fan-in.

use crate::engine::Engine;
use crate::outcome::{Fault, RunOutcome};
use crate::walker::{shape, Frame};
use ayatori_core::filter::filter_input;
use ayatori_core::{kind_of, MapState, ParallelState, State, Workflow, WorkflowError};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info_span, warn, Instrument};

impl Engine {
    /// Runs every branch of a Parallel state on the same input.
    pub(crate) async fn run_parallel(
        &self,
        frame: &Frame,
        state: &State,
        parallel: &ParallelState,
        input: Value,
    ) -> Result<Value, Fault> {
        let input = shape(parallel.parameters.as_ref(), input)?;
        let jobs = parallel
            .branches
            .iter()
            .map(|branch| (Arc::clone(branch), input.clone()))
            .collect();
        let results = self.fan_out(frame, state, jobs, None).await?;
        shape(parallel.result_selector.as_ref(), Value::Array(results))
    }

    /// Runs the iterator of a Map state once per selected item.
    pub(crate) async fn run_map(
        &self,
        frame: &Frame,
        state: &State,
        map: &MapState,
        input: Value,
    ) -> Result<Value, Fault> {
        let items = match filter_input(&input, &map.items_path)? {
            Value::Array(items) => items,
            other => {
                return Err(Fault::Fatal(WorkflowError::InvalidDocument(format!(
                    "ItemsPath of state '{}' must select an array, got {}",
                    state.name,
                    kind_of(&other)
                ))))
            }
        };

        let results = if items.is_empty() {
            Vec::new()
        } else {
            let limit = match map.max_concurrency {
                0 => self.inner().config.max_concurrency,
                n => Some(n),
            };
            let jobs = items
                .into_iter()
                .map(|item| (Arc::clone(&map.iterator), item))
                .collect();
            self.fan_out(frame, state, jobs, limit).await?
        };
        shape(map.result_selector.as_ref(), Value::Array(results))
    }

    /// Launches one frame per job and collects their outputs in job order.
    ///
    /// The first branch that fails or is cancelled signals its siblings to
    /// stop; their results are discarded.
    async fn fan_out(
        &self,
        frame: &Frame,
        state: &State,
        jobs: Vec<(Arc<Workflow>, Value)>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, Fault> {
        let token = frame.token.child_token();
        let permits = limit.map(|n| Arc::new(Semaphore::new(n)));
        let mut slots: Vec<Option<Value>> = vec![None; jobs.len()];
        let mut set = JoinSet::new();

        for (index, (workflow, input)) in jobs.into_iter().enumerate() {
            let child = Frame::new(workflow, input, token.clone());
            let span = info_span!("branch", run_id = %child.run_id, parent_run_id = %frame.run_id, index);
            let engine = self.clone();
            let permits = permits.clone();
            set.spawn(
                async move {
                    let _permit = match permits {
                        Some(permits) => match permits.acquire_owned().await {
                            Ok(permit) => Some(permit),
                            Err(_) => return (index, RunOutcome::Cancelled),
                        },
                        None => None,
                    };
                    (index, engine.run_frame(child).await)
                }
                .instrument(span),
            );
        }
        debug!(state = %state.name, branches = slots.len(), "branches launched");

        while let Some(joined) = set.join_next().await {
            let (index, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    token.cancel();
                    set.detach_all();
                    return Err(Fault::Fatal(WorkflowError::BranchAborted {
                        state: state.name.clone(),
                        details: e.to_string(),
                    }));
                }
            };
            let fault = match outcome {
                RunOutcome::Succeeded(output) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(output);
                    }
                    continue;
                }
                RunOutcome::Failed(failure) => {
                    warn!(state = %state.name, index, %failure, "branch failed");
                    failure.into_branch_fault()
                }
                RunOutcome::Cancelled => Fault::Cancelled,
            };
            token.cancel();
            set.detach_all();
            return Err(fault);
        }

        Ok(slots.into_iter().map(Option::unwrap_or_default).collect())
    }
}
