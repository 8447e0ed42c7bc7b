//! Retry and Catch handling around Task, Parallel and Map bodies.

use crate::engine::Engine;
use crate::outcome::Fault;
use crate::wait::sleep_or_cancel;
use crate::walker::{Frame, Transition};
use ayatori_core::filter::{filter_input, filter_output, merge_result};
use ayatori_core::{first_match, ErrorPolicy, IoPaths, PathSpec, State};
use serde_json::Value;
use std::future::Future;
use tracing::{info, warn};

impl Engine {
    /// Evaluates `body` on the state's effective input, applying the state's
    /// Retry rules and then its Catch rules to classified errors.
    ///
    /// Attempt counters live only as long as this call, so every entry into
    /// the state starts from zero. A caught error skips the state's own
    /// `ResultPath` and `OutputPath` and continues at the rule's `Next`.
    pub(crate) async fn guard<F, Fut>(
        &self,
        frame: &Frame,
        state: &State,
        io: &IoPaths,
        result_path: &PathSpec,
        policy: &ErrorPolicy,
        mut body: F,
    ) -> Result<Transition, Fault>
    where
        F: FnMut(Value) -> Fut,
        Fut: Future<Output = Result<Value, Fault>>,
    {
        let input = filter_input(&frame.document, &io.input_path)?;
        let mut attempts = vec![0u32; policy.retry.len()];

        let error = loop {
            let error = match body(input.clone()).await {
                Ok(raw) => {
                    let merged = merge_result(&frame.document, raw, result_path)?;
                    return Ok(Transition::Continue {
                        output: filter_output(&merged, &io.output_path)?,
                        next: None,
                    });
                }
                Err(Fault::States(error)) => error,
                Err(fault) => return Err(fault),
            };

            let Some((index, rule)) = first_match(&policy.retry, &error.name) else {
                break error;
            };
            let Some(attempt) = attempts.get_mut(index) else {
                break error;
            };
            if *attempt >= rule.max_attempts() {
                warn!(
                    state = %state.name,
                    error = %error.name,
                    attempts = *attempt,
                    "retries exhausted"
                );
                break error;
            }

            let delay = rule.delay_for_attempt(*attempt);
            *attempt += 1;
            warn!(
                state = %state.name,
                error = %error.name,
                cause = %error.cause,
                attempt = *attempt,
                max_attempts = rule.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                "retrying state"
            );
            sleep_or_cancel(delay, &frame.token).await?;
        };

        let Some((_, rule)) = first_match(&policy.catch, &error.name) else {
            return Err(Fault::States(error));
        };
        info!(
            state = %state.name,
            error = %error.name,
            next = %rule.next,
            "caught error"
        );
        let recovered = match &rule.result_path {
            Some(path) => merge_result(&input, error.to_value(), path)?,
            None => input,
        };
        Ok(Transition::Continue {
            output: recovered,
            next: Some(rule.next.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ayatori_core::{names, CatchRule, RetryRule, StateKind, StatesError, Workflow};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn setup(document: Value) -> (Engine, Frame, State) {
        let workflow = Arc::new(
            Workflow::from_json(
                r#"{"StartAt": "T", "States": {"T": {"Type": "Task", "Resource": "x", "End": true}}}"#,
            )
            .unwrap(),
        );
        let state = State::new("T", StateKind::Pass(Default::default()));
        let frame = Frame::new(workflow, document, CancellationToken::new());
        (Engine::builder().build().unwrap(), frame, state)
    }

    fn failing(calls: &AtomicU32, name: &'static str) -> impl Future<Output = Result<Value, Fault>> {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Err(Fault::States(StatesError::new(name, "boom"))))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_catches() {
        let (engine, frame, state) = setup(json!({"order": 1}));
        let policy = ErrorPolicy {
            retry: vec![RetryRule::new(["Flaky"])
                .with_interval(Duration::from_millis(10))
                .with_max_attempts(2)],
            catch: vec![CatchRule::new([names::ALL], "Recover")
                .with_result_path(PathSpec::parse(Some("$.error")).unwrap())],
        };
        let calls = AtomicU32::new(0);

        let transition = engine
            .guard(
                &frame,
                &state,
                &IoPaths::default(),
                &PathSpec::Root,
                &policy,
                |_| failing(&calls, "Flaky"),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let Transition::Continue { output, next } = transition else {
            panic!("expected Continue");
        };
        assert_eq!(next.unwrap().as_str(), "Recover");
        assert_eq!(
            output,
            json!({"order": 1, "error": {"Error": "Flaky", "Cause": "boom"}})
        );
    }

    #[tokio::test]
    async fn test_unmatched_error_propagates_without_retry() {
        let (engine, frame, state) = setup(json!({}));
        let policy = ErrorPolicy {
            retry: vec![RetryRule::new(["Other"])],
            catch: vec![CatchRule::new(["Other"], "Recover")],
        };
        let calls = AtomicU32::new(0);

        let result = engine
            .guard(
                &frame,
                &state,
                &IoPaths::default(),
                &PathSpec::Root,
                &policy,
                |_| failing(&calls, "Custom"),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Fault::States(e)) if e.name == "Custom"));
    }

    #[tokio::test]
    async fn test_success_applies_result_path() {
        let (engine, frame, state) = setup(json!({"keep": true}));
        let result_path = PathSpec::parse(Some("$.result")).unwrap();

        let transition = engine
            .guard(
                &frame,
                &state,
                &IoPaths::default(),
                &result_path,
                &ErrorPolicy::default(),
                |input| std::future::ready(Ok(json!({"saw": input}))),
            )
            .await
            .unwrap();

        let Transition::Continue { output, next } = transition else {
            panic!("expected Continue");
        };
        assert!(next.is_none());
        assert_eq!(
            output,
            json!({"keep": true, "result": {"saw": {"keep": true}}})
        );
    }

    #[tokio::test]
    async fn test_fatal_faults_skip_rules() {
        let (engine, frame, state) = setup(json!({}));
        let policy = ErrorPolicy {
            retry: vec![RetryRule::new([names::ALL])],
            catch: vec![CatchRule::new([names::ALL], "Recover")],
        };

        let result = engine
            .guard(
                &frame,
                &state,
                &IoPaths::default(),
                &PathSpec::Root,
                &policy,
                |_| {
                    std::future::ready(Err(Fault::Fatal(ayatori_core::WorkflowError::UnknownResource(
                        "x".into(),
                    ))))
                },
            )
            .await;
        assert!(matches!(result, Err(Fault::Fatal(_))));
    }
}
