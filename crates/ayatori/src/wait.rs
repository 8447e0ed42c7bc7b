//! Wait state durations and cancellable sleeps.

use crate::outcome::Fault;
use ayatori_core::{kind_of, WaitFor, WorkflowError};
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Resolves how long a Wait state suspends, relative to `now`.
///
/// Timestamps in the past resolve to zero.
pub(crate) fn resolve(
    wait: &WaitFor,
    input: &Value,
    now: DateTime<Utc>,
) -> Result<Duration, WorkflowError> {
    match wait {
        WaitFor::Seconds(secs) => Ok(Duration::from_secs(*secs)),
        WaitFor::SecondsPath(path) => {
            let value = path.query_one(input).map_err(|e| e.at(path))?;
            value.as_u64().map(Duration::from_secs).ok_or_else(|| {
                WorkflowError::InvalidDocument(format!(
                    "SecondsPath '{path}' must select a non-negative integer, got {}",
                    kind_of(value)
                ))
            })
        }
        WaitFor::Timestamp(at) => Ok(until(at, now)),
        WaitFor::TimestampPath(path) => {
            let value = path.query_one(input).map_err(|e| e.at(path))?;
            let at = value
                .as_str()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .ok_or_else(|| {
                    WorkflowError::InvalidDocument(format!(
                        "TimestampPath '{path}' must select an RFC 3339 timestamp"
                    ))
                })?;
            Ok(until(&at, now))
        }
    }
}

fn until(at: &DateTime<FixedOffset>, now: DateTime<Utc>) -> Duration {
    (at.with_timezone(&Utc) - now).to_std().unwrap_or(Duration::ZERO)
}

/// Sleeps for `duration` unless `token` fires first.
pub(crate) async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> Result<(), Fault> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Fault::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn wait_for(value: Value) -> WaitFor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_resolve_forms() {
        let input = json!({"secs": 7, "when": "2024-06-01T12:00:30Z"});
        assert_eq!(
            resolve(&wait_for(json!({"Seconds": 3})), &input, now()).unwrap(),
            Duration::from_secs(3)
        );
        assert_eq!(
            resolve(&wait_for(json!({"SecondsPath": "$.secs"})), &input, now()).unwrap(),
            Duration::from_secs(7)
        );
        assert_eq!(
            resolve(&wait_for(json!({"TimestampPath": "$.when"})), &input, now()).unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(
            resolve(
                &wait_for(json!({"Timestamp": "2024-06-01T14:00:00+02:00"})),
                &input,
                now()
            )
            .unwrap(),
            Duration::ZERO
        );
    }

    #[test]
    fn test_resolve_rejects_bad_documents() {
        let input = json!({"secs": -1, "when": "tomorrow"});
        assert!(resolve(&wait_for(json!({"SecondsPath": "$.secs"})), &input, now()).is_err());
        assert!(resolve(&wait_for(json!({"TimestampPath": "$.when"})), &input, now()).is_err());
        assert!(matches!(
            resolve(&wait_for(json!({"SecondsPath": "$.gone"})), &input, now()),
            Err(WorkflowError::InvalidPath { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_races_cancellation() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_secs(1), &token).await.is_ok());

        token.cancel();
        assert!(matches!(
            sleep_or_cancel(Duration::from_secs(3600), &token).await,
            Err(Fault::Cancelled)
        ));
    }
}
