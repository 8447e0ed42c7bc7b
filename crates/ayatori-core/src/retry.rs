//! Retry and Catch rules.

use crate::error::names;
use crate::path::{present_path_spec, PathSpec};
use crate::state::StateName;
use serde::Deserialize;
use std::time::Duration;

/// Error returned when a [`RetryRule`] configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRuleError(pub &'static str);

impl std::fmt::Display for RetryRuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RetryRuleError {}

/// Shared matching behavior of Retry and Catch rules.
pub trait ErrorRule {
    /// Error names this rule applies to.
    fn error_equals(&self) -> &[String];

    /// Returns `true` if the rule names `error` or the `States.ALL` wildcard.
    fn matches(&self, error: &str) -> bool {
        self.error_equals()
            .iter()
            .any(|name| name == names::ALL || name == error)
    }
}

/// Returns the first rule, in declared order, that matches `error`.
pub fn first_match<'a, R: ErrorRule>(rules: &'a [R], error: &str) -> Option<(usize, &'a R)> {
    rules.iter().enumerate().find(|(_, rule)| rule.matches(error))
}

fn validate_error_equals(error_equals: &[String]) -> Result<(), RetryRuleError> {
    if error_equals.is_empty() {
        return Err(RetryRuleError("ErrorEquals must not be empty"));
    }
    if error_equals.len() > 1 && error_equals.iter().any(|name| name == names::ALL) {
        return Err(RetryRuleError("States.ALL must appear alone in ErrorEquals"));
    }
    Ok(())
}

/// Re-invokes a failed state body with exponential backoff.
///
/// # Examples
///
/// ```
/// use ayatori_core::RetryRule;
/// use std::time::Duration;
///
/// let rule = RetryRule::new(["States.Timeout"])
///     .with_interval(Duration::from_millis(100))
///     .with_backoff_rate(3.0)
///     .unwrap();
/// assert_eq!(rule.delay_for_attempt(0), Duration::from_millis(100));
/// assert_eq!(rule.delay_for_attempt(2), Duration::from_millis(900));
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RetryFields")]
pub struct RetryRule {
    error_equals: Vec<String>,
    interval: Duration,
    max_attempts: u32,
    backoff_rate: f64,
    max_delay: Option<Duration>,
}

impl RetryRule {
    /// Creates a rule with the default interval (1s), attempts (3) and
    /// backoff rate (2.0).
    pub fn new<I, S>(error_equals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            error_equals: error_equals.into_iter().map(Into::into).collect(),
            interval: Duration::from_secs(1),
            max_attempts: 3,
            backoff_rate: 2.0,
            max_delay: None,
        }
    }

    /// Sets the delay before the first retry.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the maximum number of retries. Zero disables retrying.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the multiplier applied to the delay after each retry.
    pub fn with_backoff_rate(mut self, backoff_rate: f64) -> Result<Self, RetryRuleError> {
        if !backoff_rate.is_finite() || backoff_rate < 1.0 {
            return Err(RetryRuleError("BackoffRate must be a finite number >= 1.0"));
        }
        self.backoff_rate = backoff_rate;
        Ok(self)
    }

    /// Caps the delay between retries.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Returns the maximum number of retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.interval.as_secs_f64() * self.backoff_rate.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

impl ErrorRule for RetryRule {
    fn error_equals(&self) -> &[String] {
        &self.error_equals
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RetryFields {
    error_equals: Vec<String>,
    #[serde(default)]
    interval_seconds: Option<u64>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    backoff_rate: Option<f64>,
    #[serde(default)]
    max_delay_seconds: Option<u64>,
}

impl TryFrom<RetryFields> for RetryRule {
    type Error = RetryRuleError;

    fn try_from(fields: RetryFields) -> Result<Self, Self::Error> {
        validate_error_equals(&fields.error_equals)?;
        if fields.interval_seconds == Some(0) {
            return Err(RetryRuleError("IntervalSeconds must be positive"));
        }

        let mut rule = RetryRule::new(fields.error_equals);
        if let Some(secs) = fields.interval_seconds {
            rule = rule.with_interval(Duration::from_secs(secs));
        }
        if let Some(max_attempts) = fields.max_attempts {
            rule = rule.with_max_attempts(max_attempts);
        }
        if let Some(rate) = fields.backoff_rate {
            rule = rule.with_backoff_rate(rate)?;
        }
        if let Some(secs) = fields.max_delay_seconds {
            rule = rule.with_max_delay(Duration::from_secs(secs));
        }
        Ok(rule)
    }
}

/// Recovers from a failed state body by jumping to another state.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "CatchFields")]
pub struct CatchRule {
    error_equals: Vec<String>,
    /// State to continue with.
    pub next: StateName,
    /// Where fault details are written. `None` leaves the input untouched.
    pub result_path: Option<PathSpec>,
}

impl CatchRule {
    /// Creates a catch rule that jumps to `next`.
    pub fn new<I, S>(error_equals: I, next: impl Into<StateName>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            error_equals: error_equals.into_iter().map(Into::into).collect(),
            next: next.into(),
            result_path: None,
        }
    }

    /// Sets where fault details are written.
    pub fn with_result_path(mut self, result_path: PathSpec) -> Self {
        self.result_path = Some(result_path);
        self
    }
}

impl ErrorRule for CatchRule {
    fn error_equals(&self) -> &[String] {
        &self.error_equals
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatchFields {
    error_equals: Vec<String>,
    next: StateName,
    #[serde(default, deserialize_with = "present_path_spec")]
    result_path: Option<PathSpec>,
}

impl TryFrom<CatchFields> for CatchRule {
    type Error = RetryRuleError;

    fn try_from(fields: CatchFields) -> Result<Self, Self::Error> {
        validate_error_equals(&fields.error_equals)?;
        Ok(Self {
            error_equals: fields.error_equals,
            next: fields.next,
            result_path: fields.result_path,
        })
    }
}
