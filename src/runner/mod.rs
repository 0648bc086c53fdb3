//! Task runner: sequential stage execution with bounded retry
//!
//! Every stage of a pipeline run goes through [`TaskRunner::run`]. A stage is
//! retried only when its error is transient (see [`Transient`]); anything else
//! fails the stage on the first attempt. Each attempt emits exactly one log line
//! carrying the stage name, the attempt number and the elapsed time.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::duration_serde;
use crate::config::{DEFAULT_JITTER_PERCENT, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::errors::{ExtractionError, PipelineError};

pub mod jitter;

use jitter::generate_jitter_percent;

/// Classifies failures worth retrying
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for ExtractionError {
    fn is_transient(&self) -> bool {
        ExtractionError::is_transient(self)
    }
}

impl Transient for PipelineError {
    fn is_transient(&self) -> bool {
        match self {
            PipelineError::Extraction(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Retry behaviour of a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Fixed wait between attempts
    #[serde(with = "duration_serde::duration")]
    pub retry_delay: Duration,
    /// Up to this percentage of the delay is added at random
    pub jitter_percent: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: humantime::parse_duration(DEFAULT_RETRY_DELAY)
                .unwrap_or(Duration::from_secs(5)),
            jitter_percent: DEFAULT_JITTER_PERCENT,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            jitter_percent: 0,
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self.clone()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Outcome bookkeeping of one stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub attempts: u32,
    #[serde(with = "duration_serde::duration")]
    pub elapsed: Duration,
}

/// Runs stages one after another under a retry policy
#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    policy: RetryPolicy,
}

impl TaskRunner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runner sharing this one's delay and jitter with another retry budget
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self::new(self.policy.with_max_retries(max_retries))
    }

    /// Invoke `stage_fn(args)` until it succeeds, fails permanently or exhausts the retries
    ///
    /// `args` is cloned for every attempt so each one sees the original input.
    pub async fn run<A, T, E, F, Fut>(&self, stage: &str, stage_fn: F, args: A) -> Result<T, E>
    where
        A: Clone,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        self.run_with_report(stage, stage_fn, args)
            .await
            .map(|(value, _)| value)
    }

    /// Same as [`TaskRunner::run`], also returning attempt bookkeeping
    pub async fn run_with_report<A, T, E, F, Fut>(
        &self,
        stage: &str,
        stage_fn: F,
        args: A,
    ) -> Result<(T, StageReport), E>
    where
        A: Clone,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let max_attempts = self.policy.max_attempts();
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_started = Instant::now();
            let outcome = stage_fn(args.clone()).await;
            let elapsed_ms = attempt_started.elapsed().as_millis() as u64;

            match outcome {
                Ok(value) => {
                    info!(
                        stage,
                        attempt,
                        max_attempts,
                        elapsed_ms,
                        "stage attempt succeeded"
                    );
                    let report = StageReport {
                        stage: stage.to_string(),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                    return Ok((value, report));
                }
                Err(err) if !err.is_transient() => {
                    warn!(
                        stage,
                        attempt,
                        max_attempts,
                        elapsed_ms,
                        error = %err,
                        "stage attempt failed with non-transient error"
                    );
                    return Err(err);
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(
                        stage,
                        attempt,
                        max_attempts,
                        elapsed_ms,
                        error = %err,
                        "stage attempt failed, retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = calculate_delay(&self.policy);
                    warn!(
                        stage,
                        attempt,
                        max_attempts,
                        elapsed_ms,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "stage attempt failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Fixed delay plus optional jitter
fn calculate_delay(policy: &RetryPolicy) -> Duration {
    let delay_ms = policy.retry_delay.as_millis() as u64;
    let jitter = generate_jitter_percent(delay_ms, policy.jitter_percent);
    Duration::from_millis(delay_ms + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn io_error() -> ExtractionError {
        ExtractionError::io(
            "data/raw/sales.csv",
            std::io::Error::new(std::io::ErrorKind::Interrupted, "flaky"),
        )
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    /// Extractor stand-in failing transiently `failures` times
    async fn flaky(counter: Arc<AtomicU32>, failures: u32) -> Result<u32, ExtractionError> {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        if call < failures {
            Err(io_error())
        } else {
            Ok(call + 1)
        }
    }

    #[tokio::test]
    async fn test_success_without_retry() {
        let runner = TaskRunner::new(fast_policy(2));
        let counter = Arc::new(AtomicU32::new(0));

        let (value, report) = runner
            .run_with_report("extract", |c| flaky(c, 0), counter.clone())
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.stage, "extract");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let runner = TaskRunner::new(fast_policy(2));
        let counter = Arc::new(AtomicU32::new(0));

        let result = runner.run("extract", |c| flaky(c, 2), counter.clone()).await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surfaces_error() {
        let runner = TaskRunner::new(fast_policy(2));
        let counter = Arc::new(AtomicU32::new(0));

        let result = runner.run("extract", |c| flaky(c, 5), counter.clone()).await;

        assert!(matches!(result, Err(ExtractionError::Io { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let runner = TaskRunner::new(fast_policy(3));
        let counter = Arc::new(AtomicU32::new(0));

        let result: Result<(), PipelineError> = runner
            .run(
                "transform",
                |c: Arc<AtomicU32>| async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(crate::errors::SchemaValidationError::NullInKeyColumn {
                        column: "order_id".to_string(),
                        row: 0,
                    }
                    .into())
                },
                counter.clone(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_arguments_preserved_between_attempts() {
        let runner = TaskRunner::new(fast_policy(1));
        let counter = Arc::new(AtomicU32::new(0));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let result = runner
            .run(
                "extract",
                |(path, c, seen): (String, Arc<AtomicU32>, Arc<std::sync::Mutex<Vec<String>>>)| async move {
                    seen.lock().unwrap().push(path.clone());
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(io_error())
                    } else {
                        Ok(path)
                    }
                },
                ("data/raw".to_string(), counter.clone(), seen.clone()),
            )
            .await;

        assert_eq!(result.unwrap(), "data/raw");
        assert_eq!(*seen.lock().unwrap(), vec!["data/raw", "data/raw"]);
    }

    #[test]
    fn test_pipeline_error_transience_follows_extraction() {
        let transient: PipelineError = io_error().into();
        assert!(transient.is_transient());

        let permanent: PipelineError = ExtractionError::parse("rates.json", "bad json").into();
        assert!(!permanent.is_transient());
    }

    #[test]
    fn test_calculate_delay_without_jitter() {
        let policy = RetryPolicy::new(2, Duration::from_secs(5));
        assert_eq!(calculate_delay(&policy), Duration::from_secs(5));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.retry_delay, Duration::from_secs(5));
        assert_eq!(policy.max_attempts(), 3);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn test_retry_bound(k in 0u32..6, max_retries in 0u32..5) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap();
                let runner = TaskRunner::new(RetryPolicy::new(max_retries, Duration::ZERO));
                let counter = Arc::new(AtomicU32::new(0));

                let result = rt.block_on(runner.run("extract", |c| flaky(c, k), counter.clone()));

                prop_assert_eq!(result.is_ok(), k <= max_retries);
                prop_assert_eq!(counter.load(Ordering::SeqCst), (k + 1).min(max_retries + 1));
            }

            #[test]
            fn test_delay_within_jitter_bounds(
                delay_ms in 0u64..10_000,
                jitter_percent in 0u8..=100
            ) {
                let policy = RetryPolicy {
                    max_retries: 1,
                    retry_delay: Duration::from_millis(delay_ms),
                    jitter_percent,
                };
                let delay = calculate_delay(&policy).as_millis() as u64;
                prop_assert!(delay >= delay_ms);
                prop_assert!(delay <= delay_ms + delay_ms * jitter_percent as u64 / 100);
            }
        }
    }
}
