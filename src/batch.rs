use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::sleep;

use crate::error::PipelineError;
use crate::llm::{RetryPolicy, Throttle};
use crate::telemetry::ctx::{LogCtx, OpMarker};

/// One call per batch; must return exactly one output per input record, in order.
#[async_trait]
pub trait BatchClassifier<R: Sync>: Send + Sync {
    type Output: Send;
    async fn classify(&self, batch: &[R]) -> Result<Vec<Self::Output>, PipelineError>;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BatchPolicy {
    pub batch_size: usize,
    #[serde(skip)]
    pub retry: RetryPolicy,
    #[serde(skip)]
    pub delay: Duration,
}

impl BatchPolicy {
    pub fn new(batch_size: usize, delay: Duration, retry: RetryPolicy) -> Result<Self, PipelineError> {
        if batch_size == 0 {
            return Err(PipelineError::InvalidConfiguration("batch size must be at least 1".into()));
        }
        Ok(Self { batch_size, retry, delay })
    }

    pub fn batch_count(&self, records: usize) -> usize {
        records.div_ceil(self.batch_size.max(1))
    }
}

#[derive(Debug)]
pub struct FailedBatch<R> {
    pub index: usize,
    pub records: Vec<R>,
    pub error: PipelineError,
}

#[derive(Debug)]
pub struct BatchOutcome<R, O> {
    pub completed: Vec<(R, O)>,
    pub failed: Vec<FailedBatch<R>>,
    pub batches: usize,
}

impl<R, O> BatchOutcome<R, O> {
    pub fn failed_records(&self) -> usize {
        self.failed.iter().map(|b| b.records.len()).sum()
    }
}

/// Run `classifier` over consecutive batches of `records`.
///
/// A batch that errors or returns the wrong number of results is retried
/// according to `policy.retry` and then recorded in `failed`; later batches
/// still run. Fatal errors abort the whole run.
pub async fn run_batches<R, C, Op>(
    records: &[R],
    policy: &BatchPolicy,
    classifier: &C,
    log: &LogCtx<Op>,
) -> Result<BatchOutcome<R, C::Output>, PipelineError>
where
    R: Clone + Sync,
    C: BatchClassifier<R> + ?Sized,
    Op: OpMarker,
{
    if policy.batch_size == 0 {
        return Err(PipelineError::InvalidConfiguration("batch size must be at least 1".into()));
    }

    let total = policy.batch_count(records.len());
    let mut throttle = Throttle::new(policy.delay);
    let mut completed = Vec::with_capacity(records.len());
    let mut failed = Vec::new();

    for (index, batch) in records.chunks(policy.batch_size).enumerate() {
        let mut retry = 0u32;
        let result = loop {
            throttle.wait().await;
            match classify_checked(classifier, batch, index).await {
                Ok(outputs) => break Ok(outputs),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if retry < policy.retry.max_retries && e.is_retryable() => {
                    let wait = policy.retry.backoff(retry);
                    log.warn_kv(
                        &format!("⚠️ batch {}/{} failed, retrying in {:?}: {}", index + 1, total, wait, e),
                        [("batch", index.to_string()), ("retry", (retry + 1).to_string())],
                    );
                    sleep(wait).await;
                    retry += 1;
                }
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(outputs) => {
                completed.extend(batch.iter().cloned().zip(outputs));
                log.debug(format!("batch {}/{} ok ({} record(s))", index + 1, total, batch.len()));
            }
            Err(error) => {
                log.warn_kv(
                    &format!("❌ batch {}/{} failed: {}", index + 1, total, error),
                    [("batch", index.to_string()), ("records", batch.len().to_string())],
                );
                failed.push(FailedBatch { index, records: batch.to_vec(), error });
            }
        }
    }

    Ok(BatchOutcome { completed, failed, batches: total })
}

async fn classify_checked<R, C>(classifier: &C, batch: &[R], index: usize) -> Result<Vec<C::Output>, PipelineError>
where
    R: Sync,
    C: BatchClassifier<R> + ?Sized,
{
    let outputs = classifier.classify(batch).await?;
    if outputs.len() != batch.len() {
        return Err(PipelineError::BatchCardinalityMismatch { batch: index, expected: batch.len(), got: outputs.len() });
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::telemetry;

    /// Uppercases records; misbehaves on chosen batches.
    struct Upper {
        short_on: Vec<usize>,
        error_on: Vec<usize>,
        flaky_once: Mutex<Vec<usize>>,
        calls: Mutex<usize>,
    }

    impl Upper {
        fn new() -> Self {
            Self { short_on: vec![], error_on: vec![], flaky_once: Mutex::new(vec![]), calls: Mutex::new(0) }
        }
    }

    #[async_trait]
    impl BatchClassifier<String> for Upper {
        type Output = String;

        async fn classify(&self, batch: &[String]) -> Result<Vec<String>, PipelineError> {
            let call = {
                let mut c = self.calls.lock().unwrap();
                *c += 1;
                *c - 1
            };
            let first = batch[0].clone();
            let index: usize = first.trim_start_matches('r').parse().unwrap();
            let batch_no = index / 3;
            if self.error_on.contains(&batch_no) {
                return Err(PipelineError::ResponseBlocked(format!("call {call}")));
            }
            {
                let mut flaky = self.flaky_once.lock().unwrap();
                if let Some(pos) = flaky.iter().position(|b| *b == batch_no) {
                    flaky.remove(pos);
                    return Err(PipelineError::MalformedStructuredResponse("not json".into()));
                }
            }
            let mut out: Vec<String> = batch.iter().map(|r| r.to_uppercase()).collect();
            if self.short_on.contains(&batch_no) {
                out.pop();
            }
            Ok(out)
        }
    }

    fn records(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("r{i}")).collect()
    }

    fn policy(size: usize, retries: u32) -> BatchPolicy {
        BatchPolicy::new(size, Duration::ZERO, RetryPolicy { max_retries: retries, base_delay: Duration::from_millis(10) })
            .unwrap()
    }

    #[tokio::test]
    async fn cardinality_mismatch_fails_only_that_batch() {
        let clf = Upper { short_on: vec![1], ..Upper::new() };
        let out = run_batches(&records(9), &policy(3, 0), &clf, &telemetry::define()).await.unwrap();

        assert_eq!(out.batches, 3);
        assert_eq!(out.completed.len(), 6);
        assert_eq!(out.failed.len(), 1);
        assert_eq!(out.failed[0].index, 1);
        assert_eq!(out.failed[0].records, vec!["r3", "r4", "r5"]);
        assert!(matches!(
            out.failed[0].error,
            PipelineError::BatchCardinalityMismatch { batch: 1, expected: 3, got: 2 }
        ));
        let done: Vec<&str> = out.completed.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(done, vec!["r0", "r1", "r2", "r6", "r7", "r8"]);
        assert_eq!(out.completed[3].1, "R6");
    }

    #[tokio::test]
    async fn last_batch_may_be_short() {
        let clf = Upper::new();
        let out = run_batches(&records(7), &policy(3, 0), &clf, &telemetry::categorize()).await.unwrap();
        assert_eq!(out.batches, 3);
        assert_eq!(out.completed.len(), 7);
        assert!(out.failed.is_empty());
        assert_eq!(*clf.calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let clf = Upper { flaky_once: Mutex::new(vec![0]), ..Upper::new() };
        let out = run_batches(&records(3), &policy(3, 2), &clf, &telemetry::define()).await.unwrap();
        assert_eq!(out.completed.len(), 3);
        assert!(out.failed.is_empty());
        assert_eq!(*clf.calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_batches_are_not_retried() {
        let clf = Upper { error_on: vec![0], ..Upper::new() };
        let out = run_batches(&records(6), &policy(3, 3), &clf, &telemetry::define()).await.unwrap();
        assert_eq!(out.failed.len(), 1);
        assert_eq!(out.failed_records(), 3);
        assert_eq!(out.completed.len(), 3);
        assert_eq!(*clf.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let clf = Upper::new();
        let out = run_batches(&Vec::<String>::new(), &policy(4, 0), &clf, &telemetry::define()).await.unwrap();
        assert_eq!(out.batches, 0);
        assert_eq!(*clf.calls.lock().unwrap(), 0);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = BatchPolicy::new(0, Duration::ZERO, RetryPolicy::default()).unwrap_err();
        assert!(err.is_fatal());
    }
}
