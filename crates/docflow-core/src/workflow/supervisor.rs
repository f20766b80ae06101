//! Retry and timeout supervisor for activity attempts.
//!
//! Runs one activity under a `RetryPolicy`: every attempt gets its own
//! deadline, failures are classified by `ErrorKind`, retryable failures are
//! retried with capped exponential backoff, and every attempt is reported to
//! an `AttemptJournal` before the next one starts.

use std::future::Future;

use chrono::Utc;
use docflow_types::error::{ActivityError, ErrorKind};
use docflow_types::workflow::{AttemptOutcome, AttemptRecord, RetryPolicy};

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Durable side of supervision, normally the task's lease in the queue store.
pub trait AttemptJournal: Send + Sync {
    /// Called before each attempt. Returns `false` if the caller no longer
    /// owns the task, in which case supervision stops.
    fn begin_attempt(
        &self,
        attempt: u32,
    ) -> impl Future<Output = Result<bool, SupervisorError>> + Send;

    /// Called after each attempt with its outcome. Returns `false` if the
    /// caller no longer owns the task.
    fn finish_attempt(
        &self,
        record: AttemptRecord,
    ) -> impl Future<Output = Result<bool, SupervisorError>> + Send;
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Final result of a supervised activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Supervised<T> {
    Succeeded { output: T, attempts: u32 },
    /// Permanent failure: non-retryable, or retryable with attempts exhausted.
    Failed { error: ActivityError, attempts: u32 },
    /// Another worker took the task over; this result must not be used.
    LeaseLost { attempts: u32 },
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Applies a `RetryPolicy` to a single activity.
#[derive(Debug, Clone)]
pub struct Supervisor {
    policy: RetryPolicy,
    worker_id: String,
}

impl Supervisor {
    pub fn new(policy: RetryPolicy, worker_id: impl Into<String>) -> Self {
        Self {
            policy,
            worker_id: worker_id.into(),
        }
    }

    /// Whether another attempt may follow failed attempt `attempt` (1-based).
    pub fn should_retry(kind: ErrorKind, attempt: u32, last_attempt: u32) -> bool {
        kind.is_retryable() && attempt < last_attempt
    }

    /// Run `activity` starting at attempt number `first_attempt`.
    ///
    /// `first_attempt` is greater than 1 when a reclaimed task already has
    /// recorded attempts. If it exceeds `max_attempts` (the previous owner's
    /// last attempt succeeded but its result was lost), exactly one more
    /// attempt is made.
    pub async fn run<T, F, Fut, J>(
        &self,
        first_attempt: u32,
        journal: &J,
        mut activity: F,
    ) -> Result<Supervised<T>, SupervisorError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
        J: AttemptJournal,
    {
        let first_attempt = first_attempt.max(1);
        let last_attempt = self.policy.max_attempts.max(first_attempt);
        let deadline = self.policy.attempt_timeout();
        let mut attempt = first_attempt;

        loop {
            if !journal.begin_attempt(attempt).await? {
                return Ok(Supervised::LeaseLost { attempts: attempt - 1 });
            }

            let started_at = Utc::now();
            let result = match tokio::time::timeout(deadline, activity(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ActivityError::timeout(format!(
                    "attempt exceeded {}s deadline",
                    deadline.as_secs()
                ))),
            };
            let finished_at = Utc::now();

            let outcome = match &result {
                Ok(_) => AttemptOutcome::Succeeded,
                Err(err) => AttemptOutcome::Failed {
                    kind: err.kind,
                    message: err.message.clone(),
                },
            };
            let record = AttemptRecord {
                attempt,
                worker_id: self.worker_id.clone(),
                outcome,
                started_at,
                finished_at,
            };
            if !journal.finish_attempt(record).await? {
                return Ok(Supervised::LeaseLost { attempts: attempt });
            }

            let error = match result {
                Ok(output) => {
                    return Ok(Supervised::Succeeded {
                        output,
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            if !Self::should_retry(error.kind, attempt, last_attempt) {
                return Ok(Supervised::Failed {
                    error,
                    attempts: attempt,
                });
            }

            let backoff = self.policy.backoff_after(attempt);
            tracing::warn!(
                worker_id = %self.worker_id,
                attempt,
                kind = %error.kind,
                backoff_ms = backoff.as_millis() as u64,
                error = %error.message,
                "attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that stop supervision without an activity outcome.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The attempt journal could not be written.
    #[error("attempt journal error: {0}")]
    Journal(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingJournal {
        records: Mutex<Vec<AttemptRecord>>,
        revoke_after: Option<u32>,
    }

    impl AttemptJournal for RecordingJournal {
        async fn begin_attempt(&self, attempt: u32) -> Result<bool, SupervisorError> {
            Ok(self.revoke_after.is_none_or(|limit| attempt <= limit))
        }

        async fn finish_attempt(&self, record: AttemptRecord) -> Result<bool, SupervisorError> {
            self.records.lock().unwrap().push(record);
            Ok(true)
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1_000,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
            attempt_timeout_secs: 5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_backs_off_then_succeeds() {
        let supervisor = Supervisor::new(policy(3), "w1");
        let journal = RecordingJournal::default();
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = supervisor
            .run(1, &journal, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(ActivityError::upstream("503"))
                    } else {
                        Ok("text")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, Supervised::Succeeded { output: "text", attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after attempt 1, 2s after attempt 2.
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        let records = journal.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[0].outcome, AttemptOutcome::Failed { .. }));
        assert_eq!(records[2].outcome, AttemptOutcome::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence_is_one_two_four_seconds() {
        let supervisor = Supervisor::new(policy(4), "w1");
        let journal = RecordingJournal::default();
        let start = tokio::time::Instant::now();

        let result = supervisor
            .run(1, &journal, |attempt| async move {
                if attempt < 4 {
                    Err(ActivityError::transient_io("connection reset"))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(result, Supervised::Succeeded { output: (), attempts: 4 });
        assert_eq!(start.elapsed(), Duration::from_secs(1 + 2 + 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_short_circuits() {
        let supervisor = Supervisor::new(policy(3), "w1");
        let journal = RecordingJournal::default();
        let start = tokio::time::Instant::now();

        let result: Supervised<()> = supervisor
            .run(1, &journal, |_| async { Err(ActivityError::parse("not a PDF")) })
            .await
            .unwrap();

        match result {
            Supervised::Failed { error, attempts } => {
                assert_eq!(error.kind, ErrorKind::Parse);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(journal.records.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_become_permanent() {
        let supervisor = Supervisor::new(policy(3), "w1");
        let journal = RecordingJournal::default();

        let result: Supervised<()> = supervisor
            .run(1, &journal, |attempt| async move {
                Err(ActivityError::upstream(format!("503 on attempt {attempt}")))
            })
            .await
            .unwrap();

        match result {
            Supervised::Failed { error, attempts } => {
                assert_eq!(attempts, 3);
                assert_eq!(error.kind, ErrorKind::UpstreamService);
                assert_eq!(error.message, "503 on attempt 3");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_deadline_yields_timeout() {
        let supervisor = Supervisor::new(policy(1), "w1");
        let journal = RecordingJournal::default();

        let result: Supervised<()> = supervisor
            .run(1, &journal, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap();

        match result {
            Supervised::Failed { error, .. } => assert_eq!(error.kind, ErrorKind::Timeout),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_from_recorded_attempt_count() {
        let supervisor = Supervisor::new(policy(3), "w2");
        let journal = RecordingJournal::default();

        let result: Supervised<()> = supervisor
            .run(3, &journal, |_| async { Err(ActivityError::timeout("slow")) })
            .await
            .unwrap();

        assert!(matches!(result, Supervised::Failed { attempts: 3, .. }));
        let records = journal.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempt, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lease_stops_supervision() {
        let supervisor = Supervisor::new(policy(3), "w1");
        let journal = RecordingJournal {
            revoke_after: Some(1),
            ..Default::default()
        };

        let result: Supervised<()> = supervisor
            .run(1, &journal, |_| async { Err(ActivityError::upstream("503")) })
            .await
            .unwrap();

        assert_eq!(result, Supervised::LeaseLost { attempts: 1 });
    }

    #[test]
    fn test_should_retry() {
        assert!(Supervisor::should_retry(ErrorKind::Timeout, 1, 3));
        assert!(Supervisor::should_retry(ErrorKind::TransientIo, 2, 3));
        assert!(!Supervisor::should_retry(ErrorKind::Timeout, 3, 3));
        assert!(!Supervisor::should_retry(ErrorKind::Validation, 1, 3));
    }
}
