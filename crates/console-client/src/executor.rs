use std::future::Future;

use console_core::{ClientError, RequestPolicy};
use tokio::sync::watch;
use tracing::debug;

/// Handle used to request cancellation of a policy-governed operation.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Cancellation is observed at the next suspension point: a retry loop
    /// stops before its next attempt, an in-flight attempt is dropped, and
    /// the operation resolves with `ClientError::Cancelled`.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving side of an abort pair, observed by executing operations.
#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Whether an abort has been requested.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once an abort is requested.
    ///
    /// If every handle is dropped without aborting, cancellation can no
    /// longer occur and this future stays pending.
    pub(crate) async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Creates a connected abort handle/signal pair.
pub fn abort_channel() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

/// Executes `op` under `policy`, racing every attempt against the policy
/// timer and the abort signal.
///
/// Retryable failures (timeout, transport, non-success status) are retried
/// immediately while the budget allows; `retries = 0` means exactly one
/// attempt. Success is returned as soon as it occurs and is never retried.
/// An abort wins over the remaining budget and yields `Cancelled`. Each
/// attempt's future is dropped on every exit path, releasing whatever
/// connection it held.
pub async fn execute<T, F, Fut>(
    policy: &RequestPolicy,
    signal: &AbortSignal,
    mut op: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut failures = 0u32;
    loop {
        if signal.is_aborted() {
            return Err(ClientError::Cancelled);
        }
        let attempt = failures + 1;
        debug!(
            event = "request.attempt",
            attempt,
            max_attempts = policy.max_attempts(),
            timeout_ms = policy.timeout.as_millis() as u64
        );

        let mut abort = signal.clone();
        let outcome = tokio::select! {
            _ = abort.aborted() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep(policy.timeout) => Err(ClientError::Timeout),
            result = op() => result,
        };

        match outcome {
            Ok(value) => {
                debug!(event = "request.succeeded", attempt);
                return Ok(value);
            }
            Err(err) if err.is_retryable() && policy.can_retry(attempt) => {
                debug!(
                    event = "request.retry",
                    attempt,
                    next_attempt = attempt + 1,
                    error = %err
                );
                failures = attempt;
            }
            Err(err) => {
                debug!(event = "request.exhausted", attempt, error = %err);
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    fn counting_failure(
        calls: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<(), ClientError>> {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(ClientError::transport("connection refused")))
        }
    }

    #[tokio::test]
    async fn permanently_failing_op_runs_retries_plus_one_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RequestPolicy::new(Duration::from_secs(1), 3);
        let (_handle, signal) = abort_channel();

        let result = execute(&policy, &signal, counting_failure(calls.clone())).await;

        assert!(matches!(result, Err(ClientError::Transport { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_retries_means_exactly_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RequestPolicy::no_retry(Duration::from_secs(1));
        let (_handle, signal) = abort_channel();

        let result = execute(&policy, &signal, counting_failure(calls.clone())).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_is_returned_without_further_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RequestPolicy::new(Duration::from_secs(1), 5);
        let (_handle, signal) = abort_channel();

        let result = execute(&policy, &signal, || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok::<_, ClientError>(42))
        })
        .await;

        assert_eq!(result.expect("success"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_then_success_consumes_two_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RequestPolicy::new(Duration::from_secs(1), 2);
        let (_handle, signal) = abort_channel();

        let result = execute(&policy, &signal, || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if call == 0 {
                Err(ClientError::status(502, "bad gateway"))
            } else {
                Ok("ok")
            })
        })
        .await;

        assert_eq!(result.expect("second attempt succeeds"), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unresolved_op_times_out_at_or_after_the_budget() {
        let timeout = Duration::from_millis(40);
        let policy = RequestPolicy::no_retry(timeout);
        let (_handle, signal) = abort_channel();

        let started = Instant::now();
        let result = execute(&policy, &signal, || std::future::pending::<Result<(), ClientError>>()).await;

        assert!(matches!(result, Err(ClientError::Timeout)));
        assert!(started.elapsed() >= timeout);
    }

    #[tokio::test]
    async fn timeout_consumes_attempts_like_any_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RequestPolicy::new(Duration::from_millis(10), 2);
        let (_handle, signal) = abort_channel();

        let result = execute(&policy, &signal, || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<Result<(), ClientError>>()
        })
        .await;

        assert!(matches!(result, Err(ClientError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_terminal_despite_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RequestPolicy::new(Duration::from_secs(1), 5);
        let (_handle, signal) = abort_channel();

        let result = execute(&policy, &signal, || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err::<(), _>(ClientError::validation("expected array")))
        })
        .await;

        assert!(matches!(result, Err(ClientError::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abort_wins_over_a_pending_attempt() {
        let policy = RequestPolicy::new(Duration::from_secs(30), 5);
        let (handle, signal) = abort_channel();

        let task = tokio::spawn(async move {
            execute(&policy, &signal, || {
                std::future::pending::<Result<(), ClientError>>()
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();

        let result = task.await.expect("task join");
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn abort_before_execution_skips_the_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RequestPolicy::new(Duration::from_secs(1), 5);
        let (handle, signal) = abort_channel();
        handle.abort();

        let result = execute(&policy, &signal, counting_failure(calls.clone())).await;

        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
