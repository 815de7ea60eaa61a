use std::sync::Arc;
use std::time::Duration;

use console_core::{ClientError, ReconnectBackoff, ReconnectSchedule};
use futures::StreamExt as _;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::executor::{self, AbortHandle, AbortSignal};
use crate::transport::PushTransport;

/// Tuning for a live push subscription.
#[derive(Clone, Debug)]
pub struct SubscribeOptions {
    /// Quiet period after an event before the refresh fires; further events
    /// inside the window extend it.
    pub debounce: Duration,
    /// Hard cap on how long a refresh may be deferred under constant event
    /// pressure, measured from the first undelivered event.
    pub max_delay: Duration,
    /// Delay schedule for reconnect attempts.
    pub backoff: ReconnectBackoff,
    /// Consecutive connection failures before the error callback fires.
    pub failure_alert_threshold: u32,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            backoff: ReconnectBackoff::default(),
            failure_alert_threshold: 3,
        }
    }
}

impl SubscribeOptions {
    /// Overrides the coalescing quiet period.
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Overrides the coalescing cap.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Overrides the reconnect schedule.
    pub fn backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Overrides the consecutive-failure alert threshold.
    pub fn failure_alert_threshold(mut self, threshold: u32) -> Self {
        self.failure_alert_threshold = threshold;
        self
    }
}

/// Handle for a live push subscription.
///
/// Dropping the handle aborts the subscription best-effort; use
/// [`Subscription::unsubscribe`] to guarantee the callback is quiescent.
pub struct Subscription {
    abort: AbortHandle,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    /// Closes the connection and waits for the dispatch task to stop.
    ///
    /// No callback invocation can occur after this returns.
    pub async fn unsubscribe(mut self) {
        self.abort.abort();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Subscribes to the push endpoint and invokes `on_event` once per coalesced
/// burst of change notifications.
///
/// The callback runs on one task: invocations are serialized, never
/// reentrant, and follow event-arrival order. Connection drops reconnect
/// automatically with backed-off, unbounded attempts; transient reconnects
/// are never surfaced to the caller.
pub fn subscribe<F>(
    transport: Arc<dyn PushTransport>,
    options: SubscribeOptions,
    on_event: F,
) -> Subscription
where
    F: FnMut() + Send + 'static,
{
    subscribe_with_alerts(transport, options, on_event, |_| {})
}

/// Like [`subscribe`], with a callback for persistent connection failures.
///
/// `on_error` fires once per failed attempt after
/// [`SubscribeOptions::failure_alert_threshold`] consecutive failures;
/// reconnection continues regardless.
pub fn subscribe_with_alerts<F, E>(
    transport: Arc<dyn PushTransport>,
    options: SubscribeOptions,
    on_event: F,
    on_error: E,
) -> Subscription
where
    F: FnMut() + Send + 'static,
    E: FnMut(&ClientError) + Send + 'static,
{
    let (abort, signal) = executor::abort_channel();
    let task = tokio::spawn(channel_task(transport, options, on_event, on_error, signal));
    Subscription {
        abort,
        task: Some(task),
    }
}

async fn channel_task<F, E>(
    transport: Arc<dyn PushTransport>,
    options: SubscribeOptions,
    mut on_event: F,
    mut on_error: E,
    signal: AbortSignal,
) where
    F: FnMut() + Send + 'static,
    E: FnMut(&ClientError) + Send + 'static,
{
    let mut schedule = options.backoff.schedule();
    loop {
        if signal.is_aborted() {
            return;
        }

        let connected = {
            let mut abort = signal.clone();
            tokio::select! {
                _ = abort.aborted() => return,
                result = transport.connect() => result,
            }
        };

        match connected {
            Ok(events) => {
                debug!(event = "push.connected");
                let flush_pending =
                    dispatch_events(events, &options, &mut on_event, &mut schedule, &signal).await;
                match flush_pending {
                    Dispatch::Aborted => return,
                    Dispatch::Disconnected { pending } => {
                        // The coalescing window is bounded even across a
                        // drop: a pending refresh fires before the wait.
                        if pending {
                            on_event();
                        }
                    }
                }
            }
            Err(err) => {
                debug!(event = "push.connect_failed", error = %err);
                if wait_before_reconnect(&options, &mut schedule, &mut on_error, &err, &signal)
                    .await
                    .is_err()
                {
                    return;
                }
                continue;
            }
        }

        // Dropped stream: back off before dialing again so a flapping
        // endpoint is not hot-looped.
        let err = ClientError::transport("push connection closed");
        if wait_before_reconnect(&options, &mut schedule, &mut on_error, &err, &signal)
            .await
            .is_err()
        {
            return;
        }
    }
}

struct Aborted;

enum Dispatch {
    Aborted,
    Disconnected { pending: bool },
}

async fn dispatch_events<F>(
    mut events: crate::transport::EventStream,
    options: &SubscribeOptions,
    on_event: &mut F,
    schedule: &mut ReconnectSchedule,
    signal: &AbortSignal,
) -> Dispatch
where
    F: FnMut() + Send + 'static,
{
    // (quiet deadline, hard cap) of the refresh currently being coalesced.
    let mut pending: Option<(Instant, Instant)> = None;
    loop {
        let deadline = pending.map(|(quiet, cap)| quiet.min(cap));
        let mut abort = signal.clone();
        tokio::select! {
            _ = abort.aborted() => return Dispatch::Aborted,
            _ = sleep_until_opt(deadline), if deadline.is_some() => {
                pending = None;
                debug!(event = "push.refresh");
                on_event();
            }
            next = events.next() => match next {
                Some(Ok(_)) => {
                    // A healthy channel resets the reconnect schedule.
                    schedule.reset();
                    let now = Instant::now();
                    pending = Some(match pending {
                        None => (now + options.debounce, now + options.max_delay),
                        Some((_, cap)) => (now + options.debounce, cap),
                    });
                }
                Some(Err(err)) => {
                    warn!(event = "push.stream_error", error = %err);
                    return Dispatch::Disconnected { pending: pending.is_some() };
                }
                None => {
                    debug!(event = "push.stream_closed");
                    return Dispatch::Disconnected { pending: pending.is_some() };
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_before_reconnect<E>(
    options: &SubscribeOptions,
    schedule: &mut ReconnectSchedule,
    on_error: &mut E,
    err: &ClientError,
    signal: &AbortSignal,
) -> Result<(), Aborted>
where
    E: FnMut(&ClientError) + Send + 'static,
{
    let delay = schedule.next_delay();
    warn!(
        event = "push.reconnect_scheduled",
        consecutive_failures = schedule.failures(),
        backoff_ms = delay.as_millis() as u64,
        error = %err
    );
    if schedule.failures() >= options.failure_alert_threshold {
        on_error(err);
    }
    let mut abort = signal.clone();
    tokio::select! {
        _ = abort.aborted() => Err(Aborted),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
