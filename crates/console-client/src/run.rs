use std::sync::Arc;

use console_core::{ClientError, RequestPolicy};
use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::executor::{self, AbortHandle, AbortSignal};
use crate::stream::RunEvent;
use crate::transport::RunTransport;

const EVENT_BUFFER: usize = 128;

/// Input payload for one streaming run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInput {
    /// Agent to address, when the service hosts more than one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// The prompt text.
    pub prompt: String,
}

impl RunInput {
    /// Creates an input with the given prompt.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            agent: None,
            prompt: text.into(),
        }
    }

    /// Addresses a specific agent.
    pub fn for_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// Lifecycle of one streaming run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// The run was accepted; no output has arrived yet.
    Opened,
    /// At least one fragment has been delivered.
    Receiving,
    /// The channel closed cleanly; the full text is available.
    Closed,
    /// The run ended in an error (interrupted, cancelled, or setup failure).
    Failed,
}

/// Client for the streaming run endpoint.
///
/// Connection setup goes through the request-policy executor and is
/// retryable; once fragments start flowing, a failure ends the run as
/// interrupted and is never retried, because output already handed to the
/// consumer cannot be taken back.
#[derive(Clone)]
pub struct RunClient {
    transport: Arc<dyn RunTransport>,
}

impl RunClient {
    /// Creates a run client over the given transport.
    pub fn new(transport: Arc<dyn RunTransport>) -> Self {
        Self { transport }
    }

    /// Starts a run and returns its streaming handle.
    ///
    /// One run per logical target should be in flight at a time; that is a
    /// caller-context invariant, guarded via [`RunStream::state`].
    pub async fn start(
        &self,
        input: RunInput,
        policy: RequestPolicy,
    ) -> Result<RunStream, ClientError> {
        if input.prompt.trim().is_empty() {
            return Err(ClientError::validation("run prompt must not be empty"));
        }

        let run_id = uuid::Uuid::new_v4();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_handle, abort_signal) = executor::abort_channel();

        tokio::spawn(run_task(
            self.transport.clone(),
            input,
            policy,
            run_id,
            tx,
            final_tx,
            abort_signal,
        ));

        Ok(RunStream {
            run_id,
            rx,
            final_rx,
            abort_handle,
            state: RunState::Opened,
        })
    }
}

/// Streaming handle returned by [`RunClient::start`].
#[derive(Debug)]
pub struct RunStream {
    run_id: uuid::Uuid,
    rx: mpsc::Receiver<RunEvent>,
    final_rx: oneshot::Receiver<Result<String, ClientError>>,
    abort_handle: AbortHandle,
    state: RunState,
}

impl RunStream {
    /// Returns the run id for this stream.
    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    /// Current lifecycle state, updated as events are observed.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Whether the run has not yet reached a terminal state.
    pub fn is_open(&self) -> bool {
        matches!(self.state, RunState::Opened | RunState::Receiving)
    }

    /// Returns a handle that can cancel the run.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for and returns the next event.
    ///
    /// Returns `None` after the event channel is closed.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        let event = self.rx.recv().await;
        match &event {
            Some(RunEvent::Chunk { .. }) => self.state = RunState::Receiving,
            Some(RunEvent::Completed { .. }) => self.state = RunState::Closed,
            Some(RunEvent::Failed { .. }) => self.state = RunState::Failed,
            Some(RunEvent::Started { .. }) | None => {}
        }
        event
    }

    /// Drains the stream (if needed) and returns the terminal result.
    pub async fn finish(mut self) -> Result<String, ClientError> {
        while self.is_open() {
            if self.next_event().await.is_none() {
                break;
            }
        }
        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::transport(
                "run task ended without a final result",
            )),
        }
    }

    /// Feeds every fragment to `sink` in arrival order and resolves with the
    /// full concatenated text.
    pub async fn collect_with_sink<F>(mut self, mut sink: F) -> Result<String, ClientError>
    where
        F: FnMut(&str),
    {
        while let Some(event) = self.next_event().await {
            match &event {
                RunEvent::Chunk { text, .. } => sink(text),
                _ if event.is_terminal() => break,
                _ => {}
            }
        }
        self.finish().await
    }
}

async fn run_task(
    transport: Arc<dyn RunTransport>,
    input: RunInput,
    policy: RequestPolicy,
    run_id: uuid::Uuid,
    tx: mpsc::Sender<RunEvent>,
    final_tx: oneshot::Sender<Result<String, ClientError>>,
    signal: AbortSignal,
) {
    if !send_event(&tx, RunEvent::Started { run_id }).await {
        let _ = final_tx.send(Err(ClientError::Cancelled));
        return;
    }

    let opened = executor::execute(&policy, &signal, || {
        let transport = transport.clone();
        let input = input.clone();
        async move { transport.open_run(&input).await }
    })
    .await;

    let mut chunks = match opened {
        Ok(stream) => stream,
        Err(err) => {
            debug!(run_id = %run_id, error = %err, "run setup failed");
            let _ = send_event(
                &tx,
                RunEvent::Failed {
                    run_id,
                    error: err.clone(),
                },
            )
            .await;
            let _ = final_tx.send(Err(err));
            return;
        }
    };

    let mut signal = signal;
    let mut seq = 0_u64;
    let mut text = String::new();
    loop {
        tokio::select! {
            _ = signal.aborted() => {
                // Fragments not yet handed over are discarded, not delivered.
                let _ = send_event(&tx, RunEvent::Failed { run_id, error: ClientError::Cancelled }).await;
                let _ = final_tx.send(Err(ClientError::Cancelled));
                return;
            }
            next = chunks.next() => {
                match next {
                    Some(Ok(fragment)) => {
                        if fragment.is_empty() {
                            continue;
                        }
                        debug!(run_id = %run_id, seq, bytes = fragment.len() as u64, "run fragment");
                        text.push_str(&fragment);
                        let sent = send_event(&tx, RunEvent::Chunk { run_id, seq, text: fragment }).await;
                        seq = seq.saturating_add(1);
                        if !sent {
                            let _ = final_tx.send(Err(ClientError::Cancelled));
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        let failure = ClientError::interrupted(text, err.to_string());
                        let _ = send_event(&tx, RunEvent::Failed { run_id, error: failure.clone() }).await;
                        let _ = final_tx.send(Err(failure));
                        return;
                    }
                    None => {
                        debug!(run_id = %run_id, fragments = seq, bytes = text.len() as u64, "run closed");
                        let _ = send_event(&tx, RunEvent::Completed { run_id, text: text.clone() }).await;
                        let _ = final_tx.send(Ok(text));
                        return;
                    }
                }
            }
        }
    }
}

async fn send_event(tx: &mpsc::Sender<RunEvent>, event: RunEvent) -> bool {
    tx.send(event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChunkStream;
    use futures::stream;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FakeRunTransport {
        opens: AtomicU32,
        behavior: FakeBehavior,
    }

    enum FakeBehavior {
        Chunks(Vec<Result<String, ClientError>>),
        FailSetupThenChunks(Vec<Result<String, ClientError>>),
        Pending,
    }

    impl FakeRunTransport {
        fn new(behavior: FakeBehavior) -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicU32::new(0),
                behavior,
            })
        }

        fn opens(&self) -> u32 {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl RunTransport for FakeRunTransport {
        async fn open_run(&self, _input: &RunInput) -> Result<ChunkStream, ClientError> {
            let call = self.opens.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                FakeBehavior::Chunks(items) => Ok(Box::pin(stream::iter(items.clone()))),
                FakeBehavior::FailSetupThenChunks(items) => {
                    if call == 0 {
                        Err(ClientError::transport("connection refused"))
                    } else {
                        Ok(Box::pin(stream::iter(items.clone())))
                    }
                }
                FakeBehavior::Pending => Ok(Box::pin(stream::pending())),
            }
        }
    }

    fn ok_chunks(parts: &[&str]) -> Vec<Result<String, ClientError>> {
        parts.iter().map(|p| Ok(p.to_string())).collect()
    }

    fn policy() -> RequestPolicy {
        RequestPolicy::new(Duration::from_secs(1), 0)
    }

    #[tokio::test]
    async fn fragments_reach_the_sink_in_order_and_aggregate() {
        let transport = FakeRunTransport::new(FakeBehavior::Chunks(ok_chunks(&["a", "b", "c"])));
        let client = RunClient::new(transport.clone());
        let stream = client
            .start(RunInput::prompt("hello"), policy())
            .await
            .expect("start");

        let mut seen = Vec::new();
        let text = stream
            .collect_with_sink(|chunk| seen.push(chunk.to_string()))
            .await
            .expect("run");

        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(text, "abc");
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test]
    async fn chunk_seq_is_monotonic_from_zero() {
        let transport = FakeRunTransport::new(FakeBehavior::Chunks(ok_chunks(&["x", "y"])));
        let client = RunClient::new(transport);
        let mut stream = client
            .start(RunInput::prompt("hello"), policy())
            .await
            .expect("start");

        let mut seqs = Vec::new();
        while let Some(event) = stream.next_event().await {
            match event {
                RunEvent::Chunk { seq, .. } => seqs.push(seq),
                RunEvent::Completed { .. } => break,
                _ => {}
            }
        }
        assert_eq!(seqs, vec![0, 1]);
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_partial_and_is_not_reattempted() {
        let transport = FakeRunTransport::new(FakeBehavior::Chunks(vec![
            Ok("a".to_string()),
            Ok("b".to_string()),
            Err(ClientError::transport("connection reset")),
        ]));
        let client = RunClient::new(transport.clone());
        let stream = client
            .start(
                RunInput::prompt("hello"),
                RequestPolicy::new(Duration::from_secs(1), 5),
            )
            .await
            .expect("start");

        let mut seen = Vec::new();
        let err = stream
            .collect_with_sink(|chunk| seen.push(chunk.to_string()))
            .await
            .expect_err("must fail");

        assert_eq!(seen, vec!["a", "b"]);
        assert_eq!(err.partial_text(), Some("ab"));
        assert!(matches!(err, ClientError::StreamInterrupted { .. }));
        // The retry budget applies to setup only; the failed run is not restarted.
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test]
    async fn setup_failures_are_retried_under_the_policy() {
        let transport =
            FakeRunTransport::new(FakeBehavior::FailSetupThenChunks(ok_chunks(&["ok"])));
        let client = RunClient::new(transport.clone());
        let text = client
            .start(
                RunInput::prompt("hello"),
                RequestPolicy::new(Duration::from_secs(1), 1),
            )
            .await
            .expect("start")
            .collect_with_sink(|_| {})
            .await
            .expect("run");

        assert_eq!(text, "ok");
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test]
    async fn exhausted_setup_budget_surfaces_the_failure() {
        let transport = FakeRunTransport::new(FakeBehavior::FailSetupThenChunks(vec![]));
        let client = RunClient::new(transport);
        let err = client
            .start(RunInput::prompt("hello"), policy())
            .await
            .expect("start")
            .finish()
            .await
            .expect_err("setup must fail");

        assert!(matches!(err, ClientError::Transport { .. }));
    }

    #[tokio::test]
    async fn cancel_before_first_fragment_never_touches_the_sink() {
        let transport = FakeRunTransport::new(FakeBehavior::Pending);
        let client = RunClient::new(transport);
        let stream = client
            .start(
                RunInput::prompt("hello"),
                RequestPolicy::new(Duration::from_secs(30), 0),
            )
            .await
            .expect("start");

        let abort = stream.abort_handle();
        let sink_calls = Arc::new(AtomicU32::new(0));
        let counter = sink_calls.clone();
        let task = tokio::spawn(async move {
            stream
                .collect_with_sink(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        abort.abort();

        let result = task.await.expect("join");
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert_eq!(sink_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn state_follows_the_run_lifecycle() {
        let transport = FakeRunTransport::new(FakeBehavior::Chunks(ok_chunks(&["a"])));
        let client = RunClient::new(transport);
        let mut stream = client
            .start(RunInput::prompt("hello"), policy())
            .await
            .expect("start");
        assert_eq!(stream.state(), RunState::Opened);
        assert!(stream.is_open());

        while let Some(event) = stream.next_event().await {
            match event {
                RunEvent::Chunk { .. } => assert_eq!(stream.state(), RunState::Receiving),
                RunEvent::Completed { .. } => break,
                _ => {}
            }
        }
        assert_eq!(stream.state(), RunState::Closed);
        assert!(!stream.is_open());
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_any_connection() {
        let transport = FakeRunTransport::new(FakeBehavior::Pending);
        let client = RunClient::new(transport.clone());
        let err = client
            .start(RunInput::prompt("   "), policy())
            .await
            .expect_err("must reject");
        assert!(matches!(err, ClientError::Validation { .. }));
        assert_eq!(transport.opens(), 0);
    }
}
