use std::sync::Arc;

use console_core::{
    Agent, ClientError, KnowledgeDoc, MemoryEntry, RequestPolicy, ResourceItem, ResourceKind,
};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::executor::{self, AbortSignal};
use crate::http::HttpTransport;
use crate::invalidation::{self, SubscribeOptions, Subscription};
use crate::run::{RunClient, RunInput};
use crate::transport::{ApiMethod, ApiTransport, PushTransport, RunTransport};

type ListCache = DashMap<ResourceKind, Vec<ResourceItem>>;

/// Caller-facing composition of the request executor, the streaming run
/// client, and the live-invalidation channel.
///
/// The facade owns the list cache exclusively: entries are replaced
/// wholesale on every successful list fetch (never merged or optimistically
/// patched) and a failed refresh leaves the previous value in place. A push
/// subscription created at construction refreshes every cached kind when the
/// service signals a change.
///
/// Every operation takes the caller's [`RequestPolicy`]; the facade performs
/// no retries beyond what the executor already did and imposes no hidden
/// defaults. Construction spawns tasks and must happen inside a tokio
/// runtime.
pub struct Console {
    api: Arc<dyn ApiTransport>,
    runs: RunClient,
    cache: Arc<ListCache>,
    subscription: Option<Subscription>,
    refresh_worker: Option<tokio::task::JoinHandle<()>>,
}

impl Console {
    /// Connects to the service described by `config`.
    ///
    /// `refresh_policy` governs the cache refreshes triggered by push
    /// events; it is supplied here because those calls have no per-call
    /// caller.
    pub fn connect(config: ClientConfig, refresh_policy: RequestPolicy) -> Result<Self, ClientError> {
        Self::connect_with_options(config, refresh_policy, SubscribeOptions::default())
    }

    /// Connects with explicit push-subscription tuning.
    pub fn connect_with_options(
        config: ClientConfig,
        refresh_policy: RequestPolicy,
        options: SubscribeOptions,
    ) -> Result<Self, ClientError> {
        let transport = Arc::new(HttpTransport::new(config)?);
        Ok(Self::with_transports(
            transport.clone(),
            transport.clone(),
            transport,
            refresh_policy,
            options,
        ))
    }

    /// Assembles a facade over explicit transports.
    ///
    /// This is the seam used by tests and non-HTTP deployments.
    pub fn with_transports(
        api: Arc<dyn ApiTransport>,
        runs: Arc<dyn RunTransport>,
        push: Arc<dyn PushTransport>,
        refresh_policy: RequestPolicy,
        options: SubscribeOptions,
    ) -> Self {
        let cache: Arc<ListCache> = Arc::new(DashMap::new());
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let refresh_worker = tokio::spawn(refresh_worker(
            api.clone(),
            cache.clone(),
            refresh_policy,
            tick_rx,
        ));
        let subscription = invalidation::subscribe(push, options, move || {
            // A full channel already has a refresh queued; this burst
            // collapses into it.
            let _ = tick_tx.try_send(());
        });

        Self {
            api,
            runs: RunClient::new(runs),
            cache,
            subscription: Some(subscription),
            refresh_worker: Some(refresh_worker),
        }
    }

    /// Fetches the current list for `kind` and replaces its cache entry.
    pub async fn list(
        &self,
        kind: ResourceKind,
        policy: &RequestPolicy,
    ) -> Result<Vec<ResourceItem>, ClientError> {
        let items = fetch_list(&self.api, kind, ApiMethod::Get, kind.path(), None, policy).await?;
        self.cache.insert(kind, items.clone());
        Ok(items)
    }

    /// Lists configured agents.
    pub async fn list_agents(&self, policy: &RequestPolicy) -> Result<Vec<Agent>, ClientError> {
        let items = self.list(ResourceKind::Agents, policy).await?;
        Ok(items
            .into_iter()
            .filter_map(|item| match item {
                ResourceItem::Agent(agent) => Some(agent),
                _ => None,
            })
            .collect())
    }

    /// Fetches one agent.
    pub async fn get_agent(
        &self,
        id: &str,
        policy: &RequestPolicy,
    ) -> Result<Agent, ClientError> {
        let path = format!("/agents/{id}");
        let value = request(&self.api, ApiMethod::Get, &path, None, policy).await?;
        match decode_record(ResourceKind::Agents, value)? {
            ResourceItem::Agent(agent) => Ok(agent),
            other => Err(ClientError::validation(format!(
                "expected agent record, got {other:?}"
            ))),
        }
    }

    /// Renames an agent.
    ///
    /// The cache is not touched: the updated list arrives through the next
    /// push-triggered or explicit refresh.
    pub async fn update_agent(
        &self,
        id: &str,
        name: &str,
        policy: &RequestPolicy,
    ) -> Result<Agent, ClientError> {
        let path = format!("/agents/{id}");
        let body = serde_json::json!({ "name": name });
        let value = request(&self.api, ApiMethod::Patch, &path, Some(body), policy).await?;
        match decode_record(ResourceKind::Agents, value)? {
            ResourceItem::Agent(agent) => Ok(agent),
            other => Err(ClientError::validation(format!(
                "expected agent record, got {other:?}"
            ))),
        }
    }

    /// Lists knowledge documents.
    pub async fn list_knowledge(
        &self,
        policy: &RequestPolicy,
    ) -> Result<Vec<KnowledgeDoc>, ClientError> {
        let items = self.list(ResourceKind::Knowledge, policy).await?;
        Ok(items
            .into_iter()
            .filter_map(|item| match item {
                ResourceItem::Knowledge(doc) => Some(doc),
                _ => None,
            })
            .collect())
    }

    /// Lists memory entries.
    pub async fn list_memory(
        &self,
        policy: &RequestPolicy,
    ) -> Result<Vec<MemoryEntry>, ClientError> {
        let items = self.list(ResourceKind::Memory, policy).await?;
        Ok(collect_memory(items))
    }

    /// Searches memory entries.
    ///
    /// Search is list-returning, so its result replaces the memory cache
    /// entry like any other list fetch.
    pub async fn search_memory(
        &self,
        query: &str,
        policy: &RequestPolicy,
    ) -> Result<Vec<MemoryEntry>, ClientError> {
        let body = serde_json::json!({ "query": query });
        let items = fetch_list(
            &self.api,
            ResourceKind::Memory,
            ApiMethod::Post,
            ResourceKind::Memory.path(),
            Some(body),
            policy,
        )
        .await?;
        self.cache.insert(ResourceKind::Memory, items.clone());
        Ok(collect_memory(items))
    }

    /// Deletes one memory entry.
    pub async fn delete_memory(
        &self,
        id: &str,
        policy: &RequestPolicy,
    ) -> Result<(), ClientError> {
        let path = format!("/memory/{id}");
        request(&self.api, ApiMethod::Delete, &path, None, policy).await?;
        Ok(())
    }

    /// Runs the agent, feeding each fragment to `sink` in order, and
    /// resolves with the full concatenated text.
    pub async fn run<F>(
        &self,
        input: RunInput,
        policy: RequestPolicy,
        sink: F,
    ) -> Result<String, ClientError>
    where
        F: FnMut(&str),
    {
        let stream = self.runs.start(input, policy).await?;
        stream.collect_with_sink(sink).await
    }

    /// Lower-level run access for callers that need cancellation or
    /// event-by-event consumption.
    pub fn run_client(&self) -> &RunClient {
        &self.runs
    }

    /// Reads the cached list for `kind` without touching the network.
    pub fn cached(&self, kind: ResourceKind) -> Option<Vec<ResourceItem>> {
        self.cache.get(&kind).map(|entry| entry.value().clone())
    }

    /// Unsubscribes from the push endpoint, waits for in-flight refreshes,
    /// and clears the cache.
    pub async fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe().await;
        }
        if let Some(worker) = self.refresh_worker.take() {
            let _ = worker.await;
        }
        self.cache.clear();
    }
}

/// Signal that can never fire, for operations without a caller-held abort.
fn inert_signal() -> AbortSignal {
    executor::abort_channel().1
}

async fn request(
    api: &Arc<dyn ApiTransport>,
    method: ApiMethod,
    path: &str,
    body: Option<serde_json::Value>,
    policy: &RequestPolicy,
) -> Result<serde_json::Value, ClientError> {
    let signal = inert_signal();
    executor::execute(policy, &signal, || {
        let api = api.clone();
        let path = path.to_string();
        let body = body.clone();
        async move { api.request(method, &path, body).await }
    })
    .await
}

async fn fetch_list(
    api: &Arc<dyn ApiTransport>,
    kind: ResourceKind,
    method: ApiMethod,
    path: &str,
    body: Option<serde_json::Value>,
    policy: &RequestPolicy,
) -> Result<Vec<ResourceItem>, ClientError> {
    let value = request(api, method, path, body, policy).await?;
    decode_list(kind, value)
}

fn decode_list(kind: ResourceKind, value: serde_json::Value) -> Result<Vec<ResourceItem>, ClientError> {
    let rows = value
        .as_array()
        .ok_or_else(|| ClientError::validation(format!("{kind} list body is not an array")))?;
    rows.iter()
        .map(|row| decode_record(kind, row.clone()))
        .collect()
}

fn decode_record(kind: ResourceKind, value: serde_json::Value) -> Result<ResourceItem, ClientError> {
    let decoded = match kind {
        ResourceKind::Agents => serde_json::from_value::<Agent>(value).map(ResourceItem::from),
        ResourceKind::Knowledge => {
            serde_json::from_value::<KnowledgeDoc>(value).map(ResourceItem::from)
        }
        ResourceKind::Memory => {
            serde_json::from_value::<MemoryEntry>(value).map(ResourceItem::from)
        }
    };
    decoded.map_err(|e| ClientError::validation(format!("malformed {kind} record: {e}")))
}

fn collect_memory(items: Vec<ResourceItem>) -> Vec<MemoryEntry> {
    items
        .into_iter()
        .filter_map(|item| match item {
            ResourceItem::Memory(entry) => Some(entry),
            _ => None,
        })
        .collect()
}

async fn refresh_worker(
    api: Arc<dyn ApiTransport>,
    cache: Arc<ListCache>,
    policy: RequestPolicy,
    mut ticks: mpsc::Receiver<()>,
) {
    while ticks.recv().await.is_some() {
        let kinds: Vec<ResourceKind> = cache.iter().map(|entry| *entry.key()).collect();
        debug!(event = "cache.refresh", kinds = kinds.len());
        for kind in kinds {
            match fetch_list(&api, kind, ApiMethod::Get, kind.path(), None, &policy).await {
                Ok(items) => {
                    debug!(event = "cache.replaced", kind = %kind, items = items.len());
                    cache.insert(kind, items);
                }
                // A failed refresh keeps the last good value.
                Err(err) => warn!(event = "cache.refresh_failed", kind = %kind, error = %err),
            }
        }
    }
}
