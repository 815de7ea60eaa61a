//! Async client runtime for the console resource/agent service.
//!
//! Three cooperating pieces sit behind the [`Console`] facade: a
//! request-policy executor (per-call timeout, bounded retries,
//! cancellation), a streaming run client (ordered fragment delivery plus an
//! aggregated result), and a live-invalidation channel (push-driven,
//! coalesced cache refreshes).
//!
//! # Facade usage
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use console_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let console = Console::connect(
//!     ClientConfig::from_env()?,
//!     RequestPolicy::new(Duration::from_secs(10), 2),
//! )?;
//!
//! let agents = console
//!     .list_agents(&RequestPolicy::new(Duration::from_secs(5), 1))
//!     .await?;
//! println!("{} agents", agents.len());
//!
//! let answer = console
//!     .run(
//!         RunInput::prompt("Summarize the last deployment."),
//!         RequestPolicy::new(Duration::from_secs(30), 1),
//!         |chunk| print!("{chunk}"),
//!     )
//!     .await?;
//! println!();
//! assert!(!answer.is_empty());
//! # Ok(())
//! # }
//! ```

/// Transport configuration (base URL and HTTP client settings).
pub mod config;
/// Request-policy executor and cancellation primitives.
pub mod executor;
/// Caller-facing facade over the runtime pieces.
pub mod facade;
/// reqwest-backed implementation of the transport seams.
pub mod http;
/// Push subscription with coalesced refresh dispatch and reconnect.
pub mod invalidation;
/// Common imports for typical usage.
pub mod prelude;
/// Streaming run client and run lifecycle.
pub mod run;
/// Normalized run stream events.
pub mod stream;
/// Transport seams faked in tests and implemented by [`http`].
pub mod transport;

pub use config::ClientConfig;
pub use console_core::{
    Agent, ClientError, KnowledgeDoc, MemoryEntry, ReconnectBackoff, RequestPolicy, ResourceItem,
    ResourceKind,
};
pub use executor::{AbortHandle, AbortSignal, abort_channel, execute};
pub use facade::Console;
pub use http::HttpTransport;
pub use invalidation::{SubscribeOptions, Subscription, subscribe, subscribe_with_alerts};
pub use run::{RunClient, RunInput, RunState, RunStream};
pub use stream::RunEvent;
pub use transport::{
    ApiMethod, ApiTransport, ChunkStream, EventStream, InvalidationEvent, PushTransport,
    RunTransport,
};
