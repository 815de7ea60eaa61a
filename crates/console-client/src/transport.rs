use std::pin::Pin;

use console_core::ClientError;
use futures::Stream;

use crate::run::RunInput;

/// HTTP verbs used by the request/response surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl ApiMethod {
    /// Canonical verb name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::Get => "GET",
            ApiMethod::Post => "POST",
            ApiMethod::Patch => "PATCH",
            ApiMethod::Delete => "DELETE",
        }
    }
}

/// An opaque push notification meaning "something changed".
///
/// The channel never interprets event content; the only signal is that a
/// refresh of cached data is due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationEvent;

/// Ordered text fragments of one streaming run.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

/// Push notifications from a live subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<InvalidationEvent, ClientError>> + Send>>;

/// Request/response seam for the JSON resource surface.
///
/// The reqwest implementation lives in [`crate::http::HttpTransport`]; tests
/// register fakes.
#[async_trait::async_trait]
pub trait ApiTransport: Send + Sync {
    /// Issues one request and returns the decoded JSON body.
    ///
    /// Bodiless success responses decode as `Value::Null`. Implementations
    /// map connection failures to `ClientError::Transport` and non-2xx
    /// responses to `ClientError::Status`; they impose no retry of their own.
    async fn request(
        &self,
        method: ApiMethod,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ClientError>;
}

/// Connection seam for streaming runs.
#[async_trait::async_trait]
pub trait RunTransport: Send + Sync {
    /// Opens the response channel for one run.
    ///
    /// Only connection setup is reported through the returned `Result`;
    /// failures after data starts flowing surface as stream items.
    async fn open_run(&self, input: &RunInput) -> Result<ChunkStream, ClientError>;
}

/// Connection seam for the push endpoint.
#[async_trait::async_trait]
pub trait PushTransport: Send + Sync {
    /// Establishes the persistent push connection.
    async fn connect(&self) -> Result<EventStream, ClientError>;
}
