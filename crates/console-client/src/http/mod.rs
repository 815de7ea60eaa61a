//! reqwest-backed transport for the console service.
//!
//! One [`HttpTransport`] implements all three seams: the JSON
//! request/response surface, the chunked-text run channel, and the
//! `text/event-stream` push feed.

mod chunks;
mod sse;

use std::collections::VecDeque;
use std::pin::Pin;

use console_core::ClientError;
use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::config::ClientConfig;
use crate::run::RunInput;
use crate::transport::{
    ApiMethod, ApiTransport, ChunkStream, EventStream, InvalidationEvent, PushTransport,
    RunTransport,
};

use chunks::Utf8ChunkDecoder;
use sse::SseDecoder;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// HTTP transport over a validated [`ClientConfig`].
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// Creates a transport from explicit configuration.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::config(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a transport using `CONSOLE_BASE_URL`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    async fn checked_send(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("request to {path} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::status(status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl ApiTransport for HttpTransport {
    async fn request(
        &self,
        method: ApiMethod,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ClientError> {
        let verb = match method {
            ApiMethod::Get => reqwest::Method::GET,
            ApiMethod::Post => reqwest::Method::POST,
            ApiMethod::Patch => reqwest::Method::PATCH,
            ApiMethod::Delete => reqwest::Method::DELETE,
        };
        debug!(event = "api.request", method = method.as_str(), path);
        let mut request = self.client.request(verb, self.config.endpoint(path));
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = self.checked_send(request, path).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::transport(format!("reading body of {path} failed: {e}")))?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::validation(format!("invalid JSON body from {path}: {e}")))
    }
}

#[async_trait::async_trait]
impl RunTransport for HttpTransport {
    async fn open_run(&self, input: &RunInput) -> Result<ChunkStream, ClientError> {
        debug!(event = "run.open", agent = input.agent.as_deref().unwrap_or("default"));
        let request = self
            .client
            .post(self.config.endpoint("/runs"))
            .json(input);
        let response = self.checked_send(request, "/runs").await?;
        Ok(fragment_stream(Box::pin(response.bytes_stream())))
    }
}

#[async_trait::async_trait]
impl PushTransport for HttpTransport {
    async fn connect(&self) -> Result<EventStream, ClientError> {
        let request = self
            .client
            .get(self.config.endpoint("/events"))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let response = self.checked_send(request, "/events").await?;
        Ok(event_stream(Box::pin(response.bytes_stream())))
    }
}

fn fragment_stream(bytes: ByteStream) -> ChunkStream {
    struct State {
        bytes: ByteStream,
        decoder: Utf8ChunkDecoder,
    }

    Box::pin(stream::try_unfold(
        State {
            bytes,
            decoder: Utf8ChunkDecoder::default(),
        },
        |mut state| async move {
            loop {
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let fragment = state.decoder.push_chunk(&chunk)?;
                        if fragment.is_empty() {
                            continue;
                        }
                        return Ok(Some((fragment, state)));
                    }
                    Some(Err(e)) => {
                        return Err(ClientError::transport(format!(
                            "run stream read failed: {e}"
                        )));
                    }
                    None => {
                        state.decoder.finish()?;
                        return Ok(None);
                    }
                }
            }
        },
    ))
}

fn event_stream(bytes: ByteStream) -> EventStream {
    struct State {
        bytes: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<sse::PushFrame>,
        done: bool,
    }

    Box::pin(stream::try_unfold(
        State {
            bytes,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    debug!(event = "push.frame", kind = frame.event.as_deref().unwrap_or(""));
                    return Ok(Some((InvalidationEvent, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(state.decoder.push_chunk(&chunk));
                    }
                    Some(Err(e)) => {
                        return Err(ClientError::transport(format!(
                            "push stream read failed: {e}"
                        )));
                    }
                    None => {
                        state.done = true;
                    }
                }
            }
        },
    ))
}
