use std::time::Duration;

use console_core::ClientError;

/// Configuration for the HTTP transport.
///
/// The base URL is the only required setting; it covers every request,
/// streaming run, and push subscription the client issues.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the resource service.
    pub base_url: String,
    /// Connection establishment timeout for the underlying HTTP client.
    ///
    /// Per-call deadlines come from the caller's `RequestPolicy`; this bound
    /// only covers the TCP/TLS handshake.
    pub connect_timeout: Duration,
    /// Optional `User-Agent` header value.
    pub user_agent: Option<String>,
}

impl ClientConfig {
    /// Creates a config with defaults and the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
            user_agent: None,
        }
    }

    /// Builds a config from `CONSOLE_BASE_URL`.
    ///
    /// A missing or empty variable is a fatal configuration error, surfaced
    /// here before any request is attempted.
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = std::env::var("CONSOLE_BASE_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(ClientError::config(
                "missing CONSOLE_BASE_URL for the console service",
            ));
        }
        Ok(Self::new(base_url))
    }

    /// Overrides the connection establishment timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the `User-Agent` header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::config("base url must not be empty"));
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
