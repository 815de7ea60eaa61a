/// Terminal error for every client-facing operation.
///
/// Failed operations always surface one of these variants; callers can rely
/// on a distinguishable error rather than an absent value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// An attempt exceeded its policy timeout.
    #[error("request timed out")]
    Timeout,
    /// Connection-level failure before or during a request.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The service answered with a non-success status.
    #[error("status error ({code}): {message}")]
    Status { code: u16, message: String },
    /// A streaming run failed after some output was already delivered.
    ///
    /// `partial` retains every fragment handed to the consumer before the
    /// interruption, in delivery order.
    #[error("stream interrupted after {} bytes: {message}", .partial.len())]
    StreamInterrupted { partial: String, message: String },
    /// The caller aborted the operation.
    #[error("cancelled")]
    Cancelled,
    /// Invalid or missing client configuration.
    #[error("config error: {message}")]
    Config { message: String },
    /// The service answered with a body of an unexpected shape.
    #[error("validation error: {message}")]
    Validation { message: String },
}

impl ClientError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a non-success status error.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Creates a mid-stream interruption error retaining the partial output.
    pub fn interrupted(partial: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StreamInterrupted {
            partial: partial.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a response-shape validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether a retry budget may absorb this failure.
    ///
    /// Timeouts, transport failures, and non-success statuses are attempt
    /// outcomes a policy can retry; everything else is terminal on first
    /// occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Transport { .. } | Self::Status { .. }
        )
    }

    /// Partial streamed output retained by an interruption, if any.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            Self::StreamInterrupted { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
