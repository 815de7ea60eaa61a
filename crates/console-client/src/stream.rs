use console_core::ClientError;

/// Normalized events exposed by [`crate::run::RunStream`].
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    /// First event for every run.
    Started { run_id: uuid::Uuid },
    /// One text fragment, in arrival order.
    Chunk {
        run_id: uuid::Uuid,
        seq: u64,
        text: String,
    },
    /// Terminal success event with the full concatenated text.
    Completed { run_id: uuid::Uuid, text: String },
    /// Terminal failure event.
    Failed {
        run_id: uuid::Uuid,
        error: ClientError,
    },
}

impl RunEvent {
    /// Whether this event ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Completed { .. } | RunEvent::Failed { .. })
    }
}
