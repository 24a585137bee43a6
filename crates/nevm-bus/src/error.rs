use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Receive timed out")]
    Timeout,

    #[error("Context terminated")]
    Terminated,

    #[error("Endpoint is closed")]
    ClosedEndpoint,

    #[error("Topic mismatch: subscribed to {expected}, received {got}")]
    TopicMismatch { expected: String, got: String },

    #[error("Sequence violation on {topic}: {got} does not follow {last}")]
    SequenceViolation { topic: String, last: u32, got: u32 },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BusError {
    /// Errors that end a receive loop cleanly rather than fatally
    pub fn is_shutdown(&self) -> bool {
        matches!(self, BusError::Terminated)
    }
}
