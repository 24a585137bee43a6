use nevm_core::Topic;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bus error: {0}")]
    Bus(#[from] nevm_bus::BusError),

    #[error("Core error: {0}")]
    Core(#[from] nevm_core::CoreError),

    #[error("Unexpected acknowledgement on {topic}: {body:?}")]
    UnexpectedAck { topic: String, body: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Loop for {topic} panicked or was cancelled: {reason}")]
    TaskFailed { topic: Topic, reason: String },
}
