use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Invalid hash length")]
    InvalidHashLength,

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

impl CoreError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        CoreError::MalformedPayload(msg.into())
    }
}
