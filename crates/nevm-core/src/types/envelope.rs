use bytes::Bytes;

use crate::error::CoreError;
use crate::types::topic::Topic;

/// Length of the trailing sequence part
pub const SEQUENCE_LEN: usize = 4;

/// The unit exchanged over the bus.
///
/// On the wire this is a multi-part message `[topic][body]` with an optional
/// third part holding a little-endian `u32` sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: Bytes,
    pub body: Bytes,
    pub sequence: Option<u32>,
}

impl Envelope {
    pub fn new(topic: impl Into<Bytes>, body: impl Into<Bytes>) -> Self {
        Envelope {
            topic: topic.into(),
            body: body.into(),
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// The topic as one of the bridge topics, if it is one
    pub fn known_topic(&self) -> Option<Topic> {
        Topic::from_bytes(&self.topic)
    }

    pub fn into_parts(self) -> Vec<Bytes> {
        let mut parts = Vec::with_capacity(3);
        parts.push(self.topic);
        parts.push(self.body);
        if let Some(seq) = self.sequence {
            parts.push(Bytes::copy_from_slice(&seq.to_le_bytes()));
        }
        parts
    }

    pub fn from_parts(parts: Vec<Bytes>) -> Result<Self, CoreError> {
        let mut iter = parts.into_iter();
        let (topic, body) = match (iter.next(), iter.next()) {
            (Some(topic), Some(body)) => (topic, body),
            _ => {
                return Err(CoreError::MalformedPayload(
                    "envelope needs at least topic and body parts".to_string(),
                ))
            }
        };

        let sequence = match iter.next() {
            None => None,
            Some(seq) => {
                let bytes: [u8; SEQUENCE_LEN] = seq.as_ref().try_into().map_err(|_| {
                    CoreError::MalformedPayload(format!(
                        "sequence part is {} bytes, expected {}",
                        seq.len(),
                        SEQUENCE_LEN
                    ))
                })?;
                Some(u32::from_le_bytes(bytes))
            }
        };

        if iter.next().is_some() {
            return Err(CoreError::MalformedPayload(
                "envelope has more than three parts".to_string(),
            ));
        }

        Ok(Envelope {
            topic,
            body,
            sequence,
        })
    }
}
