//! Multi-part message framing.
//!
//! Each part travels as one length-delimited frame whose first byte is a
//! flag set. `FLAG_MORE` marks that another part of the same message
//! follows. `FLAG_COMMAND` marks a single-frame control message sent from a
//! subscriber to a publisher: `[0x01 | topic]` subscribes, `[0x00 | topic]`
//! unsubscribes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::BusError;
use crate::MAX_FRAME_LEN;

const FLAG_MORE: u8 = 0x01;
const FLAG_COMMAND: u8 = 0x02;
const KNOWN_FLAGS: u8 = FLAG_MORE | FLAG_COMMAND;

const CMD_UNSUBSCRIBE: u8 = 0x00;
const CMD_SUBSCRIBE: u8 = 0x01;

/// Upper bound on parts in one message
const MAX_PARTS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Parts(Vec<Bytes>),
    Subscribe(Bytes),
    Unsubscribe(Bytes),
}

pub struct MultipartCodec {
    inner: LengthDelimitedCodec,
    pending: Vec<Bytes>,
}

impl MultipartCodec {
    pub fn new() -> Self {
        MultipartCodec {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
            pending: Vec::new(),
        }
    }

    fn encode_frame(&mut self, flags: u8, payload: &[u8], dst: &mut BytesMut) -> Result<(), BusError> {
        let mut frame = BytesMut::with_capacity(1 + payload.len());
        frame.put_u8(flags);
        frame.extend_from_slice(payload);
        self.inner.encode(frame.freeze(), dst)?;
        Ok(())
    }
}

impl Default for MultipartCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_command(mut payload: Bytes) -> Result<Message, BusError> {
    if payload.is_empty() {
        return Err(BusError::Transport("empty command frame".to_string()));
    }
    match payload.get_u8() {
        CMD_SUBSCRIBE => Ok(Message::Subscribe(payload)),
        CMD_UNSUBSCRIBE => Ok(Message::Unsubscribe(payload)),
        other => Err(BusError::Transport(format!("unknown command {:#04x}", other))),
    }
}

impl Decoder for MultipartCodec {
    type Item = Message;
    type Error = BusError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, BusError> {
        loop {
            let frame = match self.inner.decode(src) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(None),
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    return Err(BusError::Transport(e.to_string()))
                }
                Err(e) => return Err(e.into()),
            };

            let mut payload = frame.freeze();
            if payload.is_empty() {
                return Err(BusError::Transport("frame without flags".to_string()));
            }
            let flags = payload.get_u8();
            if flags & !KNOWN_FLAGS != 0 {
                return Err(BusError::Transport(format!("unknown frame flags {:#04x}", flags)));
            }

            if flags & FLAG_COMMAND != 0 {
                if flags & FLAG_MORE != 0 || !self.pending.is_empty() {
                    return Err(BusError::Transport(
                        "command frame inside a multi-part message".to_string(),
                    ));
                }
                return decode_command(payload).map(Some);
            }

            self.pending.push(payload);
            if self.pending.len() > MAX_PARTS {
                return Err(BusError::Transport(format!(
                    "message exceeds {} parts",
                    MAX_PARTS
                )));
            }
            if flags & FLAG_MORE == 0 {
                return Ok(Some(Message::Parts(std::mem::take(&mut self.pending))));
            }
        }
    }
}

impl Encoder<Message> for MultipartCodec {
    type Error = BusError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), BusError> {
        match msg {
            Message::Parts(parts) => {
                if parts.is_empty() || parts.len() > MAX_PARTS {
                    return Err(BusError::Transport(format!(
                        "cannot send a message of {} parts",
                        parts.len()
                    )));
                }
                let last = parts.len() - 1;
                for (i, part) in parts.iter().enumerate() {
                    let flags = if i < last { FLAG_MORE } else { 0 };
                    self.encode_frame(flags, part, dst)?;
                }
                Ok(())
            }
            Message::Subscribe(topic) => {
                let mut payload = Vec::with_capacity(1 + topic.len());
                payload.push(CMD_SUBSCRIBE);
                payload.extend_from_slice(&topic);
                self.encode_frame(FLAG_COMMAND, &payload, dst)
            }
            Message::Unsubscribe(topic) => {
                let mut payload = Vec::with_capacity(1 + topic.len());
                payload.push(CMD_UNSUBSCRIBE);
                payload.extend_from_slice(&topic);
                self.encode_frame(FLAG_COMMAND, &payload, dst)
            }
        }
    }
}
