use crate::{ClientEvent, ProtocolError, Result, ServerEvent, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Codec for JSON messages with length-prefixed framing
///
/// Frame format: [4-byte length (big-endian)] [JSON payload]
pub struct JsonFrameCodec<D, E> {
    _marker: PhantomData<fn(E) -> D>,
}

/// Scheduler side of a worker connection
pub type ServerCodec = JsonFrameCodec<ClientEvent, ServerEvent>;

/// Worker side of a scheduler connection
pub type WorkerCodec = JsonFrameCodec<ServerEvent, ClientEvent>;

impl<D, E> JsonFrameCodec<D, E> {
    pub fn new() -> Self {
        JsonFrameCodec { _marker: PhantomData }
    }
}

impl<D, E> Default for JsonFrameCodec<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DeserializeOwned, E> Decoder for JsonFrameCodec<D, E> {
    type Item = D;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 4 {
            return Ok(None);
        }

        // Read length prefix without consuming
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let payload = src.split_to(length);
        let message = serde_json::from_slice(&payload)?;

        Ok(Some(message))
    }
}

impl<D, E: Serialize> Encoder<E> for JsonFrameCodec<D, E> {
    type Error = ProtocolError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<()> {
        let payload = serde_json::to_vec(&item)?;

        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(payload.len()));
        }

        dst.reserve(4 + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);

        Ok(())
    }
}

/// Decode a WebSocket text frame into a validated client event
pub fn decode_text(text: &str) -> Result<ClientEvent> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }
    let event: ClientEvent = serde_json::from_str(text)?;
    event.validate()?;
    Ok(event)
}

/// Encode a server event as a WebSocket text frame
pub fn encode_text(event: &ServerEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}
