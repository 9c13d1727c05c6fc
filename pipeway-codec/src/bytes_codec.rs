//! Raw byte-array payload codec: `Vec<u8>` messages on the application
//! side, [`ByteBuf`]s on the wire side.

use pipeway::{
    BoxError, BufferHolder, Handler, HandlerContext, HandlerKind, HandlerKinds, Msg,
};
use pipeway_buffer::ByteBuf;

use crate::error::CodecError;
use crate::message_to_stream_encoder::Encoder;

/// Encodes `Vec<u8>` messages by appending their bytes to the outbound
/// stream. Use through
/// [`MessageToStreamEncoder`](crate::MessageToStreamEncoder).
#[derive(Default)]
pub struct ByteArrayEncoder;

impl ByteArrayEncoder {
    /// Creates an encoder.
    pub fn new() -> Self {
        ByteArrayEncoder
    }
}

impl Encoder for ByteArrayEncoder {
    fn is_encodable(&self, msg: &Msg) -> bool {
        msg.is::<Vec<u8>>()
    }

    fn encode(&mut self, msg: Msg, out: &mut ByteBuf) -> Result<(), BoxError> {
        let bytes = msg
            .downcast::<Vec<u8>>()
            .map_err(|_| CodecError("byte-array encoder expects Vec<u8> messages".to_owned()))?;
        out.write_bytes(&bytes)?;
        Ok(())
    }
}

/// Inbound message stage turning framed [`ByteBuf`] messages into
/// `Vec<u8>` messages; anything else is forwarded untouched.
#[derive(Default)]
pub struct ByteArrayDecoder;

impl ByteArrayDecoder {
    /// Creates a decoder.
    pub fn new() -> Self {
        ByteArrayDecoder
    }
}

impl Handler for ByteArrayDecoder {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::Inbound])
    }

    fn new_inbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Ok(BufferHolder::message_buffer())
    }

    fn inbound_buffer_updated(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        let mut produced = false;
        loop {
            let msg = { ctx.inbound_message_buffer()?.lock().pop_front() };
            let Some(msg) = msg else { break };
            let forward: Msg = match msg.downcast::<ByteBuf>() {
                Ok(frame) => Box::new(frame.to_vec()),
                Err(other) => other,
            };
            ctx.next_inbound_message_buffer()?.lock().push_back(forward);
            produced = true;
        }
        if produced {
            ctx.fire_inbound_buffer_updated();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_appends_message_bytes() {
        let mut encoder = ByteArrayEncoder::new();
        let mut out = ByteBuf::dynamic();
        encoder
            .encode(Box::new(vec![1u8, 2, 3]), &mut out)
            .unwrap();
        encoder.encode(Box::new(vec![4u8]), &mut out).unwrap();
        assert_eq!(out.to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn encoder_only_accepts_byte_vectors() {
        let encoder = ByteArrayEncoder::new();
        assert!(encoder.is_encodable(&(Box::new(vec![0u8]) as Msg)));
        assert!(!encoder.is_encodable(&(Box::new("text") as Msg)));
    }
}
