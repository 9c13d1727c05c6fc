//! Inbound adapter: a byte-stream stage that repeatedly applies a
//! [`Decoder`] and forwards the produced messages.

use pipeway::{
    BoxError, BufferHolder, Handler, HandlerContext, HandlerKind, HandlerKinds, Msg,
};
use pipeway_buffer::ByteBuf;

use crate::error::{is_codec_error, CodecError, DecoderError};

/// Decodes messages out of an accumulated byte stream.
///
/// `decode` is called repeatedly while it keeps producing; return
/// `Ok(None)` once more bytes are needed. A decoder that returns a message
/// must consume bytes, otherwise the adapter reports a [`CodecError`]
/// instead of spinning.
pub trait Decoder: Send + 'static {
    /// Attempts to decode one message from the readable region of `buf`.
    fn decode(&mut self, buf: &mut ByteBuf) -> Result<Option<Msg>, BoxError>;
}

/// Inbound stage driving a boxed [`Decoder`] over its local byte buffer.
///
/// Each produced message is pushed into the next inbound message buffer;
/// one `inbound_buffer_updated` is fired after the decode loop when at
/// least one message was produced. Decode failures travel as
/// `exception_caught`: codec-owned errors unchanged, anything else wrapped
/// in [`DecoderError`].
pub struct StreamToMessageDecoder {
    decoder: Box<dyn Decoder>,
}

impl StreamToMessageDecoder {
    /// Wraps a decoder into an inbound pipeline stage.
    pub fn new(decoder: Box<dyn Decoder>) -> Self {
        StreamToMessageDecoder { decoder }
    }
}

impl Handler for StreamToMessageDecoder {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::Inbound])
    }

    fn new_inbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Ok(BufferHolder::byte_buffer())
    }

    fn inbound_buffer_updated(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        let mut produced = false;
        loop {
            let (result, consumed) = {
                let input = ctx.inbound_byte_buffer()?;
                let mut input = input.lock();
                let before = input.readable_bytes();
                let result = self.decoder.decode(&mut input);
                (result, before - input.readable_bytes())
            };
            match result {
                Ok(Some(msg)) => {
                    if consumed == 0 {
                        ctx.fire_exception_caught(Box::new(CodecError(
                            "decoder produced a message without consuming bytes".to_owned(),
                        )));
                        break;
                    }
                    ctx.next_inbound_message_buffer()?.lock().push_back(msg);
                    produced = true;
                }
                Ok(None) => break,
                Err(cause) => {
                    let cause = if is_codec_error(&cause) {
                        cause
                    } else {
                        Box::new(DecoderError { source: cause })
                    };
                    ctx.fire_exception_caught(cause);
                    break;
                }
            }
        }
        if produced {
            ctx.fire_inbound_buffer_updated();
        }
        Ok(())
    }
}
