//! Outbound adapter: a message stage that applies an [`Encoder`] to every
//! queued message on flush and forwards the produced bytes.

use pipeway::{
    BoxError, BufferHolder, ChannelFuture, Handler, HandlerContext, HandlerKind, HandlerKinds, Msg,
};
use pipeway_buffer::ByteBuf;

use crate::error::{is_codec_error, EncoderError};

/// Encodes application messages into bytes.
pub trait Encoder: Send + 'static {
    /// `true` when this encoder can handle `msg`. Messages it cannot
    /// handle are forwarded to the next outbound message buffer untouched.
    fn is_encodable(&self, msg: &Msg) -> bool {
        let _ = msg;
        true
    }

    /// Encodes `msg` into `out`.
    fn encode(&mut self, msg: Msg, out: &mut ByteBuf) -> Result<(), BoxError>;
}

/// Outbound stage draining its message queue through a boxed [`Encoder`]
/// into the next outbound byte buffer on every flush.
///
/// Encode failures travel forward as `exception_caught`: codec-owned
/// errors unchanged, anything else wrapped in [`EncoderError`]. The flush
/// itself still proceeds for whatever was encoded before the failure.
pub struct MessageToStreamEncoder {
    encoder: Box<dyn Encoder>,
}

impl MessageToStreamEncoder {
    /// Wraps an encoder into an outbound pipeline stage.
    pub fn new(encoder: Box<dyn Encoder>) -> Self {
        MessageToStreamEncoder { encoder }
    }
}

impl Handler for MessageToStreamEncoder {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::Outbound])
    }

    fn new_outbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Ok(BufferHolder::message_buffer())
    }

    fn flush(&mut self, ctx: &HandlerContext, future: ChannelFuture) -> Result<(), BoxError> {
        let out = ctx.next_outbound_byte_buffer()?;
        let old_out_size = out.lock().readable_bytes();
        let mut forwarded = false;
        loop {
            let msg = { ctx.outbound_message_buffer()?.lock().pop_front() };
            let Some(msg) = msg else { break };

            if !self.encoder.is_encodable(&msg) {
                ctx.next_outbound_message_buffer()?.lock().push_back(msg);
                forwarded = true;
                continue;
            }

            let result = {
                let mut out = out.lock();
                self.encoder.encode(msg, &mut out)
            };
            if let Err(cause) = result {
                let cause = if is_codec_error(&cause) {
                    cause
                } else {
                    Box::new(EncoderError { source: cause })
                };
                ctx.fire_exception_caught(cause);
            }
        }

        // Flush on actual stream growth, not on encode success: an encoder
        // that appended output and then failed partway through a message
        // still has bytes in `out` that must travel this round.
        if out.lock().readable_bytes() > old_out_size || forwarded {
            ctx.flush_with(future);
        } else {
            future.succeed();
        }
        Ok(())
    }
}
