//! # Pipeway Transport - Embedded Test Channel
//!
//! `pipeway-transport` provides [`EmbeddedStreamChannel`], an in-memory
//! [`Channel`] implementation for exercising pipelines without real I/O:
//! tests push bytes in with [`write_inbound`](EmbeddedStreamChannel::write_inbound),
//! read what the pipeline would have sent to the wire with
//! [`outbound_bytes`](EmbeddedStreamChannel::outbound_bytes), and pop
//! fully-decoded inbound messages with
//! [`read_inbound`](EmbeddedStreamChannel::read_inbound).
//!
//! ```rust
//! use pipeway_transport::EmbeddedStreamChannel;
//! # use pipeway::{BoxError, BufferHolder, Handler, HandlerContext, HandlerKind, HandlerKinds};
//! # struct EchoHandler;
//! # impl Handler for EchoHandler {
//! #     fn kinds(&self) -> HandlerKinds { HandlerKinds::of(&[HandlerKind::Inbound]) }
//! #     fn new_inbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
//! #         Ok(BufferHolder::byte_buffer())
//! #     }
//! #     fn inbound_buffer_updated(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
//! #         let mut data = {
//! #             let input = ctx.inbound_byte_buffer()?;
//! #             let mut input = input.lock();
//! #             let readable = input.readable_bytes();
//! #             input.read_bytes(readable)?
//! #         };
//! #         ctx.next_outbound_byte_buffer()?.lock().write_buf(&mut data)?;
//! #         ctx.flush();
//! #         Ok(())
//! #     }
//! # }
//!
//! let channel = EmbeddedStreamChannel::new();
//! channel.pipeline().add_last("echo", EchoHandler).unwrap();
//! channel.activate();
//!
//! channel.write_inbound(&[0x01, 0x02, 0x03]).unwrap();
//! assert_eq!(channel.outbound_bytes().as_ref(), &[0x01, 0x02, 0x03]);
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod embedded;

pub use embedded::{EmbeddedEventLoop, EmbeddedStreamChannel};
