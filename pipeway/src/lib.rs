//! # Pipeway - Handler Pipelines over Indexed Buffers
//!
//! `pipeway` is the core of an asynchronous network I/O framework in the
//! Netty tradition: a per-connection, dynamically editable chain of
//! user-supplied stages that cooperatively process inbound bytes and
//! messages coming from a transport and outbound bytes and messages
//! travelling back out.
//!
//! ## Core concepts
//!
//! - **[`Pipeline`]**: the doubly-linked chain of stages between the fixed
//!   head (transport-facing) and tail (inbound-terminating) sentinels.
//! - **[`Handler`]**: one stage, declaring its capabilities as a
//!   [`HandlerKinds`] set: `STATE` stages see lifecycle events, `INBOUND`/
//!   `OUTBOUND` stages own a local [`BufferHolder`] per direction, and
//!   `OPERATION` stages see the outbound operations.
//! - **[`HandlerContext`]**: the node binding a handler to its name, its
//!   local buffers, its executor pin and its neighbours.
//! - **Bridges**: when two adjacent stages are pinned to different
//!   executors, their handoff goes through a thread-safe exchange queue
//!   filled on the producer's executor and drained on the consumer's. The
//!   buffers themselves never cross threads.
//!
//! ## Event flow
//!
//! Inbound events (`channel_active`, `inbound_buffer_updated`, ...) travel
//! forward from the head; outbound operations (`write`, `flush`, `close`,
//! ...) travel backward from the calling stage until the head translates
//! them into [`Channel`] transport calls. Errors thrown by handlers are
//! caught at the dispatch site and travel forward as `exception_caught`;
//! a cause that reaches the tail is logged and dropped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pipeway::{Channel, Pipeline};
//! # fn transport() -> Arc<dyn Channel> { unimplemented!() }
//! # struct EchoHandler;
//! # impl pipeway::Handler for EchoHandler {
//! #     fn kinds(&self) -> pipeway::HandlerKinds {
//! #         pipeway::HandlerKinds::of(&[pipeway::HandlerKind::Inbound])
//! #     }
//! #     fn new_inbound_buffer(&mut self) -> Result<pipeway::BufferHolder, pipeway::BoxError> {
//! #         Ok(pipeway::BufferHolder::byte_buffer())
//! #     }
//! # }
//!
//! let channel: Arc<dyn Channel> = transport();
//! let pipeline = Pipeline::new(channel);
//! pipeline.add_last("echo", EchoHandler).unwrap();
//!
//! // Transport side: deposit bytes and fire.
//! pipeline
//!     .inbound_byte_buffer()
//!     .unwrap()
//!     .lock()
//!     .write_bytes(b"hello")
//!     .unwrap();
//! pipeline.fire_inbound_buffer_updated();
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod attr;
pub(crate) mod bridge;
pub(crate) mod channel;
pub(crate) mod context;
pub(crate) mod error;
pub(crate) mod future;
pub(crate) mod handler;
pub(crate) mod holder;
pub(crate) mod pipeline;

pub use attr::AttributeMap;
pub use channel::Channel;
pub use context::HandlerContext;
pub use error::{BoxError, PipelineError};
pub use future::ChannelFuture;
pub use handler::{Handler, HandlerKind, HandlerKinds};
pub use holder::{BufferHolder, ByteBufRef, MessageQueue, Msg, MsgBufRef};
pub use pipeline::Pipeline;

/// The buffer substrate, re-exported for convenience.
pub use pipeway_buffer as buffer;
