//! # Handler Trait - Stages of a Pipeline
//!
//! A [`Handler`] is one stage of a pipeline. It declares a set of
//! capabilities through [`Handler::kinds`] and receives only the callbacks
//! those capabilities grant:
//!
//! - [`HandlerKind::State`]: channel lifecycle transitions and
//!   `inbound_buffer_updated` notifications.
//! - [`HandlerKind::Inbound`]: a local inbound buffer, created once at
//!   registration through [`Handler::new_inbound_buffer`].
//! - [`HandlerKind::Outbound`]: a local outbound buffer, created once
//!   through [`Handler::new_outbound_buffer`].
//! - [`HandlerKind::Operation`]: the outbound operations
//!   (`bind`/`connect`/`disconnect`/`close`/`deregister`/`flush`).
//!
//! For user handlers, `Inbound` implies `State` and `Outbound` implies
//! `Operation`; registration normalizes the set accordingly.
//!
//! Every callback returns `Result<(), BoxError>`. An `Err` never unwinds
//! through the pipeline: the dispatcher catches it and routes it to the
//! next stage's `exception_caught`.
//!
//! The default implementations forward each event to the next stage, so a
//! handler only implements the callbacks it cares about:
//!
//! ```rust
//! use pipeway::{BoxError, BufferHolder, Handler, HandlerContext, HandlerKind, HandlerKinds};
//!
//! /// Copies every inbound byte back out and flushes.
//! struct EchoHandler;
//!
//! impl Handler for EchoHandler {
//!     fn kinds(&self) -> HandlerKinds {
//!         HandlerKinds::of(&[HandlerKind::Inbound])
//!     }
//!
//!     fn new_inbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
//!         Ok(BufferHolder::byte_buffer())
//!     }
//!
//!     fn inbound_buffer_updated(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
//!         let mut data = {
//!             let input = ctx.inbound_byte_buffer()?;
//!             let mut input = input.lock();
//!             let readable = input.readable_bytes();
//!             input.read_bytes(readable)?
//!         };
//!         {
//!             let out = ctx.next_outbound_byte_buffer()?;
//!             out.lock().write_buf(&mut data)?;
//!         }
//!         ctx.flush();
//!         Ok(())
//!     }
//! }
//! ```

use std::fmt;
use std::net::SocketAddr;

use crate::context::HandlerContext;
use crate::error::BoxError;
use crate::future::ChannelFuture;
use crate::holder::{BufferHolder, Msg};

/// One capability a handler can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Receives lifecycle transitions and inbound-buffer-updated events.
    State,
    /// Owns a local inbound buffer.
    Inbound,
    /// Owns a local outbound buffer.
    Outbound,
    /// Receives outbound operations.
    Operation,
}

impl HandlerKind {
    const fn bit(self) -> u8 {
        match self {
            HandlerKind::State => 1,
            HandlerKind::Inbound => 1 << 1,
            HandlerKind::Outbound => 1 << 2,
            HandlerKind::Operation => 1 << 3,
        }
    }
}

/// A small set of [`HandlerKind`] tags, computed once at registration and
/// used by every pipeline traversal.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerKinds(u8);

impl HandlerKinds {
    /// The empty set.
    pub const EMPTY: HandlerKinds = HandlerKinds(0);

    /// Builds a set from a list of kinds.
    pub const fn of(kinds: &[HandlerKind]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < kinds.len() {
            bits |= kinds[i].bit();
            i += 1;
        }
        HandlerKinds(bits)
    }

    /// Returns the set with `kind` added.
    pub const fn with(self, kind: HandlerKind) -> Self {
        HandlerKinds(self.0 | kind.bit())
    }

    /// `true` when `kind` is in the set.
    pub fn contains(&self, kind: HandlerKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// `true` when no kind is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Applies the user-handler implications: an inbound stage is also a
    /// state stage, an outbound stage is also an operation stage.
    pub(crate) fn normalized(self) -> Self {
        let mut kinds = self;
        if kinds.contains(HandlerKind::Inbound) {
            kinds = kinds.with(HandlerKind::State);
        }
        if kinds.contains(HandlerKind::Outbound) {
            kinds = kinds.with(HandlerKind::Operation);
        }
        kinds
    }
}

impl fmt::Debug for HandlerKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for kind in [
            HandlerKind::State,
            HandlerKind::Inbound,
            HandlerKind::Outbound,
            HandlerKind::Operation,
        ] {
            if self.contains(kind) {
                set.entry(&kind);
            }
        }
        set.finish()
    }
}

/// A pipeline stage. See the [module docs](self) for the capability model.
pub trait Handler: Send + 'static {
    /// The capabilities this handler declares. Queried once at
    /// registration; the answer must not change over the handler's life.
    fn kinds(&self) -> HandlerKinds;

    /// Creates the local inbound buffer. Called exactly once at
    /// registration, before the stage is linked into the pipeline, and only
    /// when the handler declares [`HandlerKind::Inbound`]. Failure aborts
    /// the registration.
    fn new_inbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Err("stage declared INBOUND but provides no inbound buffer".into())
    }

    /// Creates the local outbound buffer. Same contract as
    /// [`new_inbound_buffer`](Handler::new_inbound_buffer), for
    /// [`HandlerKind::Outbound`].
    fn new_outbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Err("stage declared OUTBOUND but provides no outbound buffer".into())
    }

    /// The channel was registered with its event loop.
    fn channel_registered(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        ctx.fire_channel_registered();
        Ok(())
    }

    /// The channel was deregistered from its event loop.
    fn channel_unregistered(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        ctx.fire_channel_unregistered();
        Ok(())
    }

    /// The transport became active (connected).
    fn channel_active(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        ctx.fire_channel_active();
        Ok(())
    }

    /// The transport became inactive (disconnected).
    fn channel_inactive(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        ctx.fire_channel_inactive();
        Ok(())
    }

    /// New data arrived in this stage's inbound buffer. By the time this
    /// runs, any bridge content has already been drained into the local
    /// buffer; after it returns, a fully-read inbound byte buffer is
    /// compacted.
    fn inbound_buffer_updated(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        ctx.fire_inbound_buffer_updated();
        Ok(())
    }

    /// An error is travelling down the pipeline. Delivered to every stage
    /// regardless of capabilities.
    fn exception_caught(&mut self, ctx: &HandlerContext, cause: BoxError) -> Result<(), BoxError> {
        ctx.fire_exception_caught(cause);
        Ok(())
    }

    /// A user event is travelling down the pipeline, unmodified.
    fn user_event_triggered(&mut self, ctx: &HandlerContext, event: Msg) -> Result<(), BoxError> {
        ctx.fire_user_event_triggered(event);
        Ok(())
    }

    /// Outbound bind operation.
    fn bind(
        &mut self,
        ctx: &HandlerContext,
        addr: SocketAddr,
        future: ChannelFuture,
    ) -> Result<(), BoxError> {
        ctx.bind_with(addr, future);
        Ok(())
    }

    /// Outbound connect operation.
    fn connect(
        &mut self,
        ctx: &HandlerContext,
        addr: SocketAddr,
        local: Option<SocketAddr>,
        future: ChannelFuture,
    ) -> Result<(), BoxError> {
        ctx.connect_with(addr, local, future);
        Ok(())
    }

    /// Outbound disconnect operation.
    fn disconnect(&mut self, ctx: &HandlerContext, future: ChannelFuture) -> Result<(), BoxError> {
        ctx.disconnect_with(future);
        Ok(())
    }

    /// Outbound close operation.
    fn close(&mut self, ctx: &HandlerContext, future: ChannelFuture) -> Result<(), BoxError> {
        ctx.close_with(future);
        Ok(())
    }

    /// Outbound deregister operation.
    fn deregister(&mut self, ctx: &HandlerContext, future: ChannelFuture) -> Result<(), BoxError> {
        ctx.deregister_with(future);
        Ok(())
    }

    /// Outbound flush operation: data written toward the transport should
    /// be pushed along. An outbound stage drains its own outbound buffer
    /// here; the default just forwards the flush to the previous operation
    /// stage.
    fn flush(&mut self, ctx: &HandlerContext, future: ChannelFuture) -> Result<(), BoxError> {
        ctx.flush_with(future);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_set_contains_what_it_was_built_from() {
        let kinds = HandlerKinds::of(&[HandlerKind::Inbound, HandlerKind::Operation]);
        assert!(kinds.contains(HandlerKind::Inbound));
        assert!(kinds.contains(HandlerKind::Operation));
        assert!(!kinds.contains(HandlerKind::State));
        assert!(!kinds.contains(HandlerKind::Outbound));
        assert!(HandlerKinds::EMPTY.is_empty());
    }

    #[test]
    fn normalization_applies_the_implications() {
        let kinds = HandlerKinds::of(&[HandlerKind::Inbound, HandlerKind::Outbound]).normalized();
        assert!(kinds.contains(HandlerKind::State));
        assert!(kinds.contains(HandlerKind::Operation));

        let state_only = HandlerKinds::of(&[HandlerKind::State]).normalized();
        assert!(!state_only.contains(HandlerKind::Inbound));
        assert!(!state_only.contains(HandlerKind::Operation));
    }
}
