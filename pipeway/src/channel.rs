use std::net::SocketAddr;
use std::sync::Arc;

use pipeway_buffer::ByteBuf;
use pipeway_executor::EventExecutor;

use crate::future::ChannelFuture;

/// The transport a pipeline is attached to.
///
/// The core never talks to sockets itself: the head sentinel translates the
/// outbound operations that reach it into `transport_*` calls on this
/// trait, and the transport pushes inbound bytes through
/// [`Pipeline::inbound_byte_buffer`](crate::Pipeline::inbound_byte_buffer)
/// plus the `fire_*` entry points. Concrete transports (sockets, datagram,
/// the embedded test channel) live outside this crate.
pub trait Channel: Send + Sync + 'static {
    /// The event loop this channel is registered with, if any. A context
    /// without an explicitly assigned executor is pinned to this loop the
    /// first time it processes an event.
    fn event_loop(&self) -> Option<Arc<dyn EventExecutor>>;

    /// `true` once the channel has an event loop.
    fn is_registered(&self) -> bool {
        self.event_loop().is_some()
    }

    /// `true` until the channel is closed.
    fn is_open(&self) -> bool;

    /// `true` while the transport is connected.
    fn is_active(&self) -> bool;

    /// Creates a future for an operation on this channel.
    fn new_future(&self) -> ChannelFuture {
        ChannelFuture::new()
    }

    /// Binds the transport to a local address.
    fn transport_bind(&self, addr: SocketAddr, future: &ChannelFuture);

    /// Connects the transport to a remote address.
    fn transport_connect(&self, addr: SocketAddr, local: Option<SocketAddr>, future: &ChannelFuture);

    /// Disconnects the transport.
    fn transport_disconnect(&self, future: &ChannelFuture);

    /// Closes the transport. Implementations fire `channel_inactive` on the
    /// pipeline when the state actually changes.
    fn transport_close(&self, future: &ChannelFuture);

    /// Deregisters the transport from its event loop.
    fn transport_deregister(&self, future: &ChannelFuture);

    /// Writes the readable bytes of `out` to the wire and completes
    /// `future`. Called by the head sentinel with the transport-side
    /// outbound buffer.
    fn transport_flush(&self, out: &mut ByteBuf, future: &ChannelFuture);
}
