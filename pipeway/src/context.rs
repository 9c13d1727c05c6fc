//! Per-stage pipeline node: identity, executor pin, local buffers, bridges.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use log::debug;
use parking_lot::Mutex;
use pipeway_buffer::BufferError;
use pipeway_executor::EventExecutor;

use crate::attr::AttributeMap;
use crate::bridge::Bridge;
use crate::channel::Channel;
use crate::error::{BoxError, PipelineError};
use crate::future::ChannelFuture;
use crate::handler::{Handler, HandlerKind, HandlerKinds};
use crate::holder::{new_slot, BufKind, BufferSlot, ByteBufRef, Msg, MsgBufRef};
use crate::pipeline::{Pipeline, NULL_HANDLE};

/// A stage's node in the pipeline.
///
/// A context binds one [`Handler`] to:
/// - an immutable identity (name, capability set, channel and pipeline
///   backrefs),
/// - `prev`/`next` links into the pipeline's context arena,
/// - an executor pin, decided at registration or on first use and never
///   changed afterwards,
/// - up to one local buffer per declared direction, plus the lazily
///   installed bridges used when an adjacent producer runs on a different
///   executor.
///
/// Handlers receive `&HandlerContext` in every callback and use it to reach
/// their own buffers, the neighbouring buffers, and the event-propagation
/// and outbound-operation entry points.
pub struct HandlerContext {
    name: String,
    kinds: HandlerKinds,
    pub(crate) handler: Mutex<Box<dyn Handler>>,
    pipeline: Weak<Pipeline>,
    channel: Arc<dyn Channel>,
    /// Pinned executor. Not written again once a value is in place.
    executor: OnceLock<Arc<dyn EventExecutor>>,
    pub(crate) prev: AtomicUsize,
    pub(crate) next: AtomicUsize,
    pub(crate) handle: AtomicUsize,
    pub(crate) in_slot: Option<BufferSlot>,
    pub(crate) out_slot: Option<BufferSlot>,
    pub(crate) in_kind: Option<BufKind>,
    pub(crate) out_kind: Option<BufKind>,
    pub(crate) in_bridge: OnceLock<Arc<Bridge>>,
    pub(crate) out_bridge: OnceLock<Arc<Bridge>>,
    removed: AtomicBool,
    released: AtomicBool,
    attrs: AttributeMap,
    self_ref: Weak<HandlerContext>,
}

impl HandlerContext {
    /// Resolves the handler's buffers and builds the context. The context
    /// is not linked into any pipeline yet; splicing happens afterwards,
    /// under the pipeline lock.
    pub(crate) fn build(
        pipeline: Weak<Pipeline>,
        channel: Arc<dyn Channel>,
        name: &str,
        mut handler: Box<dyn Handler>,
        kinds: HandlerKinds,
        executor: Option<Arc<dyn EventExecutor>>,
    ) -> Result<Arc<HandlerContext>, PipelineError> {
        let (in_slot, in_kind) = if kinds.contains(HandlerKind::Inbound) {
            let holder =
                handler
                    .new_inbound_buffer()
                    .map_err(|source| PipelineError::BufferFactory {
                        name: name.to_owned(),
                        direction: "inbound",
                        source,
                    })?;
            let kind = holder.kind();
            (Some(new_slot(holder)), Some(kind))
        } else {
            (None, None)
        };

        let (out_slot, out_kind) = if kinds.contains(HandlerKind::Outbound) {
            let holder =
                handler
                    .new_outbound_buffer()
                    .map_err(|source| PipelineError::BufferFactory {
                        name: name.to_owned(),
                        direction: "outbound",
                        source,
                    })?;
            let kind = holder.kind();
            (Some(new_slot(holder)), Some(kind))
        } else {
            (None, None)
        };

        let executor_cell = OnceLock::new();
        if let Some(executor) = executor {
            let _ = executor_cell.set(executor);
        } else if let Some(event_loop) = channel.event_loop() {
            let _ = executor_cell.set(event_loop);
        }

        Ok(Arc::new_cyclic(|self_ref| HandlerContext {
            name: name.to_owned(),
            kinds,
            handler: Mutex::new(handler),
            pipeline,
            channel,
            executor: executor_cell,
            prev: AtomicUsize::new(NULL_HANDLE),
            next: AtomicUsize::new(NULL_HANDLE),
            handle: AtomicUsize::new(NULL_HANDLE),
            in_slot,
            out_slot,
            in_kind,
            out_kind,
            in_bridge: OnceLock::new(),
            out_bridge: OnceLock::new(),
            removed: AtomicBool::new(false),
            released: AtomicBool::new(false),
            attrs: AttributeMap::new(),
            self_ref: self_ref.clone(),
        }))
    }

    // ---- identity -------------------------------------------------------

    /// The name the handler was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The capability set computed at registration.
    pub fn kinds(&self) -> HandlerKinds {
        self.kinds
    }

    /// The channel this pipeline is attached to.
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// The owning pipeline.
    ///
    /// # Panics
    ///
    /// Panics when called after the pipeline has been dropped; handler
    /// callbacks always run while it is alive.
    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline
            .upgrade()
            .expect("pipeline dropped while context was in use")
    }

    /// The executor this context is pinned to. A context registered before
    /// the channel had an event loop is pinned here, on first use.
    ///
    /// # Panics
    ///
    /// Panics when no executor was assigned and the channel still has no
    /// event loop.
    pub fn executor(&self) -> Arc<dyn EventExecutor> {
        self.executor
            .get_or_init(|| {
                self.channel
                    .event_loop()
                    .expect("channel is not registered and no executor was assigned")
            })
            .clone()
    }

    /// The context's attribute map.
    pub fn attrs(&self) -> &AttributeMap {
        &self.attrs
    }

    /// Creates a future for an operation on this channel.
    pub fn new_future(&self) -> ChannelFuture {
        self.channel.new_future()
    }

    pub(crate) fn arc(&self) -> Arc<HandlerContext> {
        self.self_ref
            .upgrade()
            .expect("context self reference gone")
    }

    pub(crate) fn pipeline_opt(&self) -> Option<Arc<Pipeline>> {
        self.pipeline.upgrade()
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn next_handle(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }

    pub(crate) fn prev_handle(&self) -> usize {
        self.prev.load(Ordering::SeqCst)
    }

    // ---- local buffers --------------------------------------------------

    /// This stage's inbound byte buffer.
    pub fn inbound_byte_buffer(&self) -> Result<ByteBufRef, PipelineError> {
        match (&self.in_slot, self.in_kind) {
            (Some(slot), Some(BufKind::Bytes)) => Ok(ByteBufRef { slot: slot.clone() }),
            _ => Err(PipelineError::NoBuffer("inbound byte")),
        }
    }

    /// This stage's inbound message buffer.
    pub fn inbound_message_buffer(&self) -> Result<MsgBufRef, PipelineError> {
        match (&self.in_slot, self.in_kind) {
            (Some(slot), Some(BufKind::Messages)) => Ok(MsgBufRef { slot: slot.clone() }),
            _ => Err(PipelineError::NoBuffer("inbound message")),
        }
    }

    /// This stage's outbound byte buffer.
    pub fn outbound_byte_buffer(&self) -> Result<ByteBufRef, PipelineError> {
        match (&self.out_slot, self.out_kind) {
            (Some(slot), Some(BufKind::Bytes)) => Ok(ByteBufRef { slot: slot.clone() }),
            _ => Err(PipelineError::NoBuffer("outbound byte")),
        }
    }

    /// This stage's outbound message buffer.
    pub fn outbound_message_buffer(&self) -> Result<MsgBufRef, PipelineError> {
        match (&self.out_slot, self.out_kind) {
            (Some(slot), Some(BufKind::Messages)) => Ok(MsgBufRef { slot: slot.clone() }),
            _ => Err(PipelineError::NoBuffer("outbound message")),
        }
    }

    /// `true` when this stage declared an inbound byte buffer.
    pub fn has_inbound_byte_buffer(&self) -> bool {
        self.in_kind == Some(BufKind::Bytes)
    }

    /// `true` when this stage declared an inbound message buffer.
    pub fn has_inbound_message_buffer(&self) -> bool {
        self.in_kind == Some(BufKind::Messages)
    }

    /// `true` when this stage declared an outbound byte buffer.
    pub fn has_outbound_byte_buffer(&self) -> bool {
        self.out_kind == Some(BufKind::Bytes)
    }

    /// `true` when this stage declared an outbound message buffer.
    pub fn has_outbound_message_buffer(&self) -> bool {
        self.out_kind == Some(BufKind::Messages)
    }

    // ---- neighbouring buffers ------------------------------------------

    /// The next inbound byte buffer in the forward direction. When that
    /// stage runs on a different executor, this is its bridge intake
    /// instead of its local buffer.
    pub fn next_inbound_byte_buffer(&self) -> Result<ByteBufRef, PipelineError> {
        self.pipeline().next_inbound_byte_buffer_from(self.next_handle())
    }

    /// The next inbound message buffer in the forward direction.
    pub fn next_inbound_message_buffer(&self) -> Result<MsgBufRef, PipelineError> {
        self.pipeline()
            .next_inbound_message_buffer_from(self.next_handle())
    }

    /// The next outbound byte buffer in the backward direction.
    pub fn next_outbound_byte_buffer(&self) -> Result<ByteBufRef, PipelineError> {
        self.pipeline()
            .next_outbound_byte_buffer_from(self.prev_handle())
    }

    /// The next outbound message buffer in the backward direction.
    pub fn next_outbound_message_buffer(&self) -> Result<MsgBufRef, PipelineError> {
        self.pipeline()
            .next_outbound_message_buffer_from(self.prev_handle())
    }

    /// `true` when some forward stage declares an inbound byte buffer.
    pub fn has_next_inbound_byte_buffer(&self) -> bool {
        self.pipeline()
            .has_next_inbound_buffer(self.next_handle(), BufKind::Bytes)
    }

    /// `true` when some forward stage declares an inbound message buffer.
    pub fn has_next_inbound_message_buffer(&self) -> bool {
        self.pipeline()
            .has_next_inbound_buffer(self.next_handle(), BufKind::Messages)
    }

    /// `true` when some backward stage declares an outbound byte buffer.
    pub fn has_next_outbound_byte_buffer(&self) -> bool {
        self.pipeline()
            .has_next_outbound_buffer(self.prev_handle(), BufKind::Bytes)
    }

    /// `true` when some backward stage declares an outbound message buffer.
    pub fn has_next_outbound_message_buffer(&self) -> bool {
        self.pipeline()
            .has_next_outbound_buffer(self.prev_handle(), BufKind::Messages)
    }

    // ---- inbound propagation -------------------------------------------

    /// Fires `channel_registered` at the next state stage.
    pub fn fire_channel_registered(&self) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        if let Some(next) = pipeline.next_context(self.next_handle(), HandlerKind::State) {
            pipeline.invoke_channel_registered(&next);
        }
    }

    /// Fires `channel_unregistered` at the next state stage.
    pub fn fire_channel_unregistered(&self) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        if let Some(next) = pipeline.next_context(self.next_handle(), HandlerKind::State) {
            pipeline.invoke_channel_unregistered(&next);
        }
    }

    /// Fires `channel_active` at the next state stage.
    pub fn fire_channel_active(&self) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        if let Some(next) = pipeline.next_context(self.next_handle(), HandlerKind::State) {
            pipeline.invoke_channel_active(&next);
        }
    }

    /// Fires `channel_inactive` at the next state stage.
    pub fn fire_channel_inactive(&self) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        if let Some(next) = pipeline.next_context(self.next_handle(), HandlerKind::State) {
            pipeline.invoke_channel_inactive(&next);
        }
    }

    /// Announces that this stage produced inbound data.
    ///
    /// Resolved on this stage's executor: the next state stage's bridges
    /// are filled here (the producer side), then its
    /// `inbound_buffer_updated` runs on its own executor after the bridge
    /// content has been drained into its local buffer.
    pub fn fire_inbound_buffer_updated(&self) {
        let this = self.arc();
        let task = move || {
            let Some(pipeline) = this.pipeline_opt() else { return };
            if let Some(next) = pipeline.next_context(this.next_handle(), HandlerKind::State) {
                next.fill_bridge();
                pipeline.invoke_inbound_buffer_updated(&next);
            }
        };
        let executor = self.executor();
        if executor.in_event_loop() {
            task();
        } else {
            executor.execute(Box::new(task));
        }
    }

    /// Routes `cause` to the literal next stage, whatever its kind. A cause
    /// with no next stage is logged and dropped.
    pub fn fire_exception_caught(&self, cause: BoxError) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        pipeline.fire_exception_caught_from(self.next_handle(), cause);
    }

    /// Passes `event` to the literal next stage, unmodified.
    pub fn fire_user_event_triggered(&self, event: Msg) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        if let Some(next) = pipeline.ctx_at(self.next_handle()) {
            pipeline.invoke_user_event_triggered(&next, event);
        }
    }

    // ---- outbound operations -------------------------------------------

    /// Starts a bind at the previous operation stage.
    pub fn bind(&self, addr: SocketAddr) -> ChannelFuture {
        let future = self.new_future();
        self.bind_with(addr, future.clone());
        future
    }

    /// Starts a bind completing the supplied future.
    pub fn bind_with(&self, addr: SocketAddr, future: ChannelFuture) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        if let Some(prev) = pipeline.prev_context(self.prev_handle(), HandlerKind::Operation) {
            pipeline.invoke_bind(&prev, addr, future);
        } else {
            debug!("bind reached the front of the pipeline");
        }
    }

    /// Starts a connect at the previous operation stage.
    pub fn connect(&self, addr: SocketAddr) -> ChannelFuture {
        let future = self.new_future();
        self.connect_with(addr, None, future.clone());
        future
    }

    /// Starts a connect completing the supplied future.
    pub fn connect_with(&self, addr: SocketAddr, local: Option<SocketAddr>, future: ChannelFuture) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        if let Some(prev) = pipeline.prev_context(self.prev_handle(), HandlerKind::Operation) {
            pipeline.invoke_connect(&prev, addr, local, future);
        } else {
            debug!("connect reached the front of the pipeline");
        }
    }

    /// Starts a disconnect at the previous operation stage.
    pub fn disconnect(&self) -> ChannelFuture {
        let future = self.new_future();
        self.disconnect_with(future.clone());
        future
    }

    /// Starts a disconnect completing the supplied future.
    pub fn disconnect_with(&self, future: ChannelFuture) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        if let Some(prev) = pipeline.prev_context(self.prev_handle(), HandlerKind::Operation) {
            pipeline.invoke_disconnect(&prev, future);
        } else {
            debug!("disconnect reached the front of the pipeline");
        }
    }

    /// Starts a close at the previous operation stage.
    pub fn close(&self) -> ChannelFuture {
        let future = self.new_future();
        self.close_with(future.clone());
        future
    }

    /// Starts a close completing the supplied future.
    pub fn close_with(&self, future: ChannelFuture) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        if let Some(prev) = pipeline.prev_context(self.prev_handle(), HandlerKind::Operation) {
            pipeline.invoke_close(&prev, future);
        } else {
            debug!("close reached the front of the pipeline");
        }
    }

    /// Starts a deregister at the previous operation stage.
    pub fn deregister(&self) -> ChannelFuture {
        let future = self.new_future();
        self.deregister_with(future.clone());
        future
    }

    /// Starts a deregister completing the supplied future.
    pub fn deregister_with(&self, future: ChannelFuture) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        if let Some(prev) = pipeline.prev_context(self.prev_handle(), HandlerKind::Operation) {
            pipeline.invoke_deregister(&prev, future);
        } else {
            debug!("deregister reached the front of the pipeline");
        }
    }

    /// Flushes data written by this stage toward the transport.
    pub fn flush(&self) -> ChannelFuture {
        let future = self.new_future();
        self.flush_with(future.clone());
        future
    }

    /// Flushes, completing the supplied future.
    ///
    /// Must make this stage's output visible before the previous operation
    /// stage sees the flush: on this stage's executor, the previous
    /// operation stage's bridges are filled first, then its `flush` runs on
    /// its own executor. Called from a foreign thread, the whole operation
    /// is resubmitted on this stage's executor.
    pub fn flush_with(&self, future: ChannelFuture) {
        let executor = self.executor();
        if executor.in_event_loop() {
            let Some(pipeline) = self.pipeline_opt() else { return };
            if let Some(prev) = pipeline.prev_context(self.prev_handle(), HandlerKind::Operation) {
                prev.fill_bridge();
                pipeline.invoke_flush(&prev, future);
            } else {
                debug!("flush reached the front of the pipeline");
            }
        } else {
            let this = self.arc();
            executor.execute(Box::new(move || this.flush_with(future)));
        }
    }

    /// Writes a message toward the transport and flushes it.
    pub fn write(&self, msg: Msg) -> ChannelFuture {
        let future = self.new_future();
        self.write_with(msg, future.clone());
        future
    }

    /// Writes a message, completing the supplied future once the transport
    /// has taken the flushed data.
    pub fn write_with(&self, msg: Msg, future: ChannelFuture) {
        let Some(pipeline) = self.pipeline_opt() else { return };
        pipeline.write_from(self.prev_handle(), msg, future);
    }

    // ---- bridge plumbing ------------------------------------------------

    /// Publishes any bridge intake content of this context to the exchange
    /// queues. Runs on the producer executor.
    pub(crate) fn fill_bridge(&self) {
        if let Some(bridge) = self.in_bridge.get() {
            bridge.fill();
        }
        if let Some(bridge) = self.out_bridge.get() {
            bridge.fill();
        }
    }

    /// Drains bridge exchange queues into this context's local buffers.
    /// Runs on this context's executor.
    pub(crate) fn flush_bridge(&self) -> Result<(), BufferError> {
        if let (Some(bridge), Some(slot)) = (self.in_bridge.get(), &self.in_slot) {
            bridge.flush_into(&mut slot.lock())?;
        }
        if let (Some(bridge), Some(slot)) = (self.out_bridge.get(), &self.out_slot) {
            bridge.flush_into(&mut slot.lock())?;
        }
        Ok(())
    }

    /// The inbound bridge, installing it on first use.
    pub(crate) fn inbound_bridge(&self, kind: BufKind) -> &Arc<Bridge> {
        self.in_bridge
            .get_or_init(|| Arc::new(Bridge::for_kind(kind)))
    }

    /// The outbound bridge, installing it on first use.
    pub(crate) fn outbound_bridge(&self, kind: BufKind) -> &Arc<Bridge> {
        self.out_bridge
            .get_or_init(|| Arc::new(Bridge::for_kind(kind)))
    }

    /// Drains the bridges and empties the local buffers. Runs exactly once,
    /// when the context is removed from its pipeline.
    pub(crate) fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.flush_bridge() {
            debug!("dropping bridge content of removed handler {:?}: {}", self.name, err);
        }
        for slot in [&self.in_slot, &self.out_slot].into_iter().flatten() {
            let mut holder = slot.lock();
            if let Some(buf) = holder.as_bytes_mut() {
                let readable = buf.readable_bytes();
                let _ = buf.skip_bytes(readable);
                buf.discard_read_bytes();
            } else if let Some(queue) = holder.as_messages_mut() {
                queue.clear();
            }
        }
    }
}
