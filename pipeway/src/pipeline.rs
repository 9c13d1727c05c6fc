//! # Pipeline - The Per-Connection Handler Chain
//!
//! A [`Pipeline`] is a doubly-linked chain of [`HandlerContext`]s between
//! two fixed sentinels:
//!
//! ```text
//!            inbound (fire_*)  ───────────────────────────▶
//!   +------+      +----------+      +----------+      +------+
//!   | HEAD | <──> | handler1 | <──> | handler2 | <──> | TAIL |
//!   +------+      +----------+      +----------+      +------+
//!   ◀─────────────────────────  outbound (write/flush/close)
//!      │                                                  │
//!      ▼                                                  ▼
//!   transport                                   inbound message sink,
//!   operations                                  terminal exception log
//! ```
//!
//! The **head** faces the transport: outbound operations that travel all
//! the way back are translated into [`Channel`] calls, and the transport
//! deposits inbound bytes through
//! [`inbound_byte_buffer`](Pipeline::inbound_byte_buffer) before firing
//! [`fire_inbound_buffer_updated`](Pipeline::fire_inbound_buffer_updated).
//! The **tail** terminates inbound travel: messages that reach it are kept
//! for the test harness and exceptions are logged and dropped.
//!
//! ## Ownership
//!
//! Contexts live in an arena (`Vec<Option<Arc<HandlerContext>>>`); the
//! chain links are arena handles stored as atomics on each context, so the
//! list never owns itself cyclically. Topology mutations
//! (`add_*`/`remove`/`replace`) take the arena write lock; event dispatch
//! resolves contexts under the read lock and then runs with no lock held.
//!
//! ## Dispatch
//!
//! Every event is delivered on the target context's pinned executor: inline
//! when the caller is already on it, as a submitted task otherwise. Handler
//! failures never unwind: they are routed to the next stage's
//! `exception_caught`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use log::{debug, error};
use parking_lot::{Mutex, RwLock};
use pipeway_buffer::ByteBuf;
use pipeway_executor::{EventExecutor, EventExecutorGroup};

use crate::channel::Channel;
use crate::context::HandlerContext;
use crate::error::{BoxError, PipelineError};
use crate::future::ChannelFuture;
use crate::handler::{Handler, HandlerKind, HandlerKinds};
use crate::holder::{BufKind, BufferHolder, ByteBufRef, Msg, MsgBufRef};

/// Link value meaning "no neighbour".
pub(crate) const NULL_HANDLE: usize = usize::MAX;

/// Reserved name of the transport-facing sentinel.
pub(crate) const HEAD_NAME: &str = "PipewayHeadSentinel";
/// Reserved name of the inbound-terminating sentinel.
pub(crate) const TAIL_NAME: &str = "PipewayTailSentinel";

const HEAD: usize = 0;
const TAIL: usize = 1;

/// A callback into a locked handler.
type Callback = Box<dyn FnOnce(&mut dyn Handler, &Arc<HandlerContext>) -> Result<(), BoxError> + Send>;

/// Runs `callback` with the context's handler locked, routing an `Err` to
/// the next stage's `exception_caught`.
///
/// If the handler is already locked, the caller is inside one of its
/// callbacks on this same executor; the delivery is re-queued and runs once
/// the current callback returns, preserving the per-context total order.
fn with_handler(ctx: &Arc<HandlerContext>, callback: Callback) {
    if ctx.is_removed() {
        return;
    }
    match ctx.handler.try_lock() {
        Some(mut handler) => {
            let result = callback(&mut **handler, ctx);
            drop(handler);
            if let Err(cause) = result {
                if let Some(pipeline) = ctx.pipeline_opt() {
                    pipeline.notify_handler_exception(ctx, cause);
                }
            }
        }
        None => {
            let executor = ctx.executor();
            let ctx = ctx.clone();
            executor.execute(Box::new(move || with_handler(&ctx, callback)));
        }
    }
}

/// Like [`with_handler`], for outbound operations: a failing callback also
/// completes the operation's future exceptionally (first completion wins,
/// so a callback that already failed the future is left alone).
fn with_handler_op(ctx: &Arc<HandlerContext>, future: ChannelFuture, callback: Callback) {
    if ctx.is_removed() {
        future.fail(PipelineError::UnknownHandler(ctx.name().to_owned()));
        return;
    }
    match ctx.handler.try_lock() {
        Some(mut handler) => {
            let result = callback(&mut **handler, ctx);
            drop(handler);
            if let Err(cause) = result {
                future.fail(cause.to_string());
                if let Some(pipeline) = ctx.pipeline_opt() {
                    pipeline.notify_handler_exception(ctx, cause);
                }
            }
        }
        None => {
            let executor = ctx.executor();
            let ctx = ctx.clone();
            executor.execute(Box::new(move || with_handler_op(&ctx, future, callback)));
        }
    }
}

/// The per-connection chain of handler contexts.
///
/// Built with [`Pipeline::new`] around a [`Channel`], then populated with
/// the `add_*` family. All methods take `&self`; the pipeline is shared as
/// `Arc<Pipeline>` between the transport, the contexts and any executor
/// tasks in flight.
pub struct Pipeline {
    channel: Arc<dyn Channel>,
    ctxs: RwLock<Vec<Option<Arc<HandlerContext>>>>,
    head: usize,
    tail: usize,
    /// Stable executor-group → child mapping, so every stage of this
    /// pipeline registered against the same group lands on the same child.
    child_executors: Mutex<HashMap<usize, Arc<dyn EventExecutor>>>,
    self_ref: Weak<Pipeline>,
}

enum Anchor<'a> {
    First,
    Last,
    Before(&'a str),
    After(&'a str),
}

impl Pipeline {
    /// Creates a pipeline attached to `channel`, containing only the head
    /// and tail sentinels.
    pub fn new(channel: Arc<dyn Channel>) -> Arc<Pipeline> {
        Arc::new_cyclic(|self_ref: &Weak<Pipeline>| {
            let head = HandlerContext::build(
                self_ref.clone(),
                channel.clone(),
                HEAD_NAME,
                Box::new(HeadHandler {
                    channel: channel.clone(),
                }),
                HandlerKinds::of(&[HandlerKind::Outbound, HandlerKind::Operation]),
                None,
            )
            .expect("head sentinel buffer factory is infallible");
            let tail = HandlerContext::build(
                self_ref.clone(),
                channel.clone(),
                TAIL_NAME,
                Box::new(TailHandler),
                HandlerKinds::of(&[HandlerKind::State, HandlerKind::Inbound]),
                None,
            )
            .expect("tail sentinel buffer factory is infallible");

            head.handle.store(HEAD, Ordering::SeqCst);
            head.next.store(TAIL, Ordering::SeqCst);
            tail.handle.store(TAIL, Ordering::SeqCst);
            tail.prev.store(HEAD, Ordering::SeqCst);

            Pipeline {
                channel,
                ctxs: RwLock::new(vec![Some(head), Some(tail)]),
                head: HEAD,
                tail: TAIL,
                child_executors: Mutex::new(HashMap::new()),
                self_ref: self_ref.clone(),
            }
        })
    }

    /// The channel this pipeline is attached to.
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    fn arc(&self) -> Arc<Pipeline> {
        self.self_ref.upgrade().expect("pipeline self reference gone")
    }

    // ---- arena ----------------------------------------------------------

    pub(crate) fn ctx_at(&self, handle: usize) -> Option<Arc<HandlerContext>> {
        if handle == NULL_HANDLE {
            return None;
        }
        self.ctxs.read().get(handle).and_then(|slot| slot.clone())
    }

    fn head_next(&self) -> usize {
        self.ctx_at(self.head)
            .map(|head| head.next_handle())
            .unwrap_or(NULL_HANDLE)
    }

    /// Walks forward starting at `handle` until a context declaring `kind`
    /// is found.
    pub(crate) fn next_context(
        &self,
        mut handle: usize,
        kind: HandlerKind,
    ) -> Option<Arc<HandlerContext>> {
        loop {
            let ctx = self.ctx_at(handle)?;
            if ctx.kinds().contains(kind) {
                return Some(ctx);
            }
            handle = ctx.next_handle();
        }
    }

    /// Walks backward starting at `handle` until a context declaring `kind`
    /// is found.
    pub(crate) fn prev_context(
        &self,
        mut handle: usize,
        kind: HandlerKind,
    ) -> Option<Arc<HandlerContext>> {
        loop {
            let ctx = self.ctx_at(handle)?;
            if ctx.kinds().contains(kind) {
                return Some(ctx);
            }
            handle = ctx.prev_handle();
        }
    }

    // ---- buffer discovery ----------------------------------------------

    /// Finds the next inbound byte buffer at or after `handle`. When its
    /// owner is pinned to a different executor than the calling thread,
    /// the owner's stream-bridge intake is returned instead of the local
    /// buffer, so the producer never mutates a foreign buffer.
    pub(crate) fn next_inbound_byte_buffer_from(
        &self,
        mut handle: usize,
    ) -> Result<ByteBufRef, PipelineError> {
        loop {
            let Some(ctx) = self.ctx_at(handle) else {
                return Err(PipelineError::NoBuffer("inbound byte"));
            };
            if ctx.in_kind == Some(BufKind::Bytes) {
                let slot = if ctx.executor().in_event_loop() {
                    ctx.in_slot.as_ref().expect("inbound kind implies slot").clone()
                } else {
                    ctx.inbound_bridge(BufKind::Bytes).intake().clone()
                };
                return Ok(ByteBufRef { slot });
            }
            handle = ctx.next_handle();
        }
    }

    /// Finds the next inbound message buffer at or after `handle`.
    pub(crate) fn next_inbound_message_buffer_from(
        &self,
        mut handle: usize,
    ) -> Result<MsgBufRef, PipelineError> {
        loop {
            let Some(ctx) = self.ctx_at(handle) else {
                return Err(PipelineError::NoBuffer("inbound message"));
            };
            if ctx.in_kind == Some(BufKind::Messages) {
                let slot = if ctx.executor().in_event_loop() {
                    ctx.in_slot.as_ref().expect("inbound kind implies slot").clone()
                } else {
                    ctx.inbound_bridge(BufKind::Messages).intake().clone()
                };
                return Ok(MsgBufRef { slot });
            }
            handle = ctx.next_handle();
        }
    }

    /// Finds the next outbound byte buffer at or before `handle`.
    pub(crate) fn next_outbound_byte_buffer_from(
        &self,
        mut handle: usize,
    ) -> Result<ByteBufRef, PipelineError> {
        loop {
            let Some(ctx) = self.ctx_at(handle) else {
                return Err(PipelineError::NoBuffer("outbound byte"));
            };
            if ctx.out_kind == Some(BufKind::Bytes) {
                let slot = if ctx.executor().in_event_loop() {
                    ctx.out_slot.as_ref().expect("outbound kind implies slot").clone()
                } else {
                    ctx.outbound_bridge(BufKind::Bytes).intake().clone()
                };
                return Ok(ByteBufRef { slot });
            }
            handle = ctx.prev_handle();
        }
    }

    /// Finds the next outbound message buffer at or before `handle`.
    pub(crate) fn next_outbound_message_buffer_from(
        &self,
        mut handle: usize,
    ) -> Result<MsgBufRef, PipelineError> {
        loop {
            let Some(ctx) = self.ctx_at(handle) else {
                return Err(PipelineError::NoBuffer("outbound message"));
            };
            if ctx.out_kind == Some(BufKind::Messages) {
                let slot = if ctx.executor().in_event_loop() {
                    ctx.out_slot.as_ref().expect("outbound kind implies slot").clone()
                } else {
                    ctx.outbound_bridge(BufKind::Messages).intake().clone()
                };
                return Ok(MsgBufRef { slot });
            }
            handle = ctx.prev_handle();
        }
    }

    pub(crate) fn has_next_inbound_buffer(&self, mut handle: usize, kind: BufKind) -> bool {
        while let Some(ctx) = self.ctx_at(handle) {
            if ctx.in_kind == Some(kind) {
                return true;
            }
            handle = ctx.next_handle();
        }
        false
    }

    pub(crate) fn has_next_outbound_buffer(&self, mut handle: usize, kind: BufKind) -> bool {
        while let Some(ctx) = self.ctx_at(handle) {
            if ctx.out_kind == Some(kind) {
                return true;
            }
            handle = ctx.prev_handle();
        }
        false
    }

    /// The transport's inbound deposit point: the first inbound byte buffer
    /// of the chain (or its bridge intake when that stage runs on a
    /// different executor than the calling thread).
    pub fn inbound_byte_buffer(&self) -> Result<ByteBufRef, PipelineError> {
        self.next_inbound_byte_buffer_from(self.head_next())
    }

    /// The transport's inbound deposit point for message channels.
    pub fn inbound_message_buffer(&self) -> Result<MsgBufRef, PipelineError> {
        self.next_inbound_message_buffer_from(self.head_next())
    }

    /// Messages that travelled the whole inbound direction and reached the
    /// tail sink. Used by embedded test channels.
    pub fn last_inbound_messages(&self) -> MsgBufRef {
        self.ctx_at(self.tail)
            .and_then(|tail| tail.inbound_message_buffer().ok())
            .expect("tail sentinel declares a message buffer")
    }

    // ---- dispatch -------------------------------------------------------

    fn dispatch(
        &self,
        ctx: &Arc<HandlerContext>,
        f: impl FnOnce(&Arc<HandlerContext>) + Send + 'static,
    ) {
        let executor = ctx.executor();
        if executor.in_event_loop() {
            f(ctx);
        } else {
            let ctx = ctx.clone();
            executor.execute(Box::new(move || f(&ctx)));
        }
    }

    pub(crate) fn invoke_channel_registered(&self, ctx: &Arc<HandlerContext>) {
        self.dispatch(ctx, |ctx| {
            with_handler(ctx, Box::new(|handler, ctx| handler.channel_registered(ctx)));
        });
    }

    pub(crate) fn invoke_channel_unregistered(&self, ctx: &Arc<HandlerContext>) {
        self.dispatch(ctx, |ctx| {
            with_handler(ctx, Box::new(|handler, ctx| handler.channel_unregistered(ctx)));
        });
    }

    pub(crate) fn invoke_channel_active(&self, ctx: &Arc<HandlerContext>) {
        self.dispatch(ctx, |ctx| {
            with_handler(ctx, Box::new(|handler, ctx| handler.channel_active(ctx)));
        });
    }

    pub(crate) fn invoke_channel_inactive(&self, ctx: &Arc<HandlerContext>) {
        self.dispatch(ctx, |ctx| {
            with_handler(ctx, Box::new(|handler, ctx| handler.channel_inactive(ctx)));
        });
    }

    /// Delivers `inbound_buffer_updated` on the target's executor: drain
    /// the bridges into the local buffers first, run the handler, then
    /// compact a fully-read inbound byte buffer to bound memory.
    pub(crate) fn invoke_inbound_buffer_updated(&self, ctx: &Arc<HandlerContext>) {
        self.dispatch(ctx, |ctx| {
            with_handler(
                ctx,
                Box::new(|handler, ctx| {
                    let result = match ctx.flush_bridge() {
                        Ok(()) => handler.inbound_buffer_updated(ctx),
                        Err(err) => Err(BoxError::from(err)),
                    };
                    if let Some(slot) = &ctx.in_slot {
                        let mut holder = slot.lock();
                        if let Some(buf) = holder.as_bytes_mut() {
                            if !buf.is_readable() {
                                buf.discard_read_bytes();
                            }
                        }
                    }
                    result
                }),
            );
        });
    }

    pub(crate) fn invoke_exception_caught(&self, ctx: &Arc<HandlerContext>, cause: BoxError) {
        self.dispatch(ctx, move |ctx| {
            with_handler(
                ctx,
                Box::new(move |handler, ctx| handler.exception_caught(ctx, cause)),
            );
        });
    }

    pub(crate) fn invoke_user_event_triggered(&self, ctx: &Arc<HandlerContext>, event: Msg) {
        self.dispatch(ctx, move |ctx| {
            with_handler(
                ctx,
                Box::new(move |handler, ctx| handler.user_event_triggered(ctx, event)),
            );
        });
    }

    pub(crate) fn invoke_bind(
        &self,
        ctx: &Arc<HandlerContext>,
        addr: SocketAddr,
        future: ChannelFuture,
    ) {
        self.dispatch(ctx, move |ctx| {
            with_handler_op(
                ctx,
                future.clone(),
                Box::new(move |handler, ctx| handler.bind(ctx, addr, future)),
            );
        });
    }

    pub(crate) fn invoke_connect(
        &self,
        ctx: &Arc<HandlerContext>,
        addr: SocketAddr,
        local: Option<SocketAddr>,
        future: ChannelFuture,
    ) {
        self.dispatch(ctx, move |ctx| {
            with_handler_op(
                ctx,
                future.clone(),
                Box::new(move |handler, ctx| handler.connect(ctx, addr, local, future)),
            );
        });
    }

    pub(crate) fn invoke_disconnect(&self, ctx: &Arc<HandlerContext>, future: ChannelFuture) {
        self.dispatch(ctx, move |ctx| {
            with_handler_op(
                ctx,
                future.clone(),
                Box::new(move |handler, ctx| handler.disconnect(ctx, future)),
            );
        });
    }

    pub(crate) fn invoke_close(&self, ctx: &Arc<HandlerContext>, future: ChannelFuture) {
        self.dispatch(ctx, move |ctx| {
            with_handler_op(
                ctx,
                future.clone(),
                Box::new(move |handler, ctx| handler.close(ctx, future)),
            );
        });
    }

    pub(crate) fn invoke_deregister(&self, ctx: &Arc<HandlerContext>, future: ChannelFuture) {
        self.dispatch(ctx, move |ctx| {
            with_handler_op(
                ctx,
                future.clone(),
                Box::new(move |handler, ctx| handler.deregister(ctx, future)),
            );
        });
    }

    pub(crate) fn invoke_flush(&self, ctx: &Arc<HandlerContext>, future: ChannelFuture) {
        self.dispatch(ctx, move |ctx| {
            with_handler_op(
                ctx,
                future.clone(),
                Box::new(move |handler, ctx| handler.flush(ctx, future)),
            );
        });
    }

    /// Routes a handler failure to the stage after `ctx`.
    pub(crate) fn notify_handler_exception(&self, ctx: &Arc<HandlerContext>, cause: BoxError) {
        self.fire_exception_caught_from(ctx.next_handle(), cause);
    }

    pub(crate) fn fire_exception_caught_from(&self, handle: usize, cause: BoxError) {
        match self.ctx_at(handle) {
            Some(next) => self.invoke_exception_caught(&next, cause),
            None => error!("exception reached the end of the pipeline: {cause}"),
        }
    }

    // ---- inbound entry points (transport side) --------------------------

    /// Fires `channel_registered` at the first state stage.
    pub fn fire_channel_registered(&self) {
        if let Some(ctx) = self.next_context(self.head, HandlerKind::State) {
            self.invoke_channel_registered(&ctx);
        }
    }

    /// Fires `channel_unregistered` at the first state stage.
    pub fn fire_channel_unregistered(&self) {
        if let Some(ctx) = self.next_context(self.head, HandlerKind::State) {
            self.invoke_channel_unregistered(&ctx);
        }
    }

    /// Fires `channel_active` at the first state stage.
    pub fn fire_channel_active(&self) {
        if let Some(ctx) = self.next_context(self.head, HandlerKind::State) {
            self.invoke_channel_active(&ctx);
        }
    }

    /// Fires `channel_inactive` at the first state stage.
    pub fn fire_channel_inactive(&self) {
        if let Some(ctx) = self.next_context(self.head, HandlerKind::State) {
            self.invoke_channel_inactive(&ctx);
        }
    }

    /// Announces that the transport deposited inbound data.
    pub fn fire_inbound_buffer_updated(&self) {
        if let Some(head) = self.ctx_at(self.head) {
            head.fire_inbound_buffer_updated();
        }
    }

    /// Routes a transport-observed error through the chain.
    pub fn fire_exception_caught(&self, cause: BoxError) {
        self.fire_exception_caught_from(self.head_next(), cause);
    }

    /// Passes a user event through the chain.
    pub fn fire_user_event_triggered(&self, event: Msg) {
        if let Some(head) = self.ctx_at(self.head) {
            head.fire_user_event_triggered(event);
        }
    }

    // ---- outbound operations (application side) -------------------------

    /// Binds through the chain, back to front.
    pub fn bind(&self, addr: SocketAddr) -> ChannelFuture {
        let future = self.channel.new_future();
        if let Some(ctx) = self.prev_context(self.tail, HandlerKind::Operation) {
            self.invoke_bind(&ctx, addr, future.clone());
        }
        future
    }

    /// Connects through the chain, back to front.
    pub fn connect(&self, addr: SocketAddr, local: Option<SocketAddr>) -> ChannelFuture {
        let future = self.channel.new_future();
        if let Some(ctx) = self.prev_context(self.tail, HandlerKind::Operation) {
            self.invoke_connect(&ctx, addr, local, future.clone());
        }
        future
    }

    /// Disconnects through the chain, back to front.
    pub fn disconnect(&self) -> ChannelFuture {
        let future = self.channel.new_future();
        if let Some(ctx) = self.prev_context(self.tail, HandlerKind::Operation) {
            self.invoke_disconnect(&ctx, future.clone());
        }
        future
    }

    /// Closes through the chain, back to front.
    pub fn close(&self) -> ChannelFuture {
        let future = self.channel.new_future();
        if let Some(ctx) = self.prev_context(self.tail, HandlerKind::Operation) {
            self.invoke_close(&ctx, future.clone());
        }
        future
    }

    /// Deregisters through the chain, back to front.
    pub fn deregister(&self) -> ChannelFuture {
        let future = self.channel.new_future();
        if let Some(ctx) = self.prev_context(self.tail, HandlerKind::Operation) {
            self.invoke_deregister(&ctx, future.clone());
        }
        future
    }

    /// Flushes everything written so far toward the transport.
    pub fn flush(&self) -> ChannelFuture {
        let future = self.channel.new_future();
        if let Some(tail) = self.ctx_at(self.tail) {
            tail.flush_with(future.clone());
        }
        future
    }

    /// Writes a message from the application end and flushes it. The
    /// nearest outbound stage takes the message: a message-form stage
    /// queues it as-is, a byte-form stage (usually the head) requires a
    /// [`ByteBuf`] and appends its readable bytes.
    pub fn write(&self, msg: Msg) -> ChannelFuture {
        let future = self.channel.new_future();
        self.write_from(self.tail, msg, future.clone());
        future
    }

    /// Deposits `msg` at the nearest outbound stage at or before `from`,
    /// then invokes that stage's flush.
    pub(crate) fn write_from(&self, from: usize, msg: Msg, future: ChannelFuture) {
        let mut handle = from;
        let ctx = loop {
            let Some(ctx) = self.ctx_at(handle) else {
                future.fail(PipelineError::NoBuffer("outbound"));
                self.fire_exception_caught_from(
                    self.head_next(),
                    Box::new(PipelineError::NoBuffer("outbound")),
                );
                return;
            };
            if ctx.out_kind.is_some() {
                break ctx;
            }
            handle = ctx.prev_handle();
        };

        let pipeline = self.arc();
        self.dispatch(&ctx, move |ctx| {
            let deposit: Result<(), BoxError> = (|| {
                let slot = ctx.out_slot.as_ref().expect("outbound kind implies slot");
                let mut holder = slot.lock();
                match &mut *holder {
                    BufferHolder::Messages(queue) => {
                        queue.push_back(msg);
                        Ok(())
                    }
                    BufferHolder::Bytes(buf) => match msg.downcast::<ByteBuf>() {
                        Ok(mut bytes) => {
                            buf.write_buf(&mut bytes)?;
                            Ok(())
                        }
                        Err(_) => {
                            Err(Box::new(PipelineError::NoBuffer("outbound message")) as BoxError)
                        }
                    },
                }
            })();
            match deposit {
                Ok(()) => pipeline.invoke_flush(ctx, future),
                Err(cause) => {
                    future.fail(cause.to_string());
                    pipeline.notify_handler_exception(ctx, cause);
                }
            }
        });
    }

    // ---- topology -------------------------------------------------------

    /// Inserts a handler right after the head.
    pub fn add_first(&self, name: &str, handler: impl Handler) -> Result<(), PipelineError> {
        self.add(Anchor::First, None, name, Box::new(handler))
    }

    /// Inserts a handler right after the head, pinned to a child of
    /// `group`.
    pub fn add_first_in(
        &self,
        group: &Arc<dyn EventExecutorGroup>,
        name: &str,
        handler: impl Handler,
    ) -> Result<(), PipelineError> {
        self.add(Anchor::First, Some(group), name, Box::new(handler))
    }

    /// Appends a handler right before the tail.
    pub fn add_last(&self, name: &str, handler: impl Handler) -> Result<(), PipelineError> {
        self.add(Anchor::Last, None, name, Box::new(handler))
    }

    /// Appends a handler right before the tail, pinned to a child of
    /// `group`.
    pub fn add_last_in(
        &self,
        group: &Arc<dyn EventExecutorGroup>,
        name: &str,
        handler: impl Handler,
    ) -> Result<(), PipelineError> {
        self.add(Anchor::Last, Some(group), name, Box::new(handler))
    }

    /// Inserts a handler before the named one.
    pub fn add_before(
        &self,
        existing: &str,
        name: &str,
        handler: impl Handler,
    ) -> Result<(), PipelineError> {
        self.add(Anchor::Before(existing), None, name, Box::new(handler))
    }

    /// Inserts a handler before the named one, pinned to a child of
    /// `group`.
    pub fn add_before_in(
        &self,
        group: &Arc<dyn EventExecutorGroup>,
        existing: &str,
        name: &str,
        handler: impl Handler,
    ) -> Result<(), PipelineError> {
        self.add(Anchor::Before(existing), Some(group), name, Box::new(handler))
    }

    /// Inserts a handler after the named one.
    pub fn add_after(
        &self,
        existing: &str,
        name: &str,
        handler: impl Handler,
    ) -> Result<(), PipelineError> {
        self.add(Anchor::After(existing), None, name, Box::new(handler))
    }

    /// Inserts a handler after the named one, pinned to a child of `group`.
    pub fn add_after_in(
        &self,
        group: &Arc<dyn EventExecutorGroup>,
        existing: &str,
        name: &str,
        handler: impl Handler,
    ) -> Result<(), PipelineError> {
        self.add(Anchor::After(existing), Some(group), name, Box::new(handler))
    }

    fn add(
        &self,
        anchor: Anchor<'_>,
        group: Option<&Arc<dyn EventExecutorGroup>>,
        name: &str,
        handler: Box<dyn Handler>,
    ) -> Result<(), PipelineError> {
        if name == HEAD_NAME || name == TAIL_NAME {
            return Err(PipelineError::ReservedName(name.to_owned()));
        }
        let executor = group.map(|group| self.child_executor(group));
        let kinds = handler.kinds().normalized();
        // Buffers and bridges are resolved before the context is spliced
        // in, so a factory failure leaves the chain untouched.
        let ctx = HandlerContext::build(
            self.self_ref.clone(),
            self.channel.clone(),
            name,
            handler,
            kinds,
            executor,
        )?;

        let mut ctxs = self.ctxs.write();
        if ctxs
            .iter()
            .flatten()
            .any(|existing| existing.name() == name)
        {
            return Err(PipelineError::DuplicateName(name.to_owned()));
        }
        let (prev, next) = match anchor {
            Anchor::First => (self.head, ctxs[self.head].as_ref().expect("head").next_handle()),
            Anchor::Last => (ctxs[self.tail].as_ref().expect("tail").prev_handle(), self.tail),
            Anchor::Before(existing) => {
                let at = Self::position(&ctxs, existing)?;
                (ctxs[at].as_ref().expect("anchor").prev_handle(), at)
            }
            Anchor::After(existing) => {
                let at = Self::position(&ctxs, existing)?;
                (at, ctxs[at].as_ref().expect("anchor").next_handle())
            }
        };

        let handle = match ctxs.iter().position(|slot| slot.is_none()) {
            Some(free) => free,
            None => {
                ctxs.push(None);
                ctxs.len() - 1
            }
        };
        ctx.handle.store(handle, Ordering::SeqCst);
        ctx.prev.store(prev, Ordering::SeqCst);
        ctx.next.store(next, Ordering::SeqCst);
        ctxs[prev].as_ref().expect("prev link").next.store(handle, Ordering::SeqCst);
        ctxs[next].as_ref().expect("next link").prev.store(handle, Ordering::SeqCst);
        ctxs[handle] = Some(ctx);
        Ok(())
    }

    /// Arena slot of the named user handler. Sentinels are not addressable
    /// by name.
    fn position(
        ctxs: &[Option<Arc<HandlerContext>>],
        name: &str,
    ) -> Result<usize, PipelineError> {
        if name == HEAD_NAME || name == TAIL_NAME {
            return Err(PipelineError::UnknownHandler(name.to_owned()));
        }
        ctxs.iter()
            .position(|slot| slot.as_ref().is_some_and(|ctx| ctx.name() == name))
            .ok_or_else(|| PipelineError::UnknownHandler(name.to_owned()))
    }

    /// Removes the named handler. Its bridges are drained and its buffers
    /// released exactly once; no event is delivered to it afterwards.
    pub fn remove(&self, name: &str) -> Result<(), PipelineError> {
        if name == HEAD_NAME || name == TAIL_NAME {
            return Err(PipelineError::ReservedName(name.to_owned()));
        }
        let ctx = {
            let mut ctxs = self.ctxs.write();
            let handle = Self::position(&ctxs, name)?;
            let ctx = ctxs[handle].take().expect("position points at a context");
            let prev = ctx.prev_handle();
            let next = ctx.next_handle();
            ctxs[prev].as_ref().expect("prev link").next.store(next, Ordering::SeqCst);
            ctxs[next].as_ref().expect("next link").prev.store(prev, Ordering::SeqCst);
            ctx.mark_removed();
            ctx
        };
        ctx.release();
        Ok(())
    }

    /// Replaces the named handler with a new one, keeping the position.
    pub fn replace(
        &self,
        old_name: &str,
        new_name: &str,
        handler: impl Handler,
    ) -> Result<(), PipelineError> {
        if old_name == HEAD_NAME || old_name == TAIL_NAME {
            return Err(PipelineError::ReservedName(old_name.to_owned()));
        }
        if new_name == HEAD_NAME || new_name == TAIL_NAME {
            return Err(PipelineError::ReservedName(new_name.to_owned()));
        }
        let kinds = handler.kinds().normalized();
        let new_ctx = HandlerContext::build(
            self.self_ref.clone(),
            self.channel.clone(),
            new_name,
            Box::new(handler),
            kinds,
            None,
        )?;

        let old = {
            let mut ctxs = self.ctxs.write();
            let handle = Self::position(&ctxs, old_name)?;
            if new_name != old_name
                && ctxs.iter().flatten().any(|existing| existing.name() == new_name)
            {
                return Err(PipelineError::DuplicateName(new_name.to_owned()));
            }
            let old = ctxs[handle].take().expect("position points at a context");
            new_ctx.handle.store(handle, Ordering::SeqCst);
            new_ctx.prev.store(old.prev_handle(), Ordering::SeqCst);
            new_ctx.next.store(old.next_handle(), Ordering::SeqCst);
            ctxs[handle] = Some(new_ctx);
            old.mark_removed();
            old
        };
        old.release();
        Ok(())
    }

    /// The context of the named handler, if registered.
    pub fn context(&self, name: &str) -> Option<Arc<HandlerContext>> {
        if name == HEAD_NAME || name == TAIL_NAME {
            return None;
        }
        self.ctxs
            .read()
            .iter()
            .flatten()
            .find(|ctx| ctx.name() == name)
            .cloned()
    }

    /// The registered handler names, front to back.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut handle = self.head_next();
        while handle != NULL_HANDLE && handle != self.tail {
            let Some(ctx) = self.ctx_at(handle) else { break };
            names.push(ctx.name().to_owned());
            handle = ctx.next_handle();
        }
        names
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.names().len()
    }

    /// `true` when no user handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn child_executor(
        &self,
        group: &Arc<dyn EventExecutorGroup>,
    ) -> Arc<dyn EventExecutor> {
        let key = Arc::as_ptr(group) as *const () as usize;
        let mut children = self.child_executors.lock();
        children
            .entry(key)
            .or_insert_with(|| group.next_child())
            .clone()
    }
}

/// Transport-facing sentinel: terminates the outbound operation walk by
/// delegating to the channel, and owns the transport-side outbound byte
/// buffer.
struct HeadHandler {
    channel: Arc<dyn Channel>,
}

impl Handler for HeadHandler {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::Outbound, HandlerKind::Operation])
    }

    fn new_outbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Ok(BufferHolder::byte_buffer())
    }

    fn bind(
        &mut self,
        _ctx: &HandlerContext,
        addr: SocketAddr,
        future: ChannelFuture,
    ) -> Result<(), BoxError> {
        self.channel.transport_bind(addr, &future);
        Ok(())
    }

    fn connect(
        &mut self,
        _ctx: &HandlerContext,
        addr: SocketAddr,
        local: Option<SocketAddr>,
        future: ChannelFuture,
    ) -> Result<(), BoxError> {
        self.channel.transport_connect(addr, local, &future);
        Ok(())
    }

    fn disconnect(&mut self, _ctx: &HandlerContext, future: ChannelFuture) -> Result<(), BoxError> {
        self.channel.transport_disconnect(&future);
        Ok(())
    }

    fn close(&mut self, _ctx: &HandlerContext, future: ChannelFuture) -> Result<(), BoxError> {
        self.channel.transport_close(&future);
        Ok(())
    }

    fn deregister(&mut self, _ctx: &HandlerContext, future: ChannelFuture) -> Result<(), BoxError> {
        self.channel.transport_deregister(&future);
        Ok(())
    }

    fn flush(&mut self, ctx: &HandlerContext, future: ChannelFuture) -> Result<(), BoxError> {
        if !self.channel.is_open() {
            future.fail(PipelineError::ClosedChannel);
            return Err(Box::new(PipelineError::ClosedChannel));
        }
        let out = ctx.outbound_byte_buffer()?;
        let mut out = out.lock();
        self.channel.transport_flush(&mut out, &future);
        Ok(())
    }
}

/// Inbound-terminating sentinel: keeps arrived messages for the harness,
/// logs exceptions that reach the end of the chain.
struct TailHandler;

impl Handler for TailHandler {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::State, HandlerKind::Inbound])
    }

    fn new_inbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Ok(BufferHolder::message_buffer())
    }

    fn inbound_buffer_updated(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        if let Ok(queue) = ctx.inbound_message_buffer() {
            let pending = queue.lock().len();
            if pending > 0 {
                debug!("{pending} inbound message(s) reached the tail of the pipeline");
            }
        }
        Ok(())
    }

    fn exception_caught(&mut self, _ctx: &HandlerContext, cause: BoxError) -> Result<(), BoxError> {
        error!("exception reached the tail of the pipeline: {cause}");
        Ok(())
    }
}
