use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};

use bytes::{Bytes, BytesMut};
use log::trace;
use parking_lot::Mutex;
use pipeway::{Channel, ChannelFuture, Msg, Pipeline, PipelineError};
use pipeway_buffer::ByteBuf;
use pipeway_executor::{EventExecutor, Task};

/// The embedded channel's event loop: the thread that created the channel.
///
/// Events dispatched while already on the owner thread run inline through
/// the pipeline's fast path and never reach this queue. Everything
/// submitted through [`execute`](EventExecutor::execute) - deliveries
/// deferred mid-callback and submissions from foreign threads - parks here
/// until [`run_pending_tasks`](EmbeddedEventLoop::run_pending_tasks) runs
/// it with the call stack unwound.
pub struct EmbeddedEventLoop {
    owner: ThreadId,
    queue: Mutex<VecDeque<Task>>,
    draining: AtomicBool,
}

impl EmbeddedEventLoop {
    fn new() -> Arc<Self> {
        Arc::new(EmbeddedEventLoop {
            owner: thread::current().id(),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        })
    }

    fn drain(&self) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let task = self.queue.lock().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        self.draining.store(false, Ordering::SeqCst);
    }

    /// Runs tasks submitted from foreign threads. Must be called on the
    /// owner thread.
    pub fn run_pending_tasks(&self) {
        assert!(
            self.in_event_loop(),
            "run_pending_tasks must run on the embedded channel's thread"
        );
        self.drain();
    }
}

impl EventExecutor for EmbeddedEventLoop {
    fn execute(&self, task: Task) {
        self.queue.lock().push_back(task);
        trace!("embedded loop: task parked for run_pending_tasks");
    }

    fn in_event_loop(&self) -> bool {
        thread::current().id() == self.owner
    }
}

struct EmbeddedInner {
    event_loop: Arc<EmbeddedEventLoop>,
    open: AtomicBool,
    active: AtomicBool,
    outbound: Mutex<BytesMut>,
    pipeline: OnceLock<Weak<Pipeline>>,
}

impl EmbeddedInner {
    fn pipeline(&self) -> Option<Arc<Pipeline>> {
        self.pipeline.get().and_then(Weak::upgrade)
    }
}

impl Channel for EmbeddedInner {
    fn event_loop(&self) -> Option<Arc<dyn EventExecutor>> {
        Some(self.event_loop.clone() as Arc<dyn EventExecutor>)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn transport_bind(&self, _addr: SocketAddr, future: &ChannelFuture) {
        future.succeed();
    }

    fn transport_connect(
        &self,
        _addr: SocketAddr,
        _local: Option<SocketAddr>,
        future: &ChannelFuture,
    ) {
        if !self.active.swap(true, Ordering::SeqCst) {
            if let Some(pipeline) = self.pipeline() {
                pipeline.fire_channel_active();
            }
        }
        future.succeed();
    }

    fn transport_disconnect(&self, future: &ChannelFuture) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(pipeline) = self.pipeline() {
                pipeline.fire_channel_inactive();
            }
        }
        future.succeed();
    }

    fn transport_close(&self, future: &ChannelFuture) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.active.store(false, Ordering::SeqCst);
            if let Some(pipeline) = self.pipeline() {
                pipeline.fire_channel_inactive();
            }
        }
        future.succeed();
    }

    fn transport_deregister(&self, future: &ChannelFuture) {
        future.succeed();
    }

    fn transport_flush(&self, out: &mut ByteBuf, future: &ChannelFuture) {
        if !self.is_open() {
            future.fail(PipelineError::ClosedChannel);
            return;
        }
        let readable = out.readable_bytes();
        if readable > 0 {
            let mut data = vec![0u8; readable];
            if out.read_into(&mut data).is_ok() {
                out.discard_read_bytes();
                self.outbound.lock().extend_from_slice(&data);
            }
        }
        future.succeed();
    }
}

/// An in-memory byte-stream channel for tests.
///
/// The channel is registered with an [`EmbeddedEventLoop`] owned by the
/// creating thread, so by default every pipeline stage runs inline on that
/// thread. Stages registered through the `add_*_in` pipeline methods run on
/// their own executors; completions they trigger back on the channel's loop
/// are picked up by [`run_pending_tasks`](EmbeddedStreamChannel::run_pending_tasks).
pub struct EmbeddedStreamChannel {
    inner: Arc<EmbeddedInner>,
    pipeline: Arc<Pipeline>,
}

impl Default for EmbeddedStreamChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedStreamChannel {
    /// Creates an open, inactive channel with an empty pipeline.
    pub fn new() -> Self {
        let inner = Arc::new(EmbeddedInner {
            event_loop: EmbeddedEventLoop::new(),
            open: AtomicBool::new(true),
            active: AtomicBool::new(false),
            outbound: Mutex::new(BytesMut::new()),
            pipeline: OnceLock::new(),
        });
        let pipeline = Pipeline::new(inner.clone());
        let _ = inner.pipeline.set(Arc::downgrade(&pipeline));
        EmbeddedStreamChannel { inner, pipeline }
    }

    /// The channel's pipeline. Add handlers here before
    /// [`activate`](EmbeddedStreamChannel::activate).
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// The channel's event loop.
    pub fn event_loop(&self) -> &Arc<EmbeddedEventLoop> {
        &self.inner.event_loop
    }

    /// Fires `channel_registered` and `channel_active` through the
    /// pipeline.
    pub fn activate(&self) {
        self.pipeline.fire_channel_registered();
        self.inner.active.store(true, Ordering::SeqCst);
        self.pipeline.fire_channel_active();
        self.run_pending_tasks();
    }

    /// `true` until the channel is closed.
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// `true` while the channel is active.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Deposits bytes at the pipeline's inbound entry point and fires
    /// `inbound_buffer_updated`, as a transport would.
    pub fn write_inbound(&self, data: impl AsRef<[u8]>) -> Result<(), PipelineError> {
        {
            let entry = self.pipeline.inbound_byte_buffer()?;
            entry.lock().write_bytes(data.as_ref())?;
        }
        self.pipeline.fire_inbound_buffer_updated();
        self.run_pending_tasks();
        Ok(())
    }

    /// Writes a message from the application end and flushes it.
    pub fn write(&self, msg: Msg) -> ChannelFuture {
        let future = self.pipeline.write(msg);
        self.run_pending_tasks();
        future
    }

    /// Flushes anything the stages have queued toward the transport.
    pub fn flush(&self) -> ChannelFuture {
        let future = self.pipeline.flush();
        self.run_pending_tasks();
        future
    }

    /// Closes the channel through the pipeline.
    pub fn close(&self) -> ChannelFuture {
        let future = self.pipeline.close();
        self.run_pending_tasks();
        future
    }

    /// Pops the next message that travelled the whole inbound direction.
    pub fn read_inbound(&self) -> Option<Msg> {
        self.pipeline.last_inbound_messages().lock().pop_front()
    }

    /// Pops the next fully-travelled inbound message, downcast to `T`.
    ///
    /// # Panics
    ///
    /// Panics when the message is not a `T`; embedded tests want the
    /// mismatch loud.
    pub fn read_inbound_as<T: 'static>(&self) -> Option<Box<T>> {
        self.read_inbound().map(|msg| {
            msg.downcast::<T>()
                .unwrap_or_else(|_| panic!("inbound message has unexpected type"))
        })
    }

    /// A copy of everything flushed to the "wire" so far.
    pub fn outbound_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.outbound.lock()[..])
    }

    /// Takes everything flushed to the "wire" so far.
    pub fn take_outbound(&self) -> BytesMut {
        std::mem::take(&mut *self.inner.outbound.lock())
    }

    /// Runs event-loop tasks submitted from foreign executor threads.
    pub fn run_pending_tasks(&self) {
        self.inner.event_loop.run_pending_tasks();
    }
}
