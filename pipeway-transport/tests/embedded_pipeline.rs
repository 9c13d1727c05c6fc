//! End-to-end pipeline behavior over the embedded channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pipeway::{
    BoxError, BufferHolder, Handler, HandlerContext, HandlerKind, HandlerKinds,
};
use pipeway_buffer::ByteBuf;
use pipeway_transport::EmbeddedStreamChannel;

/// Copies inbound bytes into the next outbound byte buffer and flushes.
struct EchoHandler;

impl Handler for EchoHandler {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::Inbound])
    }

    fn new_inbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Ok(BufferHolder::byte_buffer())
    }

    fn inbound_buffer_updated(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        let mut data = {
            let input = ctx.inbound_byte_buffer()?;
            let mut input = input.lock();
            let readable = input.readable_bytes();
            input.read_bytes(readable)?
        };
        {
            let out = ctx.next_outbound_byte_buffer()?;
            out.lock().write_buf(&mut data)?;
        }
        ctx.flush();
        Ok(())
    }
}

/// Identity stage: forwards its inbound bytes to the next inbound byte
/// buffer, counting invocations.
struct RelayStage {
    invocations: Arc<AtomicUsize>,
}

impl RelayStage {
    fn new(invocations: &Arc<AtomicUsize>) -> Self {
        RelayStage {
            invocations: invocations.clone(),
        }
    }
}

impl Handler for RelayStage {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::Inbound])
    }

    fn new_inbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Ok(BufferHolder::byte_buffer())
    }

    fn inbound_buffer_updated(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let mut data = {
            let input = ctx.inbound_byte_buffer()?;
            let mut input = input.lock();
            let readable = input.readable_bytes();
            input.read_bytes(readable)?
        };
        if data.is_readable() {
            ctx.next_inbound_byte_buffer()?.lock().write_buf(&mut data)?;
            ctx.fire_inbound_buffer_updated();
        }
        Ok(())
    }
}

/// Final inbound stage collecting everything it sees.
struct ByteSink {
    data: Arc<Mutex<Vec<u8>>>,
}

impl Handler for ByteSink {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::Inbound])
    }

    fn new_inbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Ok(BufferHolder::byte_buffer())
    }

    fn inbound_buffer_updated(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        let input = ctx.inbound_byte_buffer()?;
        let mut input = input.lock();
        let readable = input.readable_bytes();
        let mut chunk = vec![0u8; readable];
        input.read_into(&mut chunk)?;
        self.data.lock().unwrap().extend_from_slice(&chunk);
        Ok(())
    }
}

/// Inbound stage that always fails.
struct ThrowingStage;

impl Handler for ThrowingStage {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::Inbound])
    }

    fn new_inbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Ok(BufferHolder::byte_buffer())
    }

    fn inbound_buffer_updated(&mut self, _ctx: &HandlerContext) -> Result<(), BoxError> {
        Err("kaboom".into())
    }
}

/// State stage recording exceptions without forwarding them.
struct ExceptionProbe {
    causes: Arc<Mutex<Vec<String>>>,
}

impl Handler for ExceptionProbe {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::State])
    }

    fn exception_caught(&mut self, _ctx: &HandlerContext, cause: BoxError) -> Result<(), BoxError> {
        self.causes.lock().unwrap().push(cause.to_string());
        Ok(())
    }
}

/// State stage recording lifecycle transitions.
struct LifecycleProbe {
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl Handler for LifecycleProbe {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::State])
    }

    fn channel_registered(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        self.events.lock().unwrap().push("registered");
        ctx.fire_channel_registered();
        Ok(())
    }

    fn channel_active(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        self.events.lock().unwrap().push("active");
        ctx.fire_channel_active();
        Ok(())
    }

    fn channel_inactive(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        self.events.lock().unwrap().push("inactive");
        ctx.fire_channel_inactive();
        Ok(())
    }
}

#[test]
fn echo_pipeline_round_trips_exact_bytes() {
    let channel = EmbeddedStreamChannel::new();
    channel.pipeline().add_last("echo", EchoHandler).unwrap();
    channel.activate();

    channel.write_inbound([0x01, 0x02, 0x03]).unwrap();
    assert_eq!(channel.outbound_bytes().as_ref(), &[0x01, 0x02, 0x03]);

    // Order is preserved across pushes.
    channel.write_inbound([0x04]).unwrap();
    channel.write_inbound([0x05, 0x06]).unwrap();
    assert_eq!(
        channel.outbound_bytes().as_ref(),
        &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
    );
}

#[test]
fn identity_chain_delivers_every_pushed_byte() {
    let channel = EmbeddedStreamChannel::new();
    let invocations = Arc::new(AtomicUsize::new(0));
    let data = Arc::new(Mutex::new(Vec::new()));
    for index in 0..3 {
        channel
            .pipeline()
            .add_last(&format!("relay-{index}"), RelayStage::new(&invocations))
            .unwrap();
    }
    channel
        .pipeline()
        .add_last("sink", ByteSink { data: data.clone() })
        .unwrap();
    channel.activate();

    let payload: Vec<u8> = (0..=255).cycle().take(4096).map(|v: u16| v as u8).collect();
    for chunk in payload.chunks(1000) {
        channel.write_inbound(chunk).unwrap();
    }

    assert_eq!(*data.lock().unwrap(), payload);
}

#[test]
fn handler_failure_routes_to_next_stage_exactly_once() {
    let channel = EmbeddedStreamChannel::new();
    let causes = Arc::new(Mutex::new(Vec::new()));
    channel
        .pipeline()
        .add_last("boom", ThrowingStage)
        .unwrap();
    channel
        .pipeline()
        .add_last("probe", ExceptionProbe { causes: causes.clone() })
        .unwrap();
    channel.activate();

    channel.write_inbound([0xFF]).unwrap();

    let causes = causes.lock().unwrap();
    assert_eq!(causes.len(), 1);
    assert_eq!(causes[0], "kaboom");
    drop(causes);

    // The channel survives in its prior state.
    assert!(channel.is_open());
    assert!(channel.is_active());
}

#[test]
fn write_after_close_fails_future_and_fires_exception_once() {
    let channel = EmbeddedStreamChannel::new();
    let causes = Arc::new(Mutex::new(Vec::new()));
    channel
        .pipeline()
        .add_last("probe", ExceptionProbe { causes: causes.clone() })
        .unwrap();
    channel.activate();

    assert!(channel.close().is_success());
    assert!(!channel.is_open());

    let future = channel.write(Box::new(ByteBuf::copied(b"late")));
    assert!(future.is_failed());
    assert!(future.cause().unwrap().to_string().contains("closed"));

    let causes = causes.lock().unwrap();
    assert_eq!(causes.len(), 1);
    assert!(causes[0].contains("closed"));
    assert!(channel.outbound_bytes().is_empty());
}

#[test]
fn removed_stage_never_sees_another_event() {
    let channel = EmbeddedStreamChannel::new();
    let invocations = Arc::new(AtomicUsize::new(0));
    let data = Arc::new(Mutex::new(Vec::new()));
    channel
        .pipeline()
        .add_last("relay", RelayStage::new(&invocations))
        .unwrap();
    channel
        .pipeline()
        .add_last("sink", ByteSink { data: data.clone() })
        .unwrap();
    channel.activate();

    channel.write_inbound([1, 2]).unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    channel.pipeline().remove("relay").unwrap();
    channel.write_inbound([3, 4]).unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(*data.lock().unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn lifecycle_events_arrive_in_order() {
    let channel = EmbeddedStreamChannel::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    channel
        .pipeline()
        .add_last("probe", LifecycleProbe { events: events.clone() })
        .unwrap();

    channel.activate();
    assert!(channel.close().is_success());

    assert_eq!(*events.lock().unwrap(), vec!["registered", "active", "inactive"]);
}
