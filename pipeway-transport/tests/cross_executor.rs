//! Cross-executor handoff: adjacent stages pinned to different worker
//! threads must observe the exact byte sequence, with no reorder, loss or
//! duplication.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pipeway::{
    BoxError, BufferHolder, Handler, HandlerContext, HandlerKind, HandlerKinds,
};
use pipeway_executor::{EventExecutorGroup, SingleThreadExecutor};
use pipeway_transport::EmbeddedStreamChannel;
use rand::Rng;

/// Identity stage forwarding its inbound bytes onward.
struct RelayStage;

impl Handler for RelayStage {
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
        if data.is_readable() {
            ctx.next_inbound_byte_buffer()?.lock().write_buf(&mut data)?;
            ctx.fire_inbound_buffer_updated();
        }
        Ok(())
    }
}

/// Collects every byte it observes.
struct Collector {
    data: Arc<Mutex<Vec<u8>>>,
    updates: Arc<AtomicUsize>,
}

impl Handler for Collector {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::Inbound])
    }

    fn new_inbound_buffer(&mut self) -> Result<BufferHolder, BoxError> {
        Ok(BufferHolder::byte_buffer())
    }

    fn inbound_buffer_updated(&mut self, ctx: &HandlerContext) -> Result<(), BoxError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let input = ctx.inbound_byte_buffer()?;
        let mut input = input.lock();
        let readable = input.readable_bytes();
        let mut chunk = vec![0u8; readable];
        input.read_into(&mut chunk)?;
        self.data.lock().unwrap().extend_from_slice(&chunk);
        Ok(())
    }
}

fn wait_for_len(data: &Arc<Mutex<Vec<u8>>>, expected: usize, channel: &EmbeddedStreamChannel) {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        if data.lock().unwrap().len() >= expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "consumer saw {} of {} bytes before timeout",
            data.lock().unwrap().len(),
            expected
        );
        channel.run_pending_tasks();
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn adjacent_stages_on_different_executors_see_bytes_in_order() {
    let channel = EmbeddedStreamChannel::new();
    let exec_a = SingleThreadExecutor::builder().name("xfer-a").spawn().unwrap();
    let exec_b = SingleThreadExecutor::builder().name("xfer-b").spawn().unwrap();
    let group_a: Arc<dyn EventExecutorGroup> = exec_a.clone();
    let group_b: Arc<dyn EventExecutorGroup> = exec_b.clone();

    let data = Arc::new(Mutex::new(Vec::new()));
    let updates = Arc::new(AtomicUsize::new(0));
    channel
        .pipeline()
        .add_last_in(&group_a, "relay", RelayStage)
        .unwrap();
    channel
        .pipeline()
        .add_last_in(
            &group_b,
            "collector",
            Collector {
                data: data.clone(),
                updates: updates.clone(),
            },
        )
        .unwrap();
    channel.activate();

    // 1 MiB in 37 chunks.
    let mut payload = vec![0u8; 1 << 20];
    rand::thread_rng().fill(&mut payload[..]);
    let boundaries: Vec<usize> = (0..=37).map(|i| payload.len() * i / 37).collect();
    for window in boundaries.windows(2) {
        channel.write_inbound(&payload[window[0]..window[1]]).unwrap();
    }

    wait_for_len(&data, payload.len(), &channel);
    assert_eq!(*data.lock().unwrap(), payload);

    exec_a.shutdown();
    exec_b.shutdown();
}

#[test]
fn stages_sharing_a_group_share_one_child_executor() {
    let channel = EmbeddedStreamChannel::new();
    let exec = SingleThreadExecutor::builder().name("shared").spawn().unwrap();
    let group: Arc<dyn EventExecutorGroup> = exec.clone();

    let data = Arc::new(Mutex::new(Vec::new()));
    let updates = Arc::new(AtomicUsize::new(0));
    channel
        .pipeline()
        .add_last_in(&group, "relay", RelayStage)
        .unwrap();
    channel
        .pipeline()
        .add_last_in(
            &group,
            "collector",
            Collector {
                data: data.clone(),
                updates: updates.clone(),
            },
        )
        .unwrap();
    channel.activate();

    let relay = channel.pipeline().context("relay").unwrap();
    let collector = channel.pipeline().context("collector").unwrap();
    // Compare data pointers; vtable pointers of trait objects are not
    // reliable for identity.
    assert_eq!(
        Arc::as_ptr(&relay.executor()) as *const (),
        Arc::as_ptr(&collector.executor()) as *const ()
    );

    channel.write_inbound(b"shared-loop").unwrap();
    wait_for_len(&data, 11, &channel);
    assert_eq!(&*data.lock().unwrap(), b"shared-loop");

    exec.shutdown();
}
