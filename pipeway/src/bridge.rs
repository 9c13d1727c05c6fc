//! Cross-executor handoff between adjacent stages.
//!
//! When two adjacent contexts are pinned to different executors they must
//! not touch each other's local buffers. The producer instead writes into
//! the consumer's bridge *intake* (still only ever touched from the
//! producer's executor), [`Bridge::fill`] snapshots the intake onto the
//! *exchange* queue, and the consumer's executor drains the exchange into
//! the consumer's local buffer with [`Bridge::flush_into`]. The exchange
//! queue is the only structure that crosses threads; its elements are owned
//! by the consumer on dequeue.

use std::collections::VecDeque;

use parking_lot::Mutex;
use pipeway_buffer::{BufferError, ByteBuf};

use crate::holder::{new_slot, BufKind, BufferHolder, BufferSlot, MessageQueue, Msg};

/// Byte-stream bridge: an intermediate byte buffer plus an exchange queue
/// of byte chunks.
pub(crate) struct StreamBridge {
    intake: BufferSlot,
    exchange: Mutex<VecDeque<ByteBuf>>,
}

impl StreamBridge {
    fn new() -> Self {
        StreamBridge {
            intake: new_slot(BufferHolder::byte_buffer()),
            exchange: Mutex::new(VecDeque::new()),
        }
    }

    /// Snapshots all readable intake bytes into an owned chunk on the
    /// exchange queue and compacts the intake. No-op when nothing is
    /// readable. Runs on the producer executor.
    fn fill(&self) {
        let mut holder = self.intake.lock();
        let buf = match holder.as_bytes_mut() {
            Some(buf) => buf,
            None => panic!("stream bridge intake changed form"),
        };
        let readable = buf.readable_bytes();
        if readable == 0 {
            return;
        }
        let chunk = match buf.read_bytes(readable) {
            Ok(chunk) => chunk,
            Err(_) => unreachable!("readable bytes were just counted"),
        };
        buf.discard_read_bytes();
        self.exchange.lock().push_back(chunk);
    }

    /// Drains the exchange queue into the consumer's local buffer. Runs on
    /// the consumer executor.
    fn flush(&self, out: &mut ByteBuf) -> Result<(), BufferError> {
        loop {
            let chunk = self.exchange.lock().pop_front();
            match chunk {
                Some(mut chunk) => out.write_buf(&mut chunk)?,
                None => return Ok(()),
            }
        }
    }
}

/// Message bridge: an intake queue plus an exchange queue of message
/// batches.
pub(crate) struct MessageBridge {
    intake: BufferSlot,
    exchange: Mutex<VecDeque<Vec<Msg>>>,
}

impl MessageBridge {
    fn new() -> Self {
        MessageBridge {
            intake: new_slot(BufferHolder::message_buffer()),
            exchange: Mutex::new(VecDeque::new()),
        }
    }

    /// Snapshots the intake queue as one batch on the exchange queue.
    /// No-op when the intake is empty. Runs on the producer executor.
    fn fill(&self) {
        let mut holder = self.intake.lock();
        let queue = match holder.as_messages_mut() {
            Some(queue) => queue,
            None => panic!("message bridge intake changed form"),
        };
        if queue.is_empty() {
            return;
        }
        let batch: Vec<Msg> = queue.drain(..).collect();
        self.exchange.lock().push_back(batch);
    }

    /// Drains the exchange queue into the consumer's local queue in FIFO
    /// order. Runs on the consumer executor.
    fn flush(&self, out: &mut MessageQueue) {
        loop {
            let batch = self.exchange.lock().pop_front();
            match batch {
                Some(batch) => out.extend(batch),
                None => return,
            }
        }
    }
}

/// A bridge of either form, installed lazily on the consumer context the
/// first time a producer on a foreign executor asks for its buffer.
pub(crate) enum Bridge {
    Stream(StreamBridge),
    Message(MessageBridge),
}

impl Bridge {
    pub(crate) fn for_kind(kind: BufKind) -> Bridge {
        match kind {
            BufKind::Bytes => Bridge::Stream(StreamBridge::new()),
            BufKind::Messages => Bridge::Message(MessageBridge::new()),
        }
    }

    /// The producer-side intake slot, handed out in place of the consumer's
    /// local buffer.
    pub(crate) fn intake(&self) -> &BufferSlot {
        match self {
            Bridge::Stream(bridge) => &bridge.intake,
            Bridge::Message(bridge) => &bridge.intake,
        }
    }

    /// Publishes intake content to the exchange queue.
    pub(crate) fn fill(&self) {
        match self {
            Bridge::Stream(bridge) => bridge.fill(),
            Bridge::Message(bridge) => bridge.fill(),
        }
    }

    /// Drains the exchange queue into the consumer's local holder.
    pub(crate) fn flush_into(&self, holder: &mut BufferHolder) -> Result<(), BufferError> {
        match (self, holder) {
            (Bridge::Stream(bridge), BufferHolder::Bytes(out)) => bridge.flush(out),
            (Bridge::Message(bridge), BufferHolder::Messages(out)) => {
                bridge.flush(out);
                Ok(())
            }
            _ => panic!("bridge form does not match the local buffer form"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_bridge_carries_bytes_in_order() {
        let bridge = Bridge::for_kind(BufKind::Bytes);

        // Producer side: two separate fills.
        bridge.intake().lock().as_bytes_mut().unwrap().write_bytes(b"abc").unwrap();
        bridge.fill();
        bridge.intake().lock().as_bytes_mut().unwrap().write_bytes(b"def").unwrap();
        bridge.fill();

        // Consumer side: one flush observes everything, in order.
        let mut local = BufferHolder::byte_buffer();
        bridge.flush_into(&mut local).unwrap();
        assert_eq!(local.as_bytes_mut().unwrap().to_vec(), b"abcdef".to_vec());

        // Intake was compacted.
        let mut intake = bridge.intake().lock();
        let intake_buf = intake.as_bytes_mut().unwrap();
        assert_eq!(intake_buf.readable_bytes(), 0);
        assert_eq!(intake_buf.reader_index(), 0);
    }

    #[test]
    fn empty_fill_publishes_nothing() {
        let bridge = Bridge::for_kind(BufKind::Bytes);
        bridge.fill();
        let mut local = BufferHolder::byte_buffer();
        bridge.flush_into(&mut local).unwrap();
        assert_eq!(local.as_bytes_mut().unwrap().readable_bytes(), 0);
    }

    #[test]
    fn message_bridge_batches_preserve_fifo_order() {
        let bridge = Bridge::for_kind(BufKind::Messages);

        for batch in 0..3 {
            {
                let mut intake = bridge.intake().lock();
                let queue = intake.as_messages_mut().unwrap();
                queue.push_back(Box::new(batch * 2) as Msg);
                queue.push_back(Box::new(batch * 2 + 1) as Msg);
            }
            bridge.fill();
        }

        let mut local = BufferHolder::message_buffer();
        bridge.flush_into(&mut local).unwrap();
        let queue = local.as_messages_mut().unwrap();
        let seen: Vec<i32> = queue
            .drain(..)
            .map(|msg| *msg.downcast::<i32>().unwrap())
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }
}
