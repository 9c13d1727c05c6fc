use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use pipeway_buffer::ByteBuf;

/// A type-erased message travelling through message-form buffers.
pub type Msg = Box<dyn Any + Send + 'static>;

/// The queue behind a message-form buffer.
pub type MessageQueue = VecDeque<Msg>;

/// The buffer a stage declares for one direction: either a byte stream or
/// a message queue. The form is chosen once at registration and never
/// changes afterwards.
pub enum BufferHolder {
    /// Byte-stream form.
    Bytes(ByteBuf),
    /// Message-queue form.
    Messages(MessageQueue),
}

/// Which form a [`BufferHolder`] has. Recorded on the context at
/// registration so traversal never has to lock the holder to find out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BufKind {
    Bytes,
    Messages,
}

impl BufferHolder {
    /// A byte-stream holder backed by a growable buffer.
    pub fn byte_buffer() -> Self {
        BufferHolder::Bytes(ByteBuf::dynamic())
    }

    /// A byte-stream holder backed by the given buffer.
    pub fn byte_buffer_with(buf: ByteBuf) -> Self {
        BufferHolder::Bytes(buf)
    }

    /// A message-queue holder.
    pub fn message_buffer() -> Self {
        BufferHolder::Messages(MessageQueue::new())
    }

    /// `true` for the byte-stream form.
    pub fn has_bytes(&self) -> bool {
        matches!(self, BufferHolder::Bytes(_))
    }

    /// `true` for the message-queue form.
    pub fn has_messages(&self) -> bool {
        matches!(self, BufferHolder::Messages(_))
    }

    /// The byte buffer, if this holder has the byte-stream form.
    pub fn as_bytes_mut(&mut self) -> Option<&mut ByteBuf> {
        match self {
            BufferHolder::Bytes(buf) => Some(buf),
            BufferHolder::Messages(_) => None,
        }
    }

    /// The message queue, if this holder has the message-queue form.
    pub fn as_messages_mut(&mut self) -> Option<&mut MessageQueue> {
        match self {
            BufferHolder::Messages(queue) => Some(queue),
            BufferHolder::Bytes(_) => None,
        }
    }

    pub(crate) fn kind(&self) -> BufKind {
        match self {
            BufferHolder::Bytes(_) => BufKind::Bytes,
            BufferHolder::Messages(_) => BufKind::Messages,
        }
    }
}

/// A buffer slot shared between its owning context and the references
/// handed to handlers. The mutex is uncontended unless views cross
/// executors through a bridge.
pub(crate) type BufferSlot = Arc<Mutex<BufferHolder>>;

pub(crate) fn new_slot(holder: BufferHolder) -> BufferSlot {
    Arc::new(Mutex::new(holder))
}

/// A handle to a byte-form buffer slot.
///
/// Obtained from the context accessors
/// ([`inbound_byte_buffer`](crate::HandlerContext::inbound_byte_buffer),
/// [`next_outbound_byte_buffer`](crate::HandlerContext::next_outbound_byte_buffer),
/// ...). Release the guard returned by [`lock`](ByteBufRef::lock) before
/// firing events further down the pipeline.
pub struct ByteBufRef {
    pub(crate) slot: BufferSlot,
}

impl ByteBufRef {
    /// Locks the slot and returns the byte buffer.
    pub fn lock(&self) -> MappedMutexGuard<'_, ByteBuf> {
        MutexGuard::map(self.slot.lock(), |holder| match holder.as_bytes_mut() {
            Some(buf) => buf,
            None => panic!("buffer holder changed form after registration"),
        })
    }
}

/// A handle to a message-form buffer slot.
///
/// See [`ByteBufRef`] for the locking contract.
pub struct MsgBufRef {
    pub(crate) slot: BufferSlot,
}

impl MsgBufRef {
    /// Locks the slot and returns the message queue.
    pub fn lock(&self) -> MappedMutexGuard<'_, MessageQueue> {
        MutexGuard::map(self.slot.lock(), |holder| match holder {
            BufferHolder::Messages(queue) => queue,
            BufferHolder::Bytes(_) => panic!("buffer holder changed form after registration"),
        })
    }
}
