use std::io;

use thiserror::Error;

/// Errors produced by [`ByteBuf`](crate::ByteBuf) operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// An absolute access touched bytes outside the buffer's capacity, or a
    /// relative read asked for more than the readable region holds.
    #[error("index {index} with length {len} exceeds bound {bound}")]
    OutOfBounds {
        /// First byte the access would have touched.
        index: usize,
        /// Number of bytes the access asked for.
        len: usize,
        /// The limit that was exceeded: capacity for absolute accesses,
        /// `writer_index` for relative reads.
        bound: usize,
    },

    /// A relative write needed more room than a non-growable buffer has.
    #[error("write of {requested} bytes exceeds writable space {writable} (capacity {capacity})")]
    Overflow {
        /// Bytes the write needed.
        requested: usize,
        /// Bytes that were actually writable.
        writable: usize,
        /// Total capacity of the buffer.
        capacity: usize,
    },

    /// `set_index` was given cursors that violate
    /// `0 <= reader <= writer <= capacity`.
    #[error("invalid indices: reader {reader}, writer {writer}, capacity {capacity}")]
    InvalidIndex {
        /// Requested reader index.
        reader: usize,
        /// Requested writer index.
        writer: usize,
        /// Capacity the indices were checked against.
        capacity: usize,
    },

    /// An [`io::Read`] source ended before producing the count a
    /// progress-demanding transfer asked for.
    #[error("end of input")]
    EndOfInput,

    /// An underlying [`io::Read`]/[`io::Write`] transfer failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
