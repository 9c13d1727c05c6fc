//! # Pipeway Buffer - Indexed Byte Buffers
//!
//! `pipeway-buffer` provides [`ByteBuf`], the byte container used by every
//! stage of a pipeway pipeline. Unlike a plain `Vec<u8>` or a
//! [`bytes::BytesMut`], a `ByteBuf` keeps two independent cursors over its
//! storage:
//!
//! ```text
//!      +-------------------+------------------+------------------+
//!      | discardable bytes |  readable bytes  |  writable bytes  |
//!      +-------------------+------------------+------------------+
//!      |                   |                  |                  |
//!      0      <=      reader_index   <=   writer_index    <=  capacity
//! ```
//!
//! Consumers advance `reader_index`, producers advance `writer_index`, and
//! the two never have to coordinate through a length field. A stage that has
//! consumed everything it can calls [`ByteBuf::discard_read_bytes`] to slide
//! the readable region back to offset zero and reclaim space.
//!
//! ## Variants
//!
//! There is a single buffer type; the behavioral variants are picked by
//! constructor:
//!
//! - [`ByteBuf::dynamic`]: heap-backed, grows as relative writes need room.
//! - [`ByteBuf::fixed`]: heap-backed with a capacity decided up front.
//! - [`ByteBuf::wrapped`]: adopts an existing byte array; never grows.
//! - [`ByteBuf::slice_at`]: a window into another buffer's storage with its
//!   own indices.
//! - [`ByteBuf::duplicate`]: a full-range view with independent indices.
//! - [`ByteBuf::empty`]: the process-wide zero-capacity singleton storage.
//!
//! Slices and duplicates share storage with their parent, so bytes written
//! through one view are observed by the others. Storage is internally
//! synchronized, which keeps views usable from the different executor
//! threads a pipeline may span.
//!
//! ## Byte order
//!
//! Multi-byte accessors (`get_u16`, `read_u32`, ...) honor the buffer's
//! declared [`ByteOrder`]. The default is big-endian, network order; views
//! inherit the order of the buffer they were derived from.
//!
//! ## Example
//!
//! ```rust
//! use pipeway_buffer::ByteBuf;
//!
//! let mut buf = ByteBuf::dynamic();
//! buf.write_u16(0xCAFE).unwrap();
//! buf.write_bytes(b"hello").unwrap();
//!
//! assert_eq!(buf.read_u16().unwrap(), 0xCAFE);
//! assert_eq!(buf.readable_bytes(), 5);
//!
//! let frame = buf.read_bytes(5).unwrap();
//! assert_eq!(frame.to_vec(), b"hello");
//! assert!(!buf.is_readable());
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod byte_buf;
pub(crate) mod error;

pub use byte_buf::{ByteBuf, ByteOrder};
pub use error::BufferError;
