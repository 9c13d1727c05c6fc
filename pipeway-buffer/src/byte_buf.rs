use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, OnceLock};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::BufferError;

/// Byte order applied by the multi-byte accessors of a [`ByteBuf`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Network order. The default for every constructor.
    #[default]
    BigEndian,
    /// Little-endian order.
    LittleEndian,
}

/// Heap storage shared between a buffer and the views derived from it.
///
/// The mutex makes views usable across executor threads; it is uncontended
/// in the common case of a buffer confined to one pipeline stage.
#[derive(Clone)]
struct Storage(Arc<Mutex<Vec<u8>>>);

impl Storage {
    fn zeroed(len: usize) -> Self {
        Storage(Arc::new(Mutex::new(vec![0; len])))
    }

    fn adopt(data: Vec<u8>) -> Self {
        Storage(Arc::new(Mutex::new(data)))
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }

    fn same(a: &Storage, b: &Storage) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

/// Storage behind [`ByteBuf::empty`]. Initialized once, never written.
static EMPTY: OnceLock<Storage> = OnceLock::new();

/// A byte container with independent reader and writer cursors.
///
/// See the [crate docs](crate) for the index model and the list of
/// constructor variants. All failures are reported as [`BufferError`];
/// indices are never left half-updated by a failed operation.
pub struct ByteBuf {
    storage: Storage,
    /// Offset of this view's window inside the storage.
    base: usize,
    /// `Some(len)` pins the window (slices); `None` tracks the whole
    /// storage, including growth.
    window: Option<usize>,
    reader: usize,
    writer: usize,
    order: ByteOrder,
    growable: bool,
}

impl ByteBuf {
    /// Default initial capacity of [`dynamic`](ByteBuf::dynamic) buffers.
    const DEFAULT_INITIAL: usize = 256;
    /// Smallest capacity a growing buffer reallocates to.
    const MIN_GROWTH: usize = 64;

    /// Creates a growable buffer with the default initial capacity.
    pub fn dynamic() -> Self {
        Self::dynamic_with(Self::DEFAULT_INITIAL)
    }

    /// Creates a growable buffer with the given initial capacity.
    pub fn dynamic_with(initial: usize) -> Self {
        ByteBuf {
            storage: Storage::zeroed(initial),
            base: 0,
            window: None,
            reader: 0,
            writer: 0,
            order: ByteOrder::default(),
            growable: true,
        }
    }

    /// Creates a buffer with a capacity fixed at creation time.
    pub fn fixed(capacity: usize) -> Self {
        ByteBuf {
            storage: Storage::zeroed(capacity),
            base: 0,
            window: None,
            reader: 0,
            writer: 0,
            order: ByteOrder::default(),
            growable: false,
        }
    }

    /// Adopts an existing byte array. The buffer starts fully readable
    /// (`reader = 0`, `writer = len`) and never grows; relative writes past
    /// the end fail with [`BufferError::Overflow`].
    pub fn wrapped(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let len = data.len();
        ByteBuf {
            storage: Storage::adopt(data),
            base: 0,
            window: None,
            reader: 0,
            writer: len,
            order: ByteOrder::default(),
            growable: false,
        }
    }

    /// Creates an owning buffer containing a copy of `data`, fully readable.
    pub fn copied(data: &[u8]) -> Self {
        Self::wrapped(data.to_vec())
    }

    /// Returns a zero-capacity buffer backed by the process-wide empty
    /// storage singleton.
    pub fn empty() -> Self {
        ByteBuf {
            storage: EMPTY.get_or_init(|| Storage::adopt(Vec::new())).clone(),
            base: 0,
            window: Some(0),
            reader: 0,
            writer: 0,
            order: ByteOrder::default(),
            growable: false,
        }
    }

    /// Sets the byte order used by multi-byte accessors.
    pub fn with_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// The byte order used by multi-byte accessors.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Total addressable bytes. Grows over time for dynamic buffers.
    pub fn capacity(&self) -> usize {
        match self.window {
            Some(len) => len,
            None => self.storage.len() - self.base,
        }
    }

    /// Current reader cursor.
    pub fn reader_index(&self) -> usize {
        self.reader
    }

    /// Current writer cursor.
    pub fn writer_index(&self) -> usize {
        self.writer
    }

    /// Moves the reader cursor. Fails if it would pass the writer.
    pub fn set_reader_index(&mut self, reader: usize) -> Result<(), BufferError> {
        self.set_index(reader, self.writer)
    }

    /// Moves the writer cursor. Fails if it would pass the capacity or fall
    /// behind the reader.
    pub fn set_writer_index(&mut self, writer: usize) -> Result<(), BufferError> {
        self.set_index(self.reader, writer)
    }

    /// Sets both cursors, enforcing `reader <= writer <= capacity`.
    pub fn set_index(&mut self, reader: usize, writer: usize) -> Result<(), BufferError> {
        let capacity = self.capacity();
        if reader > writer || writer > capacity {
            return Err(BufferError::InvalidIndex {
                reader,
                writer,
                capacity,
            });
        }
        self.reader = reader;
        self.writer = writer;
        Ok(())
    }

    /// Resets both cursors to zero. The content is left untouched.
    pub fn clear(&mut self) {
        self.reader = 0;
        self.writer = 0;
    }

    /// Bytes available for relative reads: `writer - reader`.
    pub fn readable_bytes(&self) -> usize {
        self.writer - self.reader
    }

    /// Bytes available for relative writes without growing.
    pub fn writable_bytes(&self) -> usize {
        self.capacity() - self.writer
    }

    /// `true` when at least one byte is readable.
    pub fn is_readable(&self) -> bool {
        self.writer > self.reader
    }

    /// `true` when at least one byte is writable without growing.
    pub fn is_writable(&self) -> bool {
        self.writer < self.capacity()
    }

    fn check_range(&self, index: usize, len: usize) -> Result<(), BufferError> {
        let capacity = self.capacity();
        match index.checked_add(len) {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(BufferError::OutOfBounds {
                index,
                len,
                bound: capacity,
            }),
        }
    }

    fn check_readable(&self, len: usize) -> Result<(), BufferError> {
        if len > self.readable_bytes() {
            return Err(BufferError::OutOfBounds {
                index: self.reader,
                len,
                bound: self.writer,
            });
        }
        Ok(())
    }

    /// Makes room for `len` more bytes at the writer, reallocating the
    /// shared storage when this buffer is growable.
    fn ensure_writable(&mut self, len: usize) -> Result<(), BufferError> {
        if len <= self.writable_bytes() {
            return Ok(());
        }
        if !self.growable || self.window.is_some() {
            return Err(BufferError::Overflow {
                requested: len,
                writable: self.writable_bytes(),
                capacity: self.capacity(),
            });
        }

        // Growable buffers always start at base 0 with an unpinned window,
        // so the new capacity is just the storage length.
        let needed = self
            .writer
            .checked_add(len)
            .ok_or(BufferError::Overflow {
                requested: len,
                writable: self.writable_bytes(),
                capacity: self.capacity(),
            })?;
        let mut data = self.storage.0.lock();
        let mut capacity = data.len().max(Self::MIN_GROWTH);
        while capacity < needed {
            capacity = capacity.saturating_mul(2);
        }
        data.resize(capacity, 0);
        Ok(())
    }

    fn load<const N: usize>(&self, index: usize) -> Result<[u8; N], BufferError> {
        self.check_range(index, N)?;
        let data = self.storage.0.lock();
        let start = self.base + index;
        let mut raw = [0u8; N];
        raw.copy_from_slice(&data[start..start + N]);
        Ok(raw)
    }

    fn store<const N: usize>(&mut self, index: usize, raw: [u8; N]) -> Result<(), BufferError> {
        self.check_range(index, N)?;
        let mut data = self.storage.0.lock();
        let start = self.base + index;
        data[start..start + N].copy_from_slice(&raw);
        Ok(())
    }

    // ---- absolute primitive accessors -----------------------------------

    /// Gets the byte at `index`. Does not move any cursor.
    pub fn get_u8(&self, index: usize) -> Result<u8, BufferError> {
        Ok(self.load::<1>(index)?[0])
    }

    /// Gets the signed byte at `index`.
    pub fn get_i8(&self, index: usize) -> Result<i8, BufferError> {
        Ok(self.get_u8(index)? as i8)
    }

    /// Gets the 16-bit integer at `index` in this buffer's byte order.
    pub fn get_u16(&self, index: usize) -> Result<u16, BufferError> {
        let raw = self.load::<2>(index)?;
        Ok(match self.order {
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
        })
    }

    /// Gets the signed 16-bit integer at `index`.
    pub fn get_i16(&self, index: usize) -> Result<i16, BufferError> {
        Ok(self.get_u16(index)? as i16)
    }

    /// Gets the 32-bit integer at `index` in this buffer's byte order.
    pub fn get_u32(&self, index: usize) -> Result<u32, BufferError> {
        let raw = self.load::<4>(index)?;
        Ok(match self.order {
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
        })
    }

    /// Gets the signed 32-bit integer at `index`.
    pub fn get_i32(&self, index: usize) -> Result<i32, BufferError> {
        Ok(self.get_u32(index)? as i32)
    }

    /// Gets the 64-bit integer at `index` in this buffer's byte order.
    pub fn get_u64(&self, index: usize) -> Result<u64, BufferError> {
        let raw = self.load::<8>(index)?;
        Ok(match self.order {
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
        })
    }

    /// Gets the signed 64-bit integer at `index`.
    pub fn get_i64(&self, index: usize) -> Result<i64, BufferError> {
        Ok(self.get_u64(index)? as i64)
    }

    /// Sets the byte at `index`. Does not move any cursor and never grows.
    pub fn set_u8(&mut self, index: usize, value: u8) -> Result<(), BufferError> {
        self.store(index, [value])
    }

    /// Sets the signed byte at `index`.
    pub fn set_i8(&mut self, index: usize, value: i8) -> Result<(), BufferError> {
        self.set_u8(index, value as u8)
    }

    /// Sets the 16-bit integer at `index` in this buffer's byte order.
    pub fn set_u16(&mut self, index: usize, value: u16) -> Result<(), BufferError> {
        let raw = match self.order {
            ByteOrder::BigEndian => value.to_be_bytes(),
            ByteOrder::LittleEndian => value.to_le_bytes(),
        };
        self.store(index, raw)
    }

    /// Sets the signed 16-bit integer at `index`.
    pub fn set_i16(&mut self, index: usize, value: i16) -> Result<(), BufferError> {
        self.set_u16(index, value as u16)
    }

    /// Sets the 32-bit integer at `index` in this buffer's byte order.
    pub fn set_u32(&mut self, index: usize, value: u32) -> Result<(), BufferError> {
        let raw = match self.order {
            ByteOrder::BigEndian => value.to_be_bytes(),
            ByteOrder::LittleEndian => value.to_le_bytes(),
        };
        self.store(index, raw)
    }

    /// Sets the signed 32-bit integer at `index`.
    pub fn set_i32(&mut self, index: usize, value: i32) -> Result<(), BufferError> {
        self.set_u32(index, value as u32)
    }

    /// Sets the 64-bit integer at `index` in this buffer's byte order.
    pub fn set_u64(&mut self, index: usize, value: u64) -> Result<(), BufferError> {
        let raw = match self.order {
            ByteOrder::BigEndian => value.to_be_bytes(),
            ByteOrder::LittleEndian => value.to_le_bytes(),
        };
        self.store(index, raw)
    }

    /// Sets the signed 64-bit integer at `index`.
    pub fn set_i64(&mut self, index: usize, value: i64) -> Result<(), BufferError> {
        self.set_u64(index, value as u64)
    }

    // ---- relative primitive accessors -----------------------------------

    /// Reads one byte and advances the reader.
    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        self.check_readable(1)?;
        let value = self.get_u8(self.reader)?;
        self.reader += 1;
        Ok(value)
    }

    /// Reads a signed byte and advances the reader.
    pub fn read_i8(&mut self) -> Result<i8, BufferError> {
        Ok(self.read_u8()? as i8)
    }

    /// Reads a 16-bit integer and advances the reader.
    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        self.check_readable(2)?;
        let value = self.get_u16(self.reader)?;
        self.reader += 2;
        Ok(value)
    }

    /// Reads a signed 16-bit integer and advances the reader.
    pub fn read_i16(&mut self) -> Result<i16, BufferError> {
        Ok(self.read_u16()? as i16)
    }

    /// Reads a 32-bit integer and advances the reader.
    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        self.check_readable(4)?;
        let value = self.get_u32(self.reader)?;
        self.reader += 4;
        Ok(value)
    }

    /// Reads a signed 32-bit integer and advances the reader.
    pub fn read_i32(&mut self) -> Result<i32, BufferError> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads a 64-bit integer and advances the reader.
    pub fn read_u64(&mut self) -> Result<u64, BufferError> {
        self.check_readable(8)?;
        let value = self.get_u64(self.reader)?;
        self.reader += 8;
        Ok(value)
    }

    /// Reads a signed 64-bit integer and advances the reader.
    pub fn read_i64(&mut self) -> Result<i64, BufferError> {
        Ok(self.read_u64()? as i64)
    }

    /// Writes one byte and advances the writer, growing if needed.
    pub fn write_u8(&mut self, value: u8) -> Result<(), BufferError> {
        self.ensure_writable(1)?;
        self.set_u8(self.writer, value)?;
        self.writer += 1;
        Ok(())
    }

    /// Writes a signed byte and advances the writer.
    pub fn write_i8(&mut self, value: i8) -> Result<(), BufferError> {
        self.write_u8(value as u8)
    }

    /// Writes a 16-bit integer and advances the writer.
    pub fn write_u16(&mut self, value: u16) -> Result<(), BufferError> {
        self.ensure_writable(2)?;
        self.set_u16(self.writer, value)?;
        self.writer += 2;
        Ok(())
    }

    /// Writes a signed 16-bit integer and advances the writer.
    pub fn write_i16(&mut self, value: i16) -> Result<(), BufferError> {
        self.write_u16(value as u16)
    }

    /// Writes a 32-bit integer and advances the writer.
    pub fn write_u32(&mut self, value: u32) -> Result<(), BufferError> {
        self.ensure_writable(4)?;
        self.set_u32(self.writer, value)?;
        self.writer += 4;
        Ok(())
    }

    /// Writes a signed 32-bit integer and advances the writer.
    pub fn write_i32(&mut self, value: i32) -> Result<(), BufferError> {
        self.write_u32(value as u32)
    }

    /// Writes a 64-bit integer and advances the writer.
    pub fn write_u64(&mut self, value: u64) -> Result<(), BufferError> {
        self.ensure_writable(8)?;
        self.set_u64(self.writer, value)?;
        self.writer += 8;
        Ok(())
    }

    /// Writes a signed 64-bit integer and advances the writer.
    pub fn write_i64(&mut self, value: i64) -> Result<(), BufferError> {
        self.write_u64(value as u64)
    }

    // ---- bulk transfers -------------------------------------------------

    /// Copies `dst.len()` bytes starting at `index` into `dst`. Cursors of
    /// both sides are untouched.
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<(), BufferError> {
        self.check_range(index, dst.len())?;
        let data = self.storage.0.lock();
        let start = self.base + index;
        dst.copy_from_slice(&data[start..start + dst.len()]);
        Ok(())
    }

    /// Copies all of `src` into this buffer starting at `index`. Cursors of
    /// both sides are untouched; absolute writes never grow.
    pub fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<(), BufferError> {
        self.check_range(index, src.len())?;
        let mut data = self.storage.0.lock();
        let start = self.base + index;
        data[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Copies `len` bytes starting at `index` into `dst` at its writer,
    /// advancing the destination's writer (growing it if dynamic). This
    /// buffer's cursors are untouched.
    ///
    /// When both sides share heap storage the transfer is a single
    /// contiguous move.
    pub fn get_bytes_into(
        &self,
        index: usize,
        dst: &mut ByteBuf,
        len: usize,
    ) -> Result<(), BufferError> {
        self.check_range(index, len)?;
        dst.ensure_writable(len)?;
        let from = self.base + index;
        let to = dst.base + dst.writer;
        if Storage::same(&self.storage, &dst.storage) {
            let mut data = self.storage.0.lock();
            data.copy_within(from..from + len, to);
        } else {
            let src_data = self.storage.0.lock();
            let mut dst_data = dst.storage.0.lock();
            dst_data[to..to + len].copy_from_slice(&src_data[from..from + len]);
        }
        dst.writer += len;
        Ok(())
    }

    /// Copies `len` readable bytes out of `src` into this buffer starting
    /// at `index`, advancing the source's reader. This buffer's cursors are
    /// untouched and the write never grows.
    pub fn set_bytes_from(
        &mut self,
        index: usize,
        src: &mut ByteBuf,
        len: usize,
    ) -> Result<(), BufferError> {
        src.check_readable(len)?;
        self.check_range(index, len)?;
        let from = src.base + src.reader;
        let to = self.base + index;
        if Storage::same(&self.storage, &src.storage) {
            let mut data = self.storage.0.lock();
            data.copy_within(from..from + len, to);
        } else {
            let src_data = src.storage.0.lock();
            let mut dst_data = self.storage.0.lock();
            dst_data[to..to + len].copy_from_slice(&src_data[from..from + len]);
        }
        src.reader += len;
        Ok(())
    }

    /// Fills up to `len` bytes starting at `index` from `src`.
    ///
    /// Performs a single read: the returned count may be short, in which
    /// case only that many bytes were written and nothing else changed.
    /// A return of `Ok(0)` means the source reached end of input.
    pub fn set_bytes_reader(
        &mut self,
        index: usize,
        src: &mut dyn Read,
        len: usize,
    ) -> Result<usize, BufferError> {
        self.check_range(index, len)?;
        // Read into a scratch block first so user code never runs while the
        // storage lock is held.
        let mut scratch = vec![0u8; len];
        let n = src.read(&mut scratch)?;
        if n > 0 {
            let mut data = self.storage.0.lock();
            let start = self.base + index;
            data[start..start + n].copy_from_slice(&scratch[..n]);
        }
        Ok(n)
    }

    /// Writes `len` bytes starting at `index` to `out`.
    pub fn get_bytes_writer(
        &self,
        index: usize,
        out: &mut dyn Write,
        len: usize,
    ) -> Result<(), BufferError> {
        self.check_range(index, len)?;
        let scratch = {
            let data = self.storage.0.lock();
            let start = self.base + index;
            data[start..start + len].to_vec()
        };
        out.write_all(&scratch)?;
        Ok(())
    }

    /// Reads `len` bytes into a new owning buffer with indices `(0, len)`,
    /// advancing the reader.
    pub fn read_bytes(&mut self, len: usize) -> Result<ByteBuf, BufferError> {
        self.check_readable(len)?;
        let out = self.copy_range(self.reader, len)?;
        self.reader += len;
        Ok(out)
    }

    /// Reads `len` bytes as a shared view over this buffer's storage,
    /// advancing the reader.
    pub fn read_slice(&mut self, len: usize) -> Result<ByteBuf, BufferError> {
        self.check_readable(len)?;
        let out = self.slice_at(self.reader, len)?;
        self.reader += len;
        Ok(out)
    }

    /// Copies readable bytes into `dst`, advancing the reader by
    /// `dst.len()`.
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<(), BufferError> {
        self.check_readable(dst.len())?;
        self.get_bytes(self.reader, dst)?;
        self.reader += dst.len();
        Ok(())
    }

    /// Advances the reader past `len` bytes without looking at them.
    pub fn skip_bytes(&mut self, len: usize) -> Result<(), BufferError> {
        self.check_readable(len)?;
        self.reader += len;
        Ok(())
    }

    /// Appends `src` at the writer, advancing it and growing if needed.
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<(), BufferError> {
        self.ensure_writable(src.len())?;
        self.set_bytes(self.writer, src)?;
        self.writer += src.len();
        Ok(())
    }

    /// Appends all readable bytes of `src`, advancing both the source's
    /// reader and this buffer's writer.
    pub fn write_buf(&mut self, src: &mut ByteBuf) -> Result<(), BufferError> {
        let len = src.readable_bytes();
        self.write_buf_len(src, len)
    }

    /// Appends `len` readable bytes of `src`, advancing both cursors.
    pub fn write_buf_len(&mut self, src: &mut ByteBuf, len: usize) -> Result<(), BufferError> {
        src.check_readable(len)?;
        self.ensure_writable(len)?;
        self.set_bytes_from(self.writer, src, len)?;
        self.writer += len;
        Ok(())
    }

    /// Appends up to `len` bytes produced by `src`, advancing the writer by
    /// the count actually read. `Ok(0)` means end of input.
    pub fn write_from(&mut self, src: &mut dyn Read, len: usize) -> Result<usize, BufferError> {
        self.ensure_writable(len)?;
        let n = self.set_bytes_reader(self.writer, src, len)?;
        self.writer += n;
        Ok(n)
    }

    /// Appends exactly `len` bytes produced by `src`, advancing the writer.
    ///
    /// Fails with [`BufferError::EndOfInput`] when the source ends before
    /// producing the full count; bytes read up to that point are already
    /// written and the writer has advanced past them.
    pub fn write_from_exact(&mut self, src: &mut dyn Read, len: usize) -> Result<(), BufferError> {
        let mut remaining = len;
        while remaining > 0 {
            let n = self.write_from(src, remaining)?;
            if n == 0 {
                return Err(BufferError::EndOfInput);
            }
            remaining -= n;
        }
        Ok(())
    }

    /// Writes up to `len` readable bytes to `out`, advancing the reader by
    /// the count actually written and returning it.
    pub fn write_to(&mut self, out: &mut dyn Write, len: usize) -> Result<usize, BufferError> {
        let n = len.min(self.readable_bytes());
        if n > 0 {
            self.get_bytes_writer(self.reader, out, n)?;
            self.reader += n;
        }
        Ok(n)
    }

    // ---- views ----------------------------------------------------------

    /// Returns a view of the readable region sharing this buffer's storage.
    pub fn slice(&self) -> ByteBuf {
        match self.slice_at(self.reader, self.readable_bytes()) {
            Ok(view) => view,
            Err(_) => unreachable!("readable region is always in bounds"),
        }
    }

    /// Returns a view of `len` bytes starting at `index`, sharing storage
    /// with independent indices `(0, len)`.
    ///
    /// A zero-length slice is the [`empty`](ByteBuf::empty) singleton; a
    /// full-range slice degenerates to a [`duplicate`](ByteBuf::duplicate)
    /// with indices `(0, capacity)`.
    pub fn slice_at(&self, index: usize, len: usize) -> Result<ByteBuf, BufferError> {
        self.check_range(index, len)?;
        if len == 0 {
            return Ok(ByteBuf::empty().with_order(self.order));
        }
        if index == 0 && len == self.capacity() {
            let mut dup = self.duplicate();
            dup.reader = 0;
            dup.writer = len;
            return Ok(dup);
        }
        Ok(ByteBuf {
            storage: self.storage.clone(),
            base: self.base + index,
            window: Some(len),
            reader: 0,
            writer: len,
            order: self.order,
            growable: false,
        })
    }

    /// Returns a full-range view sharing storage, with its own copies of the
    /// current cursors. Reads on the duplicate never move this buffer's
    /// indices.
    pub fn duplicate(&self) -> ByteBuf {
        ByteBuf {
            storage: self.storage.clone(),
            base: self.base,
            window: self.window,
            reader: self.reader,
            writer: self.writer,
            order: self.order,
            growable: self.growable,
        }
    }

    /// Copies the readable region into a new owning buffer.
    pub fn copy(&self) -> ByteBuf {
        match self.copy_range(self.reader, self.readable_bytes()) {
            Ok(out) => out,
            Err(_) => unreachable!("readable region is always in bounds"),
        }
    }

    /// Copies `len` bytes starting at `index` into a new owning buffer with
    /// indices `(0, len)`.
    pub fn copy_range(&self, index: usize, len: usize) -> Result<ByteBuf, BufferError> {
        self.check_range(index, len)?;
        let data = {
            let guard = self.storage.0.lock();
            let start = self.base + index;
            guard[start..start + len].to_vec()
        };
        Ok(ByteBuf::wrapped(data).with_order(self.order))
    }

    // ---- compaction -----------------------------------------------------

    /// Moves the readable region to offset zero, decreasing both cursors by
    /// the discarded count.
    pub fn discard_read_bytes(&mut self) {
        if self.reader == 0 {
            return;
        }
        if self.reader < self.writer {
            let mut data = self.storage.0.lock();
            let start = self.base;
            data.copy_within(start + self.reader..start + self.writer, start);
        }
        self.writer -= self.reader;
        self.reader = 0;
    }

    // ---- interop --------------------------------------------------------

    /// Copies the readable region into a `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        let data = self.storage.0.lock();
        let start = self.base + self.reader;
        data[start..self.base + self.writer].to_vec()
    }

    /// Copies the readable region into a [`Bytes`].
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_vec())
    }
}

impl From<Vec<u8>> for ByteBuf {
    fn from(data: Vec<u8>) -> Self {
        ByteBuf::wrapped(data)
    }
}

impl From<&[u8]> for ByteBuf {
    fn from(data: &[u8]) -> Self {
        ByteBuf::copied(data)
    }
}

impl From<BytesMut> for ByteBuf {
    fn from(data: BytesMut) -> Self {
        ByteBuf::wrapped(Vec::from(data))
    }
}

impl From<Bytes> for ByteBuf {
    fn from(data: Bytes) -> Self {
        ByteBuf::copied(&data)
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf")
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .field("capacity", &self.capacity())
            .field("order", &self.order)
            .field("growable", &self.growable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn buffer_is_send_and_sync() {
        assert_send_sync::<ByteBuf>();
    }

    #[test]
    fn cursor_invariant_holds_after_every_step() {
        let mut buf = ByteBuf::dynamic_with(8);
        let check = |b: &ByteBuf| {
            assert!(b.reader_index() <= b.writer_index());
            assert!(b.writer_index() <= b.capacity());
        };
        check(&buf);
        buf.write_u32(0xDEAD_BEEF).unwrap();
        check(&buf);
        buf.read_u16().unwrap();
        check(&buf);
        buf.write_bytes(&[0u8; 100]).unwrap();
        check(&buf);
        buf.discard_read_bytes();
        check(&buf);
    }

    #[test]
    fn relative_accessors_round_trip_big_endian() {
        let mut buf = ByteBuf::dynamic();
        buf.write_u8(0x7F).unwrap();
        buf.write_u16(0xCAFE).unwrap();
        buf.write_u32(0xDEAD_BEEF).unwrap();
        buf.write_u64(0x0102_0304_0506_0708).unwrap();
        buf.write_i32(-42).unwrap();

        assert_eq!(buf.read_u8().unwrap(), 0x7F);
        assert_eq!(buf.read_u16().unwrap(), 0xCAFE);
        assert_eq!(buf.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(buf.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(buf.read_i32().unwrap(), -42);
        assert!(!buf.is_readable());
    }

    #[test]
    fn byte_order_changes_wire_layout() {
        let mut be = ByteBuf::dynamic();
        be.write_u16(0x0102).unwrap();
        assert_eq!(be.to_vec(), vec![0x01, 0x02]);

        let mut le = ByteBuf::dynamic().with_order(ByteOrder::LittleEndian);
        le.write_u16(0x0102).unwrap();
        assert_eq!(le.to_vec(), vec![0x02, 0x01]);
        assert_eq!(le.get_u16(0).unwrap(), 0x0102);
    }

    #[test]
    fn absolute_accessors_do_not_move_cursors() {
        let mut buf = ByteBuf::fixed(16);
        buf.set_u32(4, 99).unwrap();
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.writer_index(), 0);
        assert_eq!(buf.get_u32(4).unwrap(), 99);
    }

    #[test]
    fn reads_past_writer_fail() {
        let mut buf = ByteBuf::dynamic();
        buf.write_u8(1).unwrap();
        assert!(matches!(
            buf.read_u32(),
            Err(BufferError::OutOfBounds { .. })
        ));
        // A failed read leaves the cursor where it was.
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.read_u8().unwrap(), 1);
    }

    #[test]
    fn absolute_access_past_capacity_fails() {
        let buf = ByteBuf::fixed(4);
        assert!(matches!(
            buf.get_u64(0),
            Err(BufferError::OutOfBounds { .. })
        ));
        assert!(matches!(
            buf.get_u8(usize::MAX),
            Err(BufferError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn set_index_validates_ordering() {
        let mut buf = ByteBuf::fixed(8);
        assert!(buf.set_index(2, 6).is_ok());
        assert!(matches!(
            buf.set_index(6, 2),
            Err(BufferError::InvalidIndex { .. })
        ));
        assert!(matches!(
            buf.set_index(0, 9),
            Err(BufferError::InvalidIndex { .. })
        ));
        // The failed calls left the previous indices in place.
        assert_eq!(buf.reader_index(), 2);
        assert_eq!(buf.writer_index(), 6);
    }

    #[test]
    fn dynamic_buffer_grows_on_relative_writes() {
        let mut buf = ByteBuf::dynamic_with(4);
        assert_eq!(buf.capacity(), 4);
        buf.write_bytes(&[0xAB; 100]).unwrap();
        assert!(buf.capacity() >= 100);
        assert_eq!(buf.readable_bytes(), 100);
        assert_eq!(buf.to_vec(), vec![0xAB; 100]);
    }

    #[test]
    fn fixed_and_wrapped_buffers_refuse_growth() {
        let mut fixed = ByteBuf::fixed(2);
        fixed.write_u16(7).unwrap();
        assert!(matches!(
            fixed.write_u8(1),
            Err(BufferError::Overflow { .. })
        ));

        let mut wrapped = ByteBuf::wrapped(vec![1, 2, 3]);
        assert_eq!(wrapped.readable_bytes(), 3);
        assert!(matches!(
            wrapped.write_u8(4),
            Err(BufferError::Overflow { .. })
        ));
    }

    #[test]
    fn discard_read_bytes_preserves_readable_content() {
        let mut buf = ByteBuf::dynamic();
        buf.write_bytes(b"0123456789").unwrap();
        buf.skip_bytes(4).unwrap();
        let before = buf.to_vec();

        buf.discard_read_bytes();
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.writer_index(), 6);
        assert_eq!(buf.to_vec(), before);
        assert_eq!(buf.read_u8().unwrap(), b'4');
    }

    #[test]
    fn duplicate_reads_do_not_move_parent_indices() {
        let mut buf = ByteBuf::wrapped(vec![1, 2, 3, 4]);
        let mut dup = buf.duplicate();
        assert_eq!(dup.read_u16().unwrap(), 0x0102);
        assert_eq!(buf.reader_index(), 0);
        // Shared storage: a write through the parent is seen by the view.
        buf.set_u8(2, 9).unwrap();
        assert_eq!(dup.read_u8().unwrap(), 9);
    }

    #[test]
    fn slice_bounds_reads_to_its_window() {
        let buf = ByteBuf::wrapped(vec![10, 11, 12, 13, 14]);
        let slice = buf.slice_at(1, 3).unwrap();
        assert_eq!(slice.capacity(), 3);
        assert_eq!(slice.get_u8(0).unwrap(), 11);
        assert_eq!(slice.get_u8(2).unwrap(), 13);
        assert!(matches!(
            slice.get_u8(3),
            Err(BufferError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn slice_special_cases() {
        let buf = ByteBuf::wrapped(vec![1, 2, 3, 4]);

        let empty = buf.slice_at(2, 0).unwrap();
        assert_eq!(empty.capacity(), 0);

        let full = buf.slice_at(0, 4).unwrap();
        assert_eq!(full.reader_index(), 0);
        assert_eq!(full.writer_index(), 4);
        assert_eq!(full.capacity(), 4);
        assert_eq!(full.to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn copy_is_independent_storage() {
        let mut buf = ByteBuf::wrapped(vec![5, 6, 7]);
        let copy = buf.copy();
        buf.set_u8(0, 0).unwrap();
        assert_eq!(copy.to_vec(), vec![5, 6, 7]);
    }

    #[test]
    fn buffer_to_buffer_transfers_move_the_documented_cursors() {
        let src = ByteBuf::wrapped(vec![1, 2, 3, 4]);
        let mut dst = ByteBuf::dynamic();
        src.get_bytes_into(1, &mut dst, 2).unwrap();
        assert_eq!(dst.to_vec(), vec![2, 3]);
        // Source cursors are untouched by get_bytes_into.
        assert_eq!(src.reader_index(), 0);

        let mut src2 = ByteBuf::wrapped(vec![8, 9]);
        let mut dst2 = ByteBuf::fixed(4);
        dst2.set_writer_index(4).unwrap();
        dst2.set_bytes_from(1, &mut src2, 2).unwrap();
        assert_eq!(src2.reader_index(), 2);
        assert_eq!(dst2.get_u8(1).unwrap(), 8);
        assert_eq!(dst2.get_u8(2).unwrap(), 9);
    }

    #[test]
    fn same_storage_transfer_between_slice_and_parent() {
        let mut buf = ByteBuf::dynamic_with(16);
        buf.write_bytes(b"abcdef").unwrap();
        let mut head = buf.slice_at(0, 3).unwrap();
        // Append the slice's window back onto the parent.
        buf.write_buf(&mut head).unwrap();
        assert_eq!(buf.to_vec(), b"abcdefabc".to_vec());
        assert_eq!(head.readable_bytes(), 0);
    }

    #[test]
    fn io_read_short_counts_are_returned_as_is() {
        let mut buf = ByteBuf::dynamic();
        let mut src = Cursor::new(vec![1u8, 2, 3]);
        assert_eq!(buf.write_from(&mut src, 8).unwrap(), 3);
        assert_eq!(buf.readable_bytes(), 3);
        // Exhausted source signals end of input with a zero count.
        assert_eq!(buf.write_from(&mut src, 8).unwrap(), 0);
    }

    #[test]
    fn exact_io_read_fails_on_a_short_source() {
        let mut buf = ByteBuf::dynamic();
        let mut src = Cursor::new(vec![1u8, 2, 3]);
        assert!(matches!(
            buf.write_from_exact(&mut src, 8),
            Err(BufferError::EndOfInput)
        ));
        // Bytes produced before the end were still written.
        assert_eq!(buf.to_vec(), vec![1, 2, 3]);

        let mut src = Cursor::new(vec![4u8, 5]);
        buf.write_from_exact(&mut src, 2).unwrap();
        assert_eq!(buf.to_vec(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn io_write_caps_at_readable_and_returns_actual_count() {
        let mut buf = ByteBuf::wrapped(vec![1, 2, 3]);
        let mut out = Vec::new();
        assert_eq!(buf.write_to(&mut out, 10).unwrap(), 3);
        assert_eq!(out, vec![1, 2, 3]);
        assert!(!buf.is_readable());
    }

    #[test]
    fn read_bytes_returns_owning_buffer() {
        let mut buf = ByteBuf::wrapped(vec![1, 2, 3, 4]);
        let mut chunk = buf.read_bytes(2).unwrap();
        assert_eq!(buf.reader_index(), 2);
        assert_eq!(chunk.read_u8().unwrap(), 1);
        // Mutating the origin does not affect the owned chunk.
        buf.set_u8(1, 0).unwrap();
        assert_eq!(chunk.read_u8().unwrap(), 2);
    }

    #[test]
    fn empty_singleton_has_zero_capacity() {
        let mut empty = ByteBuf::empty();
        assert_eq!(empty.capacity(), 0);
        assert!(matches!(
            empty.write_u8(0),
            Err(BufferError::Overflow { .. })
        ));
    }

    #[test]
    fn randomized_bulk_round_trip() {
        use rand::Rng;
        let mut payload = vec![0u8; 4096];
        rand::thread_rng().fill(&mut payload[..]);

        let mut buf = ByteBuf::dynamic_with(16);
        buf.write_bytes(&payload).unwrap();
        let mut out = vec![0u8; 4096];
        buf.read_into(&mut out).unwrap();
        assert_eq!(out, payload);
    }
}
