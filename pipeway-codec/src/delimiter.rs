//! Delimiter-based framing with bounded frame length and too-long-frame
//! recovery.

use log::debug;
use pipeway::{BoxError, Msg};
use pipeway_buffer::ByteBuf;

use crate::byte_to_message_decoder::Decoder;
use crate::error::TooLongFrameError;

/// Common delimiter sets.
pub mod delimiters {
    /// The NUL delimiter, as used by Flash XML sockets and friends.
    pub fn nul_delimiter() -> Vec<Vec<u8>> {
        vec![vec![0]]
    }

    /// Line endings: `\r\n` before `\n` so CRLF is matched as one
    /// delimiter.
    pub fn line_delimiter() -> Vec<Vec<u8>> {
        vec![b"\r\n".to_vec(), b"\n".to_vec()]
    }
}

/// Splits a byte stream into frames ending with one of the configured
/// delimiters, producing each frame as a [`ByteBuf`] message.
///
/// When several delimiters match, the one producing the shortest frame
/// wins. A frame longer than `max_frame_length` raises
/// [`TooLongFrameError`]: immediately when `fail_fast` is set, otherwise
/// once the oversized frame's delimiter has been found and the stream
/// resynchronized. Either way the decoder recovers and decodes the
/// following frames normally.
pub struct DelimiterBasedFrameDecoder {
    delimiters: Vec<Vec<u8>>,
    max_frame_length: usize,
    strip_delimiter: bool,
    fail_fast: bool,
    discarding_too_long_frame: bool,
    too_long_frame_length: usize,
}

impl DelimiterBasedFrameDecoder {
    /// Creates a decoder that strips delimiters and fails fast.
    pub fn new(max_frame_length: usize, delimiters: Vec<Vec<u8>>) -> Self {
        Self::with_options(max_frame_length, true, true, delimiters)
    }

    /// Creates a decoder with explicit strip/fail-fast behavior.
    ///
    /// # Panics
    ///
    /// Panics when `delimiters` is empty or contains an empty delimiter.
    pub fn with_options(
        max_frame_length: usize,
        strip_delimiter: bool,
        fail_fast: bool,
        delimiters: Vec<Vec<u8>>,
    ) -> Self {
        assert!(!delimiters.is_empty(), "at least one delimiter is required");
        assert!(
            delimiters.iter().all(|delimiter| !delimiter.is_empty()),
            "empty delimiters are not allowed"
        );
        DelimiterBasedFrameDecoder {
            delimiters,
            max_frame_length,
            strip_delimiter,
            fail_fast,
            discarding_too_long_frame: false,
            too_long_frame_length: 0,
        }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        if haystack.len() < needle.len() {
            return None;
        }
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    }
}

impl Decoder for DelimiterBasedFrameDecoder {
    fn decode(&mut self, buf: &mut ByteBuf) -> Result<Option<Msg>, BoxError> {
        let data = buf.to_vec();

        // Pick the delimiter producing the shortest frame.
        let mut min_frame_length = usize::MAX;
        let mut min_delimiter_length = 0;
        for delimiter in &self.delimiters {
            if let Some(position) = Self::find(&data, delimiter) {
                if position < min_frame_length {
                    min_frame_length = position;
                    min_delimiter_length = delimiter.len();
                }
            }
        }

        if min_delimiter_length > 0 {
            if self.discarding_too_long_frame {
                // The oversized frame finally ended; drop it and report if
                // the failure was deferred.
                self.discarding_too_long_frame = false;
                let discarded = self.too_long_frame_length + min_frame_length;
                self.too_long_frame_length = 0;
                buf.skip_bytes(min_frame_length + min_delimiter_length)?;
                if !self.fail_fast {
                    return Err(Box::new(TooLongFrameError {
                        max: self.max_frame_length,
                        actual: discarded,
                    }));
                }
                return Ok(None);
            }

            if min_frame_length > self.max_frame_length {
                buf.skip_bytes(min_frame_length + min_delimiter_length)?;
                return Err(Box::new(TooLongFrameError {
                    max: self.max_frame_length,
                    actual: min_frame_length,
                }));
            }

            let frame = if self.strip_delimiter {
                let frame = buf.read_bytes(min_frame_length)?;
                buf.skip_bytes(min_delimiter_length)?;
                frame
            } else {
                buf.read_bytes(min_frame_length + min_delimiter_length)?
            };
            return Ok(Some(Box::new(frame)));
        }

        // No delimiter in sight.
        let readable = buf.readable_bytes();
        if !self.discarding_too_long_frame {
            if readable > self.max_frame_length {
                debug!("discarding {readable} bytes of an oversized frame");
                self.too_long_frame_length = readable;
                buf.skip_bytes(readable)?;
                self.discarding_too_long_frame = true;
                if self.fail_fast {
                    return Err(Box::new(TooLongFrameError {
                        max: self.max_frame_length,
                        actual: self.too_long_frame_length,
                    }));
                }
            }
        } else {
            self.too_long_frame_length += readable;
            buf.skip_bytes(readable)?;
        }
        Ok(None)
    }
}
