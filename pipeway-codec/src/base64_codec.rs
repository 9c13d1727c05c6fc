//! Base64 payload codec.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pipeway::{BoxError, Msg};
use pipeway_buffer::ByteBuf;

use crate::byte_to_message_decoder::Decoder;
use crate::error::CodecError;
use crate::message_to_stream_encoder::Encoder;

/// Line width used when `break_lines` is enabled, per MIME.
const LINE_LENGTH: usize = 76;

/// Encodes [`ByteBuf`] messages into base64 text.
///
/// Use through [`MessageToStreamEncoder`](crate::MessageToStreamEncoder):
///
/// ```rust,ignore
/// pipeline.add_last(
///     "base64-encoder",
///     MessageToStreamEncoder::new(Box::new(Base64Encoder::new(false))),
/// )?;
/// ```
pub struct Base64Encoder {
    break_lines: bool,
}

impl Base64Encoder {
    /// Creates an encoder; `break_lines` inserts a newline every 76
    /// characters of output.
    pub fn new(break_lines: bool) -> Self {
        Base64Encoder { break_lines }
    }
}

impl Encoder for Base64Encoder {
    fn is_encodable(&self, msg: &Msg) -> bool {
        msg.is::<ByteBuf>()
    }

    fn encode(&mut self, msg: Msg, out: &mut ByteBuf) -> Result<(), BoxError> {
        let buf = msg
            .downcast::<ByteBuf>()
            .map_err(|_| CodecError("base64 encoder expects byte buffer messages".to_owned()))?;
        let encoded = STANDARD.encode(buf.to_vec());
        if self.break_lines {
            let mut chars = encoded.as_bytes();
            while chars.len() > LINE_LENGTH {
                out.write_bytes(&chars[..LINE_LENGTH])?;
                out.write_u8(b'\n')?;
                chars = &chars[LINE_LENGTH..];
            }
            out.write_bytes(chars)?;
        } else {
            out.write_bytes(encoded.as_bytes())?;
        }
        Ok(())
    }
}

/// Decodes a base64 byte stream back into raw [`ByteBuf`] messages.
///
/// Consumes complete 4-character groups as they arrive, skipping line
/// breaks, so a stream produced with `break_lines` decodes the same as an
/// unbroken one. Use through
/// [`StreamToMessageDecoder`](crate::StreamToMessageDecoder).
#[derive(Default)]
pub struct Base64Decoder;

impl Base64Decoder {
    /// Creates a decoder.
    pub fn new() -> Self {
        Base64Decoder
    }
}

impl Decoder for Base64Decoder {
    fn decode(&mut self, buf: &mut ByteBuf) -> Result<Option<Msg>, BoxError> {
        let data = buf.to_vec();

        // Find the end of the last complete 4-character group, counting
        // only non-line-break characters, then swallow trailing breaks.
        let mut significant = 0;
        let mut cut = 0;
        for (index, &byte) in data.iter().enumerate() {
            if byte != b'\r' && byte != b'\n' {
                significant += 1;
                if significant % 4 == 0 {
                    cut = index + 1;
                }
            }
        }
        while cut < data.len() && (data[cut] == b'\r' || data[cut] == b'\n') {
            cut += 1;
        }
        if cut == 0 {
            return Ok(None);
        }

        buf.skip_bytes(cut)?;
        let filtered: Vec<u8> = data[..cut]
            .iter()
            .copied()
            .filter(|&byte| byte != b'\r' && byte != b'\n')
            .collect();
        let decoded = STANDARD
            .decode(&filtered)
            .map_err(|err| CodecError(format!("invalid base64 input: {err}")))?;
        Ok(Some(Box::new(ByteBuf::wrapped(decoded))))
    }
}
