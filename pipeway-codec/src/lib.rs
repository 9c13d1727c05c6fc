//! # Pipeway Codec - Framing and Payload Codecs
//!
//! `pipeway-codec` layers reusable codecs over the `pipeway` core:
//!
//! - **Adapters**: [`StreamToMessageDecoder`] turns a [`Decoder`] into an
//!   inbound byte stage producing messages; [`MessageToStreamEncoder`]
//!   turns an [`Encoder`] into an outbound message stage producing bytes.
//! - **Framing**: [`DelimiterBasedFrameDecoder`] splits a byte stream on
//!   delimiter sequences with a maximum frame length and too-long-frame
//!   recovery.
//! - **Payload**: [`Base64Encoder`]/[`Base64Decoder`] and
//!   [`ByteArrayEncoder`]/[`ByteArrayDecoder`].
//!
//! ## Building a framed pipeline
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pipeway::{Channel, Pipeline};
//! use pipeway_codec::{delimiters, DelimiterBasedFrameDecoder, StreamToMessageDecoder};
//! # fn transport() -> Arc<dyn Channel> { unimplemented!() }
//!
//! let pipeline = Pipeline::new(transport());
//! pipeline
//!     .add_last(
//!         "frame-decoder",
//!         StreamToMessageDecoder::new(Box::new(DelimiterBasedFrameDecoder::new(
//!             8192,
//!             delimiters::line_delimiter(),
//!         ))),
//!     )
//!     .unwrap();
//! ```
//!
//! ## Errors
//!
//! Codec failures stay distinguishable while travelling through
//! `exception_caught`: codec-owned conditions are [`CodecError`] or
//! [`TooLongFrameError`], arbitrary failures raised inside a codec are
//! wrapped in [`DecoderError`] or [`EncoderError`].

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod base64_codec;
pub(crate) mod byte_to_message_decoder;
pub(crate) mod bytes_codec;
pub(crate) mod delimiter;
pub(crate) mod error;
pub(crate) mod message_to_stream_encoder;

pub use base64_codec::{Base64Decoder, Base64Encoder};
pub use byte_to_message_decoder::{Decoder, StreamToMessageDecoder};
pub use bytes_codec::{ByteArrayDecoder, ByteArrayEncoder};
pub use delimiter::{delimiters, DelimiterBasedFrameDecoder};
pub use error::{CodecError, DecoderError, EncoderError, TooLongFrameError};
pub use message_to_stream_encoder::{Encoder, MessageToStreamEncoder};
