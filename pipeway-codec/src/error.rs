use pipeway::BoxError;
use thiserror::Error;

/// A failure owned by a codec: malformed input, protocol violation, a
/// decoder that stopped making progress.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(pub String);

/// A frame exceeded the decoder's configured maximum length.
#[derive(Debug, Error)]
#[error("frame length {actual} exceeds maximum {max}")]
pub struct TooLongFrameError {
    /// The configured maximum frame length.
    pub max: usize,
    /// The offending frame length (or the byte count discarded so far,
    /// when the frame end has not been seen yet).
    pub actual: usize,
}

/// A non-codec failure raised while decoding, wrapped so receivers can
/// still tell it apart from codec-owned conditions.
#[derive(Debug, Error)]
#[error("decoder failure: {source}")]
pub struct DecoderError {
    /// The wrapped failure.
    #[source]
    pub source: BoxError,
}

/// A non-codec failure raised while encoding.
#[derive(Debug, Error)]
#[error("encoder failure: {source}")]
pub struct EncoderError {
    /// The wrapped failure.
    #[source]
    pub source: BoxError,
}

/// `true` when `cause` is one of the codec-owned error types that must
/// pass through `exception_caught` unchanged.
pub(crate) fn is_codec_error(cause: &BoxError) -> bool {
    cause.downcast_ref::<CodecError>().is_some()
        || cause.downcast_ref::<TooLongFrameError>().is_some()
        || cause.downcast_ref::<DecoderError>().is_some()
        || cause.downcast_ref::<EncoderError>().is_some()
}
