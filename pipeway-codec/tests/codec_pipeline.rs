//! Codec scenarios over the embedded channel: delimiter framing with
//! too-long-frame recovery, and base64 round trips.

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pipeway::{BoxError, Handler, HandlerContext, HandlerKind, HandlerKinds};
use pipeway_buffer::ByteBuf;
use pipeway_codec::{
    delimiters, Base64Decoder, Base64Encoder, ByteArrayDecoder, ByteArrayEncoder,
    DelimiterBasedFrameDecoder, MessageToStreamEncoder, StreamToMessageDecoder,
    TooLongFrameError,
};
use pipeway_transport::EmbeddedStreamChannel;
use rand::Rng;

/// Records every exception that travels past it, tagging the codec-owned
/// too-long-frame condition.
struct ExceptionProbe {
    causes: Arc<Mutex<Vec<String>>>,
}

impl Handler for ExceptionProbe {
    fn kinds(&self) -> HandlerKinds {
        HandlerKinds::of(&[HandlerKind::State])
    }

    fn exception_caught(&mut self, _ctx: &HandlerContext, cause: BoxError) -> Result<(), BoxError> {
        let tag = if cause.downcast_ref::<TooLongFrameError>().is_some() {
            "too-long"
        } else {
            "other"
        };
        self.causes.lock().unwrap().push(format!("{tag}: {cause}"));
        Ok(())
    }
}

#[test]
fn delimiter_framing_reports_too_long_frames_and_recovers() {
    let channel = EmbeddedStreamChannel::new();
    let causes = Arc::new(Mutex::new(Vec::new()));
    channel
        .pipeline()
        .add_last(
            "frame-decoder",
            StreamToMessageDecoder::new(Box::new(DelimiterBasedFrameDecoder::with_options(
                1,
                true,
                false,
                delimiters::nul_delimiter(),
            ))),
        )
        .unwrap();
    channel
        .pipeline()
        .add_last("probe", ExceptionProbe { causes: causes.clone() })
        .unwrap();
    channel.activate();

    // Recovery is idempotent: the same sequence behaves the same twice.
    for round in 1..=2 {
        channel.write_inbound([0x01, 0x02]).unwrap();
        assert!(channel.read_inbound().is_none());

        channel.write_inbound([0x00]).unwrap();
        {
            let causes = causes.lock().unwrap();
            assert_eq!(causes.len(), round, "one failure per oversized frame");
            assert!(causes[round - 1].starts_with("too-long"));
        }

        channel.write_inbound([b'A', 0x00]).unwrap();
        let frame = channel.read_inbound_as::<ByteBuf>().expect("one frame");
        assert_eq!(frame.to_vec(), b"A".to_vec());
        assert!(channel.read_inbound().is_none());
    }
}

#[test]
fn base64_encode_decode_round_trips_random_payload() {
    let channel = EmbeddedStreamChannel::new();
    channel
        .pipeline()
        .add_last(
            "base64-encoder",
            MessageToStreamEncoder::new(Box::new(Base64Encoder::new(false))),
        )
        .unwrap();
    channel
        .pipeline()
        .add_last(
            "base64-decoder",
            StreamToMessageDecoder::new(Box::new(Base64Decoder::new())),
        )
        .unwrap();
    channel.activate();

    let mut payload = vec![0u8; 2048];
    rand::thread_rng().fill(&mut payload[..]);

    // Outbound: the wire carries the base64 text.
    let future = channel.write(Box::new(ByteBuf::copied(&payload)));
    assert!(future.is_success());
    let wire = channel.take_outbound();
    assert_eq!(&wire[..], STANDARD.encode(&payload).as_bytes());

    // Inbound: feeding the wire text back restores the payload.
    channel.write_inbound(&wire).unwrap();
    let mut decoded = Vec::new();
    while let Some(chunk) = channel.read_inbound_as::<ByteBuf>() {
        decoded.extend(chunk.to_vec());
    }
    assert_eq!(decoded, payload);
}

#[test]
fn base64_decoder_handles_split_arrivals() {
    let channel = EmbeddedStreamChannel::new();
    channel
        .pipeline()
        .add_last(
            "base64-decoder",
            StreamToMessageDecoder::new(Box::new(Base64Decoder::new())),
        )
        .unwrap();
    channel.activate();

    let encoded = STANDARD.encode(b"split across arrivals");
    let (left, right) = encoded.as_bytes().split_at(7);
    channel.write_inbound(left).unwrap();
    channel.write_inbound(right).unwrap();

    let mut decoded = Vec::new();
    while let Some(chunk) = channel.read_inbound_as::<ByteBuf>() {
        decoded.extend(chunk.to_vec());
    }
    assert_eq!(decoded, b"split across arrivals".to_vec());
}

#[test]
fn byte_array_codec_bridges_application_messages() {
    let channel = EmbeddedStreamChannel::new();
    channel
        .pipeline()
        .add_last(
            "frame-decoder",
            StreamToMessageDecoder::new(Box::new(DelimiterBasedFrameDecoder::new(
                64,
                delimiters::nul_delimiter(),
            ))),
        )
        .unwrap();
    channel
        .pipeline()
        .add_last("byte-array-decoder", ByteArrayDecoder::new())
        .unwrap();
    channel
        .pipeline()
        .add_last(
            "byte-array-encoder",
            MessageToStreamEncoder::new(Box::new(ByteArrayEncoder::new())),
        )
        .unwrap();
    channel.activate();

    // Outbound: a Vec<u8> message lands on the wire as raw bytes.
    let future = channel.write(Box::new(b"ping".to_vec()));
    assert!(future.is_success());
    assert_eq!(&channel.take_outbound()[..], b"ping");

    // Inbound: a framed message arrives as a Vec<u8>.
    channel.write_inbound(b"pong\0").unwrap();
    let message = channel.read_inbound_as::<Vec<u8>>().expect("one message");
    assert_eq!(*message, b"pong".to_vec());
}
