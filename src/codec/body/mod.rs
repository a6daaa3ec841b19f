//! Payload codecs, dispatched by declared payload size.

mod length_decoder;
mod length_encoder;

pub use length_decoder::LengthDecoder;
pub use length_encoder::LengthEncoder;

use bytes::BytesMut;
use tokio_util::codec::Encoder;

use crate::protocol::{HttpError, PayloadItem, PayloadSize};

/// Encoder for one response payload, selected by the declared size.
#[derive(Debug)]
pub enum PayloadEncoder {
    /// Known length; byte counts are verified.
    Length(LengthEncoder),
    /// Unknown length; bytes pass through and the end of the payload is the
    /// end of the stream (the connection closes afterwards).
    Raw { received_eof: bool },
}

impl PayloadEncoder {
    /// The encoder for a declared size; `None` when there is no payload to
    /// encode at all.
    pub fn for_size(payload_size: PayloadSize) -> Option<Self> {
        match payload_size {
            PayloadSize::Length(n) => Some(Self::Length(LengthEncoder::new(n))),
            PayloadSize::Unknown => Some(Self::Raw { received_eof: false }),
            PayloadSize::Empty => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Self::Length(encoder) => encoder.is_finished(),
            Self::Raw { received_eof } => *received_eof,
        }
    }
}

impl Encoder<PayloadItem> for PayloadEncoder {
    type Error = HttpError;

    fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self {
            Self::Length(encoder) => encoder.encode(item, dst),
            Self::Raw { received_eof } => {
                match item {
                    PayloadItem::Chunk(bytes) => dst.extend_from_slice(&bytes),
                    PayloadItem::Eof => *received_eof = true,
                }
                Ok(())
            }
        }
    }
}
