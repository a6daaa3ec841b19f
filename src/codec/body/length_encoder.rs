use bytes::BytesMut;
use tokio_util::codec::Encoder;

use crate::protocol::{HttpError, PayloadItem};

/// Encoder for a payload with a declared `Content-Length`.
///
/// The declared and the actual byte count must agree: producing more bytes
/// than declared, or signalling end-of-payload short of it, fails the
/// exchange rather than corrupting the connection framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    remaining: u64,
    received_eof: bool,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length, received_eof: false }
    }

    pub fn is_finished(&self) -> bool {
        self.remaining == 0 && self.received_eof
    }
}

impl Encoder<PayloadItem> for LengthEncoder {
    type Error = HttpError;

    fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(bytes) => {
                if bytes.is_empty() {
                    return Ok(());
                }
                if bytes.len() as u64 > self.remaining {
                    return Err(HttpError::internal(format!(
                        "response body exceeds declared Content-Length by {} bytes",
                        bytes.len() as u64 - self.remaining
                    )));
                }
                self.remaining -= bytes.len() as u64;
                dst.extend_from_slice(&bytes);
                Ok(())
            }
            PayloadItem::Eof => {
                if self.remaining != 0 {
                    return Err(HttpError::internal(format!(
                        "response body ended {} bytes short of declared Content-Length",
                        self.remaining
                    )));
                }
                self.received_eof = true;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn exact_length_finishes() {
        let mut encoder = LengthEncoder::new(5);
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"Done!")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Eof, &mut dst).unwrap();

        assert!(encoder.is_finished());
        assert_eq!(&dst[..], b"Done!");
    }

    #[test]
    fn overflow_is_detected() {
        let mut encoder = LengthEncoder::new(3);
        let mut dst = BytesMut::new();

        let result = encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"toolong")), &mut dst);
        assert!(matches!(result, Err(HttpError::Internal { .. })));
    }

    #[test]
    fn short_body_is_detected() {
        let mut encoder = LengthEncoder::new(10);
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"abc")), &mut dst).unwrap();
        let result = encoder.encode(PayloadItem::Eof, &mut dst);
        assert!(matches!(result, Err(HttpError::Internal { .. })));
    }
}
