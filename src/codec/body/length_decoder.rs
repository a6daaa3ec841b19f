use std::cmp;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::{HttpError, PayloadItem};

/// Decoder for a payload whose size was declared through `Content-Length`.
///
/// Tracks the bytes still owed and yields [`PayloadItem::Eof`] exactly once
/// when the declared count has been consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    remaining: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = HttpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let take = cmp::min(self.remaining, src.len() as u64);
        let bytes = src.split_to(take as usize).freeze();
        self.remaining -= bytes.len() as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_the_declared_length() {
        let mut buffer = BytesMut::from(&b"1012345678rest-of-stream"[..]);
        let mut decoder = LengthDecoder::new(10);

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap().as_ref(), b"1012345678");
        assert_eq!(&buffer[..], b"rest-of-stream");

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn yields_partial_chunks_as_bytes_arrive() {
        let mut decoder = LengthDecoder::new(6);

        let mut buffer = BytesMut::from(&b"abc"[..]);
        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap().as_ref(), b"abc");

        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"def");
        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap().as_ref(), b"def");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }
}
