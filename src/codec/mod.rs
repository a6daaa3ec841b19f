//! Wire codecs: an incremental request decoder and a response encoder, both
//! speaking the framed `Message` vocabulary.

pub mod body;

mod head_decoder;
mod response_encoder;

pub use head_decoder::HeadDecoder;
pub use response_encoder::ResponseEncoder;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::LengthDecoder;
use crate::protocol::{HttpError, Message, PayloadItem, PayloadSize, RequestHead};

/// Decoder for whole requests: a head, then the payload the head declared.
///
/// The decoder is a two-state machine. After a head that declares a payload
/// it stays in payload mode until the declared bytes (and the closing
/// [`PayloadItem::Eof`]) have been produced, then falls back to head mode
/// for the next exchange on the connection.
pub struct RequestDecoder {
    head_decoder: HeadDecoder,
    payload_decoder: Option<LengthDecoder>,
}

impl RequestDecoder {
    pub fn new(max_head_size: usize) -> Self {
        Self { head_decoder: HeadDecoder::new(max_head_size), payload_decoder: None }
    }

    /// Adjusts the head size cap; applies from the next head on.
    pub fn set_max_head_size(&mut self, max_head_size: usize) {
        self.head_decoder.set_max_head_size(max_head_size);
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHead, PayloadSize)>;
    type Error = HttpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    // payload complete, back to head mode
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };
            return Ok(message);
        }

        let message = match self.head_decoder.decode(src)? {
            Some((head, payload_size)) => {
                if let PayloadSize::Length(length) = payload_size {
                    self.payload_decoder = Some(LengthDecoder::new(length));
                }
                Some(Message::Header((head, payload_size)))
            }
            None => None,
        };
        Ok(message)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.payload_decoder.is_some() {
            // the peer hung up inside a declared payload
            return match self.decode(src)? {
                Some(message) => Ok(Some(message)),
                None => Err(HttpError::EndOfStream),
            };
        }
        match self.head_decoder.decode_eof(src)? {
            Some((head, payload_size)) => {
                if let PayloadSize::Length(length) = payload_size {
                    self.payload_decoder = Some(LengthDecoder::new(length));
                }
                Ok(Some(Message::Header((head, payload_size))))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_then_payload_then_next_head() {
        let mut decoder = RequestDecoder::new(8_000);
        let mut buffer = BytesMut::from(
            "POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /b HTTP/1.1\r\n\r\n",
        );

        match decoder.decode(&mut buffer).unwrap().unwrap() {
            Message::Header((head, payload_size)) => {
                assert_eq!(head.target(), "/a");
                assert_eq!(payload_size, PayloadSize::Length(5));
            }
            _ => panic!("expected header"),
        }

        match decoder.decode(&mut buffer).unwrap().unwrap() {
            Message::Payload(PayloadItem::Chunk(bytes)) => assert_eq!(bytes.as_ref(), b"hello"),
            _ => panic!("expected chunk"),
        }
        assert!(matches!(
            decoder.decode(&mut buffer).unwrap().unwrap(),
            Message::Payload(PayloadItem::Eof)
        ));

        // decoder is back in head mode for the pipelined request
        match decoder.decode(&mut buffer).unwrap().unwrap() {
            Message::Header((head, payload_size)) => {
                assert_eq!(head.target(), "/b");
                assert_eq!(payload_size, PayloadSize::Empty);
            }
            _ => panic!("expected header"),
        }
    }

    #[test]
    fn empty_payload_skips_payload_mode() {
        let mut decoder = RequestDecoder::new(8_000);
        let mut buffer = BytesMut::from("GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_header());
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_header());
    }

    #[test]
    fn eof_inside_a_payload_is_end_of_stream() {
        let mut decoder = RequestDecoder::new(8_000);
        let mut buffer = BytesMut::from("POST /a HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc");

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_header());
        // the partial chunk still decodes
        assert!(decoder.decode_eof(&mut buffer).unwrap().unwrap().is_payload());
        // then the truncation surfaces
        assert!(matches!(decoder.decode_eof(&mut buffer), Err(HttpError::EndOfStream)));
    }
}
