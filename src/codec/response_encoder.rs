use bytes::{BufMut, BytesMut};
use http::header::CONTENT_LENGTH;
use http::StatusCode;
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::body::PayloadEncoder;
use crate::protocol::{HttpError, Message, PayloadSize, ResponseHead};

const INIT_HEAD_SIZE: usize = 1024;

/// Encoder for response messages: a head, then the payload items the head
/// declared. Interim heads declare an empty payload, so any number of them
/// may precede the final head.
pub struct ResponseEncoder {
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for ResponseEncoder {
    fn default() -> Self {
        Self { payload_encoder: None }
    }
}

impl Encoder<Message<(ResponseHead, PayloadSize)>> for ResponseEncoder {
    type Error = HttpError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize)>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expected payload item but received a response head");
                    return Err(HttpError::internal("previous response payload still open"));
                }
                self.payload_encoder = PayloadEncoder::for_size(payload_size);
                encode_head(head, payload_size, dst);
                Ok(())
            }

            Message::Payload(payload_item) => {
                let encoder = match &mut self.payload_encoder {
                    Some(encoder) => encoder,
                    None => {
                        error!("expected response head but received a payload item");
                        return Err(HttpError::internal("payload item outside a response payload"));
                    }
                };

                let result = encoder.encode(payload_item, dst);
                if encoder.is_finished() {
                    self.payload_encoder.take();
                }
                result
            }
        }
    }
}

fn encode_head(mut head: ResponseHead, payload_size: PayloadSize, dst: &mut BytesMut) {
    sync_content_length(&mut head, payload_size);

    dst.reserve(INIT_HEAD_SIZE);
    dst.put_slice(b"HTTP/1.1 ");
    dst.put_slice(head.status().as_str().as_bytes());
    dst.put_slice(b" ");
    dst.put_slice(head.reason().as_bytes());
    dst.put_slice(b"\r\n");

    for (name, value) in head.headers().iter() {
        dst.put_slice(name.as_ref());
        dst.put_slice(b": ");
        dst.put_slice(value.as_ref());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}

fn sync_content_length(head: &mut ResponseHead, payload_size: PayloadSize) {
    match payload_size {
        PayloadSize::Length(n) => {
            head.headers_mut().insert(CONTENT_LENGTH, n.into());
        }
        PayloadSize::Empty => {
            // statuses that forbid a body must not declare a length either
            if !forbids_body(head.status()) && !head.headers().contains_key(CONTENT_LENGTH) {
                head.headers_mut().insert(CONTENT_LENGTH, 0.into());
            }
        }
        PayloadSize::Unknown => {
            // end-of-stream delimited; a length would lie
            head.headers_mut().remove(CONTENT_LENGTH);
        }
    }
}

fn forbids_body(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PayloadItem, Response};
    use bytes::Bytes;
    use http::header::CONTENT_TYPE;

    fn encode_response(response: Response, chunks: Vec<PayloadItem>) -> String {
        let payload_size = response.payload_size();
        let (head, _) = response.into_parts();

        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        encoder.encode(Message::Header((head, payload_size)), &mut dst).unwrap();
        for chunk in chunks {
            encoder.encode(Message::Payload(chunk), &mut dst).unwrap();
        }
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn status_line_headers_and_body() {
        let response = Response::builder(StatusCode::OK)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body("Hello World!")
            .build()
            .unwrap();

        let wire = encode_response(
            response,
            vec![PayloadItem::Chunk(Bytes::from_static(b"Hello World!")), PayloadItem::Eof],
        );

        assert_eq!(
            wire,
            "HTTP/1.1 200 OK\r\ncontent-type: text/plain; charset=utf-8\r\ncontent-length: 12\r\n\r\nHello World!"
        );
    }

    #[test]
    fn empty_body_declares_zero_length() {
        let response = Response::builder(StatusCode::NOT_FOUND).build().unwrap();
        let wire = encode_response(response, vec![]);
        assert!(wire.contains("content-length: 0\r\n"));
    }

    #[test]
    fn interim_and_no_content_carry_no_length() {
        let interim = Response::builder(StatusCode::PROCESSING).build().unwrap();
        let wire = encode_response(interim, vec![]);
        assert_eq!(wire, "HTTP/1.1 102 Processing\r\n\r\n");

        let no_content = Response::builder(StatusCode::NO_CONTENT).build().unwrap();
        let wire = encode_response(no_content, vec![]);
        assert!(!wire.contains("content-length"));
    }

    #[test]
    fn interim_heads_may_precede_the_final_head() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        for _ in 0..2 {
            let (head, _) = Response::builder(StatusCode::PROCESSING).build().unwrap().into_parts();
            encoder.encode(Message::Header((head, PayloadSize::Empty)), &mut dst).unwrap();
        }
        let (head, _) = Response::builder(StatusCode::OK).body("Done!").build().unwrap().into_parts();
        encoder.encode(Message::Header((head, PayloadSize::Length(5))), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"Done!"))), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Eof), &mut dst).unwrap();

        let wire = String::from_utf8(dst.to_vec()).unwrap();
        let first_interim = wire.find("102").unwrap();
        let second_interim = wire.rfind("102").unwrap();
        let final_head = wire.find("200").unwrap();
        assert!(first_interim < second_interim && second_interim < final_head);
        assert!(wire.ends_with("Done!"));
    }

    #[test]
    fn head_during_open_payload_is_refused() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        let (head, _) = Response::builder(StatusCode::OK).body("xx").build().unwrap().into_parts();
        encoder.encode(Message::Header((head, PayloadSize::Length(2))), &mut dst).unwrap();

        let (next_head, _) = Response::builder(StatusCode::OK).build().unwrap().into_parts();
        let result = encoder.encode(Message::Header((next_head, PayloadSize::Empty)), &mut dst);
        assert!(matches!(result, Err(HttpError::Internal { .. })));
    }
}
