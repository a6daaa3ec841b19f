use bytes::BytesMut;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::Method;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{HttpError, HttpVersion, PayloadSize, RequestHead};

/// Incremental decoder for a request head: request line plus header block,
/// terminated by an empty line.
///
/// The decoder is strict CRLF and enforces a total size cap: a head whose
/// byte count (terminator included) is exactly the cap still parses, one
/// byte more fails. Any decimal `HTTP/<major>.<minor>` token is accepted
/// here; version policy belongs to the exchange, which must be able to see
/// a 0.9 or 2.0 request line to answer it properly.
///
/// Decoding is stateless between heads, so one instance serves every
/// exchange of a persistent connection.
pub struct HeadDecoder {
    max_head_size: usize,
}

impl HeadDecoder {
    pub fn new(max_head_size: usize) -> Self {
        Self { max_head_size }
    }

    /// Adjusts the cap; applies from the next head on.
    pub fn set_max_head_size(&mut self, max_head_size: usize) {
        self.max_head_size = max_head_size;
    }
}

impl Decoder for HeadDecoder {
    type Item = (RequestHead, PayloadSize);
    type Error = HttpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let terminator = match find_terminator(src) {
            Some(position) => position,
            None => {
                ensure!(src.len() <= self.max_head_size, HttpError::head_too_large(self.max_head_size));
                return Ok(None);
            }
        };

        let head_len = terminator + 4;
        ensure!(head_len <= self.max_head_size, HttpError::head_too_large(self.max_head_size));
        trace!(head_len, "parsed request head block");

        let block = src.split_to(head_len);
        let text = std::str::from_utf8(&block[..terminator])
            .map_err(|_| HttpError::head_parse("head is not valid ascii"))?;

        let mut lines = text.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let (method, target, version) = parse_request_line(request_line)?;

        let mut headers = HeaderMap::new();
        for line in lines {
            let (name, value) = parse_header_line(line)?;
            headers.append(name, value);
        }

        let payload_size = parse_payload_size(&headers)?;
        let head = RequestHead::new(method, target, version, headers);
        Ok(Some((head, payload_size)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if src.is_empty() => Ok(None),
            // the peer hung up mid-head
            None => Err(HttpError::EndOfStream),
        }
    }
}

fn find_terminator(src: &[u8]) -> Option<usize> {
    src.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_request_line(line: &str) -> Result<(Method, String, HttpVersion), HttpError> {
    let mut parts = line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version), None) => (method, target, version),
        _ => return Err(HttpError::head_parse(format!("malformed request line {line:?}"))),
    };
    ensure!(
        !method.is_empty() && !target.is_empty() && !version.is_empty(),
        HttpError::head_parse(format!("malformed request line {line:?}"))
    );

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| HttpError::head_parse(format!("invalid method {method:?}")))?;
    let version = HttpVersion::parse(version)?;
    Ok((method, target.to_string(), version))
}

fn parse_header_line(line: &str) -> Result<(HeaderName, HeaderValue), HttpError> {
    ensure!(
        !line.starts_with(' ') && !line.starts_with('\t'),
        HttpError::bad_header("obsolete line folding")
    );

    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| HttpError::head_parse(format!("malformed header line {line:?}")))?;
    ensure!(
        !name.ends_with(' ') && !name.ends_with('\t'),
        HttpError::head_parse(format!("whitespace before colon in {line:?}"))
    );

    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| HttpError::head_parse(format!("invalid header name {name:?}")))?;
    let value = HeaderValue::from_str(value.trim_matches([' ', '\t']))
        .map_err(|_| HttpError::bad_header(format!("invalid value for {name}")))?;
    Ok((name, value))
}

fn parse_payload_size(headers: &HeaderMap) -> Result<PayloadSize, HttpError> {
    // chunked transfer coding is outside this core
    ensure!(
        !headers.contains_key(TRANSFER_ENCODING),
        HttpError::bad_header("transfer encoding is not supported")
    );

    let mut declared: Option<u64> = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let text = value
            .to_str()
            .map_err(|_| HttpError::bad_header("content-length is not ascii"))?;
        let length = text
            .trim()
            .parse::<u64>()
            .map_err(|_| HttpError::bad_header(format!("content-length {text:?} is not an integer")))?;
        if let Some(previous) = declared {
            ensure!(previous == length, HttpError::bad_header("conflicting Content-Length headers"));
        }
        declared = Some(length);
    }

    Ok(PayloadSize::from_content_length(declared.unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(input: &str) -> Result<Option<(RequestHead, PayloadSize)>, HttpError> {
        let mut buffer = BytesMut::from(input);
        HeadDecoder::new(8_000).decode(&mut buffer)
    }

    #[test]
    fn parses_a_plain_get() {
        let (head, payload_size) = decode(
            "GET /index.html HTTP/1.1\r\nHost: 127.0.0.1:8080\r\nAccept: */*\r\n\r\n",
        )
        .unwrap()
        .unwrap();

        assert_eq!(head.method(), &Method::GET);
        assert_eq!(head.target(), "/index.html");
        assert_eq!(head.version(), HttpVersion::HTTP_11);
        assert_eq!(head.headers().len(), 2);
        assert_eq!(head.headers().get("host").unwrap(), "127.0.0.1:8080");
        assert_eq!(payload_size, PayloadSize::Empty);
    }

    #[test]
    fn leaves_body_bytes_in_the_buffer() {
        let mut buffer = BytesMut::from("POST /u HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc");
        let (_, payload_size) = HeadDecoder::new(8_000).decode(&mut buffer).unwrap().unwrap();
        assert_eq!(payload_size, PayloadSize::Length(3));
        assert_eq!(&buffer[..], b"abc");
    }

    #[test]
    fn needs_more_bytes_until_the_blank_line() {
        let mut buffer = BytesMut::from("GET / HTTP/1.1\r\nHost: x");
        let mut decoder = HeadDecoder::new(8_000);
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"\r\n\r\n");
        assert!(decoder.decode(&mut buffer).unwrap().is_some());
    }

    #[test]
    fn old_and_new_versions_parse_for_the_exchange_to_judge() {
        let (head, _) = decode("GET / HTTP/0.9\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.version(), HttpVersion::new(0, 9));

        let (head, _) = decode("GET / HTTP/2.0\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.version(), HttpVersion::new(2, 0));

        assert!(matches!(decode("GET / HTTP/1x\r\n\r\n"), Err(HttpError::VersionParse { .. })));
    }

    #[test]
    fn malformed_request_lines_fail() {
        for line in ["GET /", "GET  / HTTP/1.1", "GET / HTTP/1.1 extra", " / HTTP/1.1"] {
            let result = decode(&format!("{line}\r\n\r\n"));
            assert!(
                matches!(result, Err(HttpError::HeadParse { .. })),
                "line {line:?} must fail as HeadParse"
            );
        }
    }

    #[test]
    fn header_lines_are_validated() {
        assert!(matches!(
            decode("GET / HTTP/1.1\r\nno-colon-here\r\n\r\n"),
            Err(HttpError::HeadParse { .. })
        ));
        assert!(matches!(
            decode("GET / HTTP/1.1\r\nName : v\r\n\r\n"),
            Err(HttpError::HeadParse { .. })
        ));
        assert!(matches!(
            decode("GET / HTTP/1.1\r\nA: ok\r\n  folded\r\n\r\n"),
            Err(HttpError::BadHeader { .. })
        ));
        assert!(matches!(
            decode("GET / HTTP/1.1\r\nBad: a\x01b\r\n\r\n"),
            Err(HttpError::BadHeader { .. })
        ));
    }

    #[test]
    fn multi_valued_headers_keep_their_order() {
        let (head, _) = decode("GET / HTTP/1.1\r\nX-N: one\r\nX-N: two\r\n\r\n").unwrap().unwrap();
        let values: Vec<_> = head.headers().get_all("x-n").iter().collect();
        assert_eq!(values, vec!["one", "two"]);
    }

    #[test]
    fn head_at_the_cap_parses_and_one_more_byte_fails() {
        let head = "GET / HTTP/1.1\r\nHost: h\r\n\r\n";

        let mut buffer = BytesMut::from(head);
        let at_cap = HeadDecoder::new(head.len()).decode(&mut buffer);
        assert!(at_cap.unwrap().is_some());

        let mut buffer = BytesMut::from(head);
        let over_cap = HeadDecoder::new(head.len() - 1).decode(&mut buffer);
        assert!(matches!(over_cap, Err(HttpError::HeadTooLarge { .. })));
    }

    #[test]
    fn partial_head_beyond_the_cap_fails_early() {
        let mut buffer = BytesMut::from("AB");
        let result = HeadDecoder::new(1).decode(&mut buffer);
        assert!(matches!(result, Err(HttpError::HeadTooLarge { limit: 1 })));
    }

    #[test]
    fn content_length_conflicts_fail() {
        assert!(matches!(
            decode("GET / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n"),
            Err(HttpError::BadHeader { .. })
        ));
        assert!(matches!(
            decode("GET / HTTP/1.1\r\nContent-Length: ten\r\n\r\n"),
            Err(HttpError::BadHeader { .. })
        ));
        assert!(matches!(
            decode("GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n"),
            Err(HttpError::BadHeader { .. })
        ));
    }

    #[test]
    fn eof_mid_head_is_end_of_stream() {
        let mut decoder = HeadDecoder::new(8_000);

        let mut empty = BytesMut::new();
        assert!(decoder.decode_eof(&mut empty).unwrap().is_none());

        let mut partial = BytesMut::from("GET / HT");
        assert!(matches!(decoder.decode_eof(&mut partial), Err(HttpError::EndOfStream)));
    }
}
