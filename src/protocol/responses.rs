//! Canned responses for the statuses the server itself produces.
//!
//! All of these are infallible by construction; the build panics below are
//! unreachable.

use http::header::{CONNECTION, CONTENT_TYPE, UPGRADE};
use http::StatusCode;

use crate::protocol::{Response, ResponseBuilder};

fn canned(builder: ResponseBuilder) -> Response {
    builder.build().expect("canned response must build")
}

/// `200 OK`, empty body.
pub fn ok() -> Response {
    canned(Response::builder(StatusCode::OK))
}

/// `200 OK` with a `text/plain; charset=utf-8` body.
pub fn text(body: impl Into<String>) -> Response {
    canned(
        Response::builder(StatusCode::OK)
            .header(CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.as_ref())
            .body(body.into()),
    )
}

/// `202 Accepted`.
pub fn accepted() -> Response {
    canned(Response::builder(StatusCode::ACCEPTED))
}

/// `204 No Content`.
pub fn no_content() -> Response {
    canned(Response::builder(StatusCode::NO_CONTENT))
}

/// `100 Continue`.
pub fn continue_() -> Response {
    canned(Response::builder(StatusCode::CONTINUE))
}

/// `102 Processing`.
pub fn processing() -> Response {
    canned(Response::builder(StatusCode::PROCESSING))
}

/// `400 Bad Request`.
pub fn bad_request() -> Response {
    canned(Response::builder(StatusCode::BAD_REQUEST))
}

/// `404 Not Found`.
pub fn not_found() -> Response {
    canned(Response::builder(StatusCode::NOT_FOUND))
}

/// `408 Request Timeout`. Closes the connection: after a read timeout the
/// input stream position is unknown.
pub fn request_timeout() -> Response {
    canned(Response::builder(StatusCode::REQUEST_TIMEOUT).close_after_write(true))
}

/// `413 Entity Too Large`. Closes the connection: the remainder of the
/// over-long head is still in flight.
pub fn entity_too_large() -> Response {
    canned(
        Response::builder(StatusCode::PAYLOAD_TOO_LARGE)
            .reason("Entity Too Large")
            .close_after_write(true),
    )
}

/// `426 Upgrade Required`, advertising the given protocol. Carries
/// `Connection: Upgrade` for clients that can keep the connection, else
/// `Connection: close`.
pub fn upgrade_required(upgrade: &str, client_keeps_connection: bool) -> Response {
    let builder = Response::builder(StatusCode::UPGRADE_REQUIRED).header(UPGRADE, upgrade);
    let builder = if client_keeps_connection {
        builder.header(CONNECTION, "Upgrade")
    } else {
        builder.close_after_write(true)
    };
    canned(builder)
}

/// `500 Internal Server Error`.
pub fn internal_server_error() -> Response {
    canned(Response::builder(StatusCode::INTERNAL_SERVER_ERROR))
}

/// `501 Not Implemented`.
pub fn not_implemented() -> Response {
    canned(Response::builder(StatusCode::NOT_IMPLEMENTED))
}

/// `503 Service Unavailable`, closing the connection afterwards.
pub fn service_unavailable() -> Response {
    canned(Response::builder(StatusCode::SERVICE_UNAVAILABLE).close_after_write(true))
}

/// `505 HTTP Version Not Supported`.
pub fn http_version_not_supported() -> Response {
    canned(Response::builder(StatusCode::HTTP_VERSION_NOT_SUPPORTED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PayloadSize;

    #[test]
    fn text_carries_type_and_length() {
        let response = text("Hello World!");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/plain; charset=utf-8");
        assert_eq!(response.payload_size(), PayloadSize::Length(12));
    }

    #[test]
    fn upgrade_required_varies_by_client_capability() {
        let keeps = upgrade_required("HTTP/1.1", true);
        assert_eq!(keeps.headers().get(UPGRADE).unwrap(), "HTTP/1.1");
        assert_eq!(keeps.headers().get(CONNECTION).unwrap(), "Upgrade");
        assert!(!keeps.must_close_after_write());

        let closes = upgrade_required("HTTP/1.1", false);
        assert_eq!(closes.headers().get(CONNECTION).unwrap(), "close");
        assert!(closes.must_close_after_write());
    }

    #[test]
    fn stream_corrupting_statuses_close() {
        assert!(request_timeout().must_close_after_write());
        assert!(entity_too_large().must_close_after_write());
        assert!(service_unavailable().must_close_after_write());
    }
}
