//! The outbound response: an immutable value built through a validating
//! builder.

use http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH};
use http::StatusCode;

use crate::protocol::body::ResponseBody;
use crate::protocol::request::connection_has_close;
use crate::protocol::{HttpError, PayloadSize};

/// The head of a response: status line material plus headers.
#[derive(Debug)]
pub struct ResponseHead {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
}

impl ResponseHead {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase to put on the wire: the override, the canonical
    /// phrase, or nothing.
    pub fn reason(&self) -> &str {
        match &self.reason {
            Some(reason) => reason,
            None => self.status.canonical_reason().unwrap_or(""),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

/// An immutable response. Build one with [`Response::builder`]; derive a
/// changed one with [`into_builder`](Response::into_builder).
pub struct Response {
    head: ResponseHead,
    body: ResponseBody,
    shutdown_output_after_write: bool,
    close_after_write: bool,
}

impl Response {
    pub fn builder(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder {
            status,
            reason: None,
            headers: HeaderMap::new(),
            body: ResponseBody::empty(),
            shutdown_output_after_write: false,
            close_after_write: false,
            error: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Whether the status is `1xx`.
    pub fn is_interim(&self) -> bool {
        self.head.status.is_informational()
    }

    pub fn is_final(&self) -> bool {
        !self.is_interim()
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn payload_size(&self) -> PayloadSize {
        self.body.payload_size()
    }

    pub fn must_shutdown_output_after_write(&self) -> bool {
        self.shutdown_output_after_write
    }

    pub fn must_close_after_write(&self) -> bool {
        self.close_after_write
    }

    /// Whether the response itself carries `Connection: close`.
    pub fn connection_close(&self) -> bool {
        connection_has_close(&self.head.headers)
    }

    /// Reopens the response as a builder, for deriving a modified copy.
    pub fn into_builder(self) -> ResponseBuilder {
        ResponseBuilder {
            status: self.head.status,
            reason: self.head.reason,
            headers: self.head.headers,
            body: self.body,
            shutdown_output_after_write: self.shutdown_output_after_write,
            close_after_write: self.close_after_write,
            error: None,
        }
    }

    pub(crate) fn into_parts(self) -> (ResponseHead, ResponseBody) {
        (self.head, self.body)
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.head.status)
            .field("headers", &self.head.headers)
            .field("close_after_write", &self.close_after_write)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Response`]. Every setter returns the derived builder;
/// [`build`](Self::build) validates the result.
pub struct ResponseBuilder {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    body: ResponseBody,
    shutdown_output_after_write: bool,
    close_after_write: bool,
    error: Option<HttpError>,
}

impl ResponseBuilder {
    /// Overrides the reason phrase (may be empty).
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Appends a header. Conversion failures surface at build time.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        if self.error.is_some() {
            return self;
        }
        let name = HeaderName::try_from(key).map_err(Into::into);
        let value = HeaderValue::try_from(value).map_err(Into::into);
        match (name, value) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            (Err(e), _) | (_, Err(e)) => {
                self.error = Some(HttpError::internal(format!("invalid header: {e}")));
            }
        }
        self
    }

    pub fn body(mut self, body: impl Into<ResponseBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Half-closes the output after this response has been written. Adds
    /// `Connection: close`; clearing (with no close flag left) removes it.
    pub fn shutdown_output_after_write(mut self, shutdown: bool) -> Self {
        self.shutdown_output_after_write = shutdown;
        self.sync_connection_close();
        self
    }

    /// Closes the connection after this response has been written. Adds
    /// `Connection: close`; clearing (with no close flag left) removes it.
    pub fn close_after_write(mut self, close: bool) -> Self {
        self.close_after_write = close;
        self.sync_connection_close();
        self
    }

    fn sync_connection_close(&mut self) {
        let want_close = self.shutdown_output_after_write || self.close_after_write;
        let has_close = connection_has_close(&self.headers);
        if want_close && !has_close {
            self.headers.append(CONNECTION, HeaderValue::from_static("close"));
        } else if !want_close && has_close {
            remove_connection_close(&mut self.headers);
        }
    }

    pub fn build(self) -> Result<Response, HttpError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut headers = self.headers;
        let body = self.body;

        // a message can declare its length at most once
        if headers.get_all(CONTENT_LENGTH).iter().count() > 1 {
            return Err(HttpError::illegal_body("multiple Content-Length headers"));
        }

        match body.payload_size() {
            PayloadSize::Length(n) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(n));
            }
            PayloadSize::Unknown => {
                // stale length from a previous derivation would lie
                headers.remove(CONTENT_LENGTH);
            }
            PayloadSize::Empty => {}
        }

        if self.status.is_informational() {
            if !body.is_empty() {
                return Err(HttpError::illegal_body("interim response with a body"));
            }
            if self.shutdown_output_after_write || self.close_after_write {
                return Err(HttpError::illegal_body("interim response with a connection flag"));
            }
            if connection_has_close(&headers) {
                return Err(HttpError::illegal_body("interim response with Connection: close"));
            }
        }

        Ok(Response {
            head: ResponseHead { status: self.status, reason: self.reason, headers },
            body,
            shutdown_output_after_write: self.shutdown_output_after_write,
            close_after_write: self.close_after_write,
        })
    }
}

/// Removes the `close` token from `Connection`, keeping other tokens.
fn remove_connection_close(headers: &mut HeaderMap) {
    let kept: Vec<HeaderValue> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty() && !token.eq_ignore_ascii_case("close"))
        .filter_map(|token| HeaderValue::from_str(token).ok())
        .collect();

    headers.remove(CONNECTION);
    for value in kept {
        headers.append(CONNECTION, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_body_sets_content_length() {
        let response = Response::builder(StatusCode::OK).body("Hello World!").build().unwrap();
        assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "12");
    }

    #[test]
    fn duplicate_content_length_is_rejected() {
        let result = Response::builder(StatusCode::OK)
            .header(CONTENT_LENGTH, "1")
            .header(CONTENT_LENGTH, "2")
            .build();
        assert!(matches!(result, Err(HttpError::IllegalBody { .. })));
    }

    #[test]
    fn interim_invariants_hold_at_build_time() {
        assert!(Response::builder(StatusCode::PROCESSING).build().is_ok());

        assert!(matches!(
            Response::builder(StatusCode::PROCESSING).body("no").build(),
            Err(HttpError::IllegalBody { .. })
        ));
        assert!(matches!(
            Response::builder(StatusCode::CONTINUE).close_after_write(true).build(),
            Err(HttpError::IllegalBody { .. })
        ));
        assert!(matches!(
            Response::builder(StatusCode::CONTINUE).header(CONNECTION, "close").build(),
            Err(HttpError::IllegalBody { .. })
        ));
    }

    #[test]
    fn close_flags_manage_the_connection_header() {
        let builder = Response::builder(StatusCode::OK).close_after_write(true);
        let response = builder.build().unwrap();
        assert!(response.connection_close());
        assert!(response.must_close_after_write());

        // clearing the only close flag removes the header again
        let response = Response::builder(StatusCode::OK)
            .close_after_write(true)
            .close_after_write(false)
            .build()
            .unwrap();
        assert!(!response.connection_close());
    }

    #[test]
    fn clearing_one_flag_keeps_the_header_while_the_other_is_set() {
        let response = Response::builder(StatusCode::OK)
            .close_after_write(true)
            .shutdown_output_after_write(true)
            .close_after_write(false)
            .build()
            .unwrap();
        assert!(response.connection_close());
        assert!(response.must_shutdown_output_after_write());
    }

    #[test]
    fn removing_close_keeps_other_connection_tokens() {
        let mut headers = HeaderMap::new();
        headers.append(CONNECTION, HeaderValue::from_static("Upgrade, close"));
        remove_connection_close(&mut headers);
        assert_eq!(headers.get(CONNECTION).unwrap(), "Upgrade");
    }

    #[test]
    fn derived_builder_preserves_and_overrides() {
        let original = Response::builder(StatusCode::OK).body("x").build().unwrap();
        let derived = original.into_builder().close_after_write(true).build().unwrap();
        assert_eq!(derived.status(), StatusCode::OK);
        assert!(derived.must_close_after_write());
        assert_eq!(derived.headers().get(CONTENT_LENGTH).unwrap(), "1");
    }

    #[test]
    fn custom_reason_phrase_wins() {
        let response = Response::builder(StatusCode::OK).reason("Fine").build().unwrap();
        let (head, _) = response.into_parts();
        assert_eq!(head.reason(), "Fine");
    }
}
