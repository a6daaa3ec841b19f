//! The inbound request: head, parameters and the body handle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::header::{HeaderMap, CONNECTION, EXPECT};
use http::Method;
use mime::Mime;

use crate::media::{self, AcceptEntry};
use crate::protocol::body::{ChunkStream, RequestBody};
use crate::protocol::{HttpError, HttpVersion, PayloadSize, QueryParam, RequestTarget};

/// The parsed head of a request: request line plus headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    target: String,
    version: HttpVersion,
    headers: HeaderMap,
}

impl RequestHead {
    pub(crate) fn new(method: Method, target: String, version: HttpVersion, headers: HeaderMap) -> Self {
        Self { method, target, version, headers }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as received.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether the head asks for a `100 Continue` before the body is sent.
    pub(crate) fn expects_continue(&self) -> bool {
        self.headers
            .get(EXPECT)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false)
    }

    /// Whether any `Connection` header value asks to close.
    pub(crate) fn connection_close(&self) -> bool {
        connection_has_close(&self.headers)
    }
}

pub(crate) fn connection_has_close(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}

/// One bound path parameter, raw and decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParam {
    name: String,
    raw: String,
    decoded: String,
}

impl PathParam {
    pub(crate) fn new(name: String, raw: String, decoded: String) -> Self {
        Self { name, raw, decoded }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn decoded(&self) -> &str {
        &self.decoded
    }
}

/// Parameters bound during route matching, ordered by declaration. A
/// catch-all parameter holds the raw remainder of the path, internal
/// slashes included.
#[derive(Debug, Clone, Default)]
pub struct PathParams {
    params: Vec<PathParam>,
}

impl PathParams {
    pub(crate) fn new(params: Vec<PathParam>) -> Self {
        Self { params }
    }

    pub fn empty() -> Self {
        Self { params: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Decoded value of the named parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|p| p.name == name).map(|p| p.decoded.as_str())
    }

    /// Raw (percent-encoded) value of the named parameter.
    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|p| p.name == name).map(|p| p.raw.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathParam> {
        self.params.iter()
    }
}

/// The immutable request view handed to handlers.
///
/// Cloning is cheap; clones share the head, the target and the body handle.
/// The body is observable by at most one subscriber: the first
/// [`take_body`](Self::take_body) wins, later calls get `None`.
#[derive(Clone)]
pub struct Request {
    inner: Arc<Inner>,
}

struct Inner {
    head: RequestHead,
    target: RequestTarget,
    params: PathParams,
    payload_size: PayloadSize,
    body: Mutex<Option<RequestBody>>,
}

impl Request {
    pub(crate) fn new(
        head: RequestHead,
        target: RequestTarget,
        params: PathParams,
        payload_size: PayloadSize,
        body: Option<ChunkStream>,
    ) -> Self {
        let body = match body {
            Some(stream) => RequestBody::stream(stream),
            None => RequestBody::empty(),
        };
        Self {
            inner: Arc::new(Inner {
                head,
                target,
                params,
                payload_size,
                body: Mutex::new(Some(body)),
            }),
        }
    }

    pub fn method(&self) -> &Method {
        self.inner.head.method()
    }

    pub fn version(&self) -> HttpVersion {
        self.inner.head.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.head.headers()
    }

    /// First value of the named header, when it is visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.head.headers().get(name).and_then(|value| value.to_str().ok())
    }

    pub fn head(&self) -> &RequestHead {
        &self.inner.head
    }

    /// The request target exactly as received.
    pub fn target(&self) -> &str {
        self.inner.head.target()
    }

    /// The normalised, decoded path.
    pub fn path(&self) -> &str {
        self.inner.target.path()
    }

    pub fn path_params(&self) -> &PathParams {
        &self.inner.params
    }

    /// Decoded value of a path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.params.get(name)
    }

    /// Raw value of a path parameter.
    pub fn param_raw(&self, name: &str) -> Option<&str> {
        self.inner.params.get_raw(name)
    }

    pub fn query(&self) -> &[QueryParam] {
        self.inner.target.query()
    }

    /// First decoded value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.inner.target.query_param(name)
    }

    /// All decoded values of a query parameter, in order.
    pub fn query_params(&self, name: &str) -> Vec<&str> {
        self.inner.target.query_params(name)
    }

    /// The declared size of the request body.
    pub fn body_size(&self) -> PayloadSize {
        self.inner.payload_size
    }

    pub fn content_type(&self) -> Result<Option<Mime>, HttpError> {
        media::parse_content_type(self.inner.head.headers())
    }

    pub fn accept(&self) -> Result<Vec<AcceptEntry>, HttpError> {
        media::parse_accept(self.inner.head.headers())
    }

    /// Takes the body handle. Only the first caller gets it.
    pub fn take_body(&self) -> Option<RequestBody> {
        lock(&self.inner.body).take()
    }

    /// Whether the body handle is still unclaimed.
    pub(crate) fn body_untaken(&self) -> bool {
        lock(&self.inner.body).is_some()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", self.method())
            .field("target", &self.target())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target: &str) -> Request {
        let head = RequestHead::new(Method::GET, target.to_string(), HttpVersion::HTTP_11, HeaderMap::new());
        let parsed = RequestTarget::parse(target);
        Request::new(head, parsed, PathParams::empty(), PayloadSize::Empty, None)
    }

    #[test]
    fn body_has_at_most_one_subscriber() {
        let request = request("/x");
        assert!(request.take_body().is_some());
        assert!(request.take_body().is_none());

        // clones share the same body slot
        let request = request.clone();
        assert!(request.take_body().is_none());
    }

    #[test]
    fn query_views_are_ordered() {
        let request = request("/x?a=1&a=2&b=3");
        assert_eq!(request.query_param("a"), Some("1"));
        assert_eq!(request.query_params("a"), vec!["1", "2"]);
        assert_eq!(request.query_param("b"), Some("3"));
    }

    #[test]
    fn params_expose_raw_and_decoded() {
        let params = PathParams::new(vec![PathParam::new(
            "id".to_string(),
            "John%20Doe".to_string(),
            "John Doe".to_string(),
        )]);
        assert_eq!(params.get("id"), Some("John Doe"));
        assert_eq!(params.get_raw("id"), Some("John%20Doe"));
        assert_eq!(params.get("missing"), None);
    }
}
