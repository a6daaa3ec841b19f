//! The error taxonomy for HTTP exchanges.
//!
//! Every failure an exchange can run into is a variant of [`HttpError`].
//! The default error handler translates each kind into a response (or a
//! silent connection close); application error handlers may intercept any of
//! them first. Carrier types never wrap these values: what a handler sees is
//! the kind that was raised.

use thiserror::Error;

/// Why a response submission was rejected by the response pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A final response is already streaming or has completed.
    AlreadyFinal,
    /// The output channel is closed; nothing can be written anymore.
    ChannelClosed,
    /// The client's protocol version does not support this response (an
    /// interim response on HTTP/1.0).
    ProtocolNotSupported,
}

/// All failure kinds raised by the server core.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// Malformed request line or header line.
    #[error("malformed request head: {reason}")]
    HeadParse { reason: String },

    /// Malformed header value (for example illegal characters).
    #[error("malformed header: {reason}")]
    BadHeader { reason: String },

    /// The request head exceeded the configured size cap.
    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    /// No head byte arrived within the configured deadline.
    #[error("timed out reading request head")]
    HeadTimeout,

    /// The HTTP-version token of the request line did not parse.
    #[error("malformed http version: {text:?}")]
    VersionParse { text: String },

    /// Client speaks a version older than this server accepts.
    #[error("http version {version} is too old, upgrade to {upgrade}")]
    HttpVersionTooOld { version: String, upgrade: &'static str },

    /// Client speaks a version newer than this server supports.
    #[error("http version {version} is not supported")]
    HttpVersionTooNew { version: String },

    /// No route terminates at the request path.
    #[error("no route found for {path:?}")]
    NoRouteFound { path: String },

    /// The route matched but no handler qualifies for the request.
    #[error("no handler found: {details}")]
    NoHandlerFound { details: String },

    /// More than one handler qualifies equally well.
    #[error("ambiguous handler selection: {details}")]
    AmbiguousHandler { details: String },

    /// A media type (Content-Type or Accept) did not parse.
    #[error("malformed media type: {reason}")]
    MediaTypeParse { reason: String },

    /// A message carries a body where the protocol forbids one, or violates
    /// a body invariant.
    #[error("illegal message body: {reason}")]
    IllegalBody { reason: String },

    /// No body byte arrived within the configured idle deadline.
    #[error("timed out reading request body")]
    BodyTimeout,

    /// The byte stream ended before the message did.
    #[error("unexpected end of stream")]
    EndOfStream,

    /// A pending response made no progress within the configured deadline.
    #[error("timed out writing response")]
    ResponseTimeout,

    /// The response pipeline refused a submitted response.
    #[error("response rejected: {reason:?}")]
    ResponseRejected { reason: RejectReason, interim: bool },

    /// The client went away mid-exchange.
    #[error("client aborted the exchange")]
    ClientAborted,

    /// Anything that has no more specific kind.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl HttpError {
    pub fn head_parse<S: ToString>(reason: S) -> Self {
        Self::HeadParse { reason: reason.to_string() }
    }

    pub fn bad_header<S: ToString>(reason: S) -> Self {
        Self::BadHeader { reason: reason.to_string() }
    }

    pub fn head_too_large(limit: usize) -> Self {
        Self::HeadTooLarge { limit }
    }

    pub fn version_parse<S: ToString>(text: S) -> Self {
        Self::VersionParse { text: text.to_string() }
    }

    pub fn version_too_old<S: ToString>(version: S) -> Self {
        Self::HttpVersionTooOld { version: version.to_string(), upgrade: "HTTP/1.1" }
    }

    pub fn version_too_new<S: ToString>(version: S) -> Self {
        Self::HttpVersionTooNew { version: version.to_string() }
    }

    pub fn no_route_found<S: ToString>(path: S) -> Self {
        Self::NoRouteFound { path: path.to_string() }
    }

    pub fn no_handler_found<S: ToString>(details: S) -> Self {
        Self::NoHandlerFound { details: details.to_string() }
    }

    pub fn ambiguous_handler<S: ToString>(details: S) -> Self {
        Self::AmbiguousHandler { details: details.to_string() }
    }

    pub fn media_type_parse<S: ToString>(reason: S) -> Self {
        Self::MediaTypeParse { reason: reason.to_string() }
    }

    pub fn illegal_body<S: ToString>(reason: S) -> Self {
        Self::IllegalBody { reason: reason.to_string() }
    }

    pub fn rejected(reason: RejectReason, interim: bool) -> Self {
        Self::ResponseRejected { reason, interim }
    }

    pub fn internal<S: ToString>(reason: S) -> Self {
        Self::Internal { reason: reason.to_string() }
    }

    /// Maps an I/O failure onto the taxonomy: peer-initiated teardown is a
    /// client abort, truncation is end-of-stream, the rest stays internal.
    pub fn from_io(error: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => Self::ClientAborted,
            ErrorKind::UnexpectedEof => Self::EndOfStream,
            _ => Self::Internal { reason: error.to_string() },
        }
    }
}

impl From<std::io::Error> for HttpError {
    fn from(error: std::io::Error) -> Self {
        Self::from_io(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn io_errors_map_onto_the_taxonomy() {
        assert!(matches!(
            HttpError::from_io(io::Error::from(io::ErrorKind::ConnectionReset)),
            HttpError::ClientAborted
        ));
        assert!(matches!(
            HttpError::from_io(io::Error::from(io::ErrorKind::UnexpectedEof)),
            HttpError::EndOfStream
        ));
        assert!(matches!(
            HttpError::from_io(io::Error::from(io::ErrorKind::OutOfMemory)),
            HttpError::Internal { .. }
        ));
    }
}
