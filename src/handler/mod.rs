//! Request handlers and their registration metadata.
//!
//! A [`RequestHandler`] couples a callable with the qualifying metadata the
//! selector uses: the HTTP method, what content type the handler consumes,
//! and which media types it can produce.

mod error;

pub use error::{error_handler_fn, ErrorHandler, Resolution};

pub(crate) use error::default_response;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;

use crate::connection::Channel;
use crate::media::MediaRange;
use crate::protocol::{HttpError, Request, Response};

/// The callable part of a request handler.
///
/// A handler either writes its response(s) through the [`Channel`] (interim
/// responses, streaming) and returns `Ok(None)`, or returns
/// `Ok(Some(response))` and lets the exchange submit it as the final
/// response.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: Request, channel: Channel) -> Result<Option<Response>, HttpError>;
}

/// Adapts an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request, Channel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Response>, HttpError>> + Send + 'static,
{
    HandlerFn { f }
}

pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request, Channel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Response>, HttpError>> + Send + 'static,
{
    async fn handle(&self, request: Request, channel: Channel) -> Result<Option<Response>, HttpError> {
        (self.f)(request, channel).await
    }
}

/// A handler registered on a route: method, consumes/produces metadata and
/// the callable.
#[derive(Clone)]
pub struct RequestHandler {
    method: Method,
    accepts: Option<MediaRange>,
    produces: Vec<MediaRange>,
    logic: Arc<dyn Handler>,
}

impl RequestHandler {
    pub fn builder(method: Method) -> RequestHandlerBuilder {
        RequestHandlerBuilder { method, accepts: None, produces: Vec::new() }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The content type this handler consumes; `None` accepts anything,
    /// including requests without a body.
    pub fn accepts(&self) -> Option<&MediaRange> {
        self.accepts.as_ref()
    }

    pub fn produces(&self) -> &[MediaRange] {
        &self.produces
    }

    pub async fn invoke(&self, request: Request, channel: Channel) -> Result<Option<Response>, HttpError> {
        self.logic.handle(request, channel).await
    }

    /// Key under which two handlers on the same route collide.
    pub(crate) fn collision_key(&self) -> (String, Option<String>, Vec<String>) {
        let accepts = self.accepts.as_ref().map(|range| range.mime().essence_str().to_string());
        let mut produces: Vec<String> =
            self.produces.iter().map(|range| range.mime().essence_str().to_string()).collect();
        produces.sort();
        (self.method.to_string(), accepts, produces)
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("method", &self.method)
            .field("accepts", &self.accepts)
            .field("produces", &self.produces)
            .finish_non_exhaustive()
    }
}

pub struct RequestHandlerBuilder {
    method: Method,
    accepts: Option<MediaRange>,
    produces: Vec<MediaRange>,
}

impl RequestHandlerBuilder {
    /// Restricts the handler to requests of the given content type.
    pub fn accepts(mut self, range: impl Into<MediaRange>) -> Self {
        self.accepts = Some(range.into());
        self
    }

    /// Adds a media type this handler can produce. Without any, the handler
    /// produces `*/*`.
    pub fn produces(mut self, range: impl Into<MediaRange>) -> Self {
        self.produces.push(range.into());
        self
    }

    /// Attaches the callable and finishes the handler.
    pub fn apply(self, handler: impl Handler) -> RequestHandler {
        let produces = if self.produces.is_empty() {
            vec![MediaRange::new(mime::STAR_STAR)]
        } else {
            self.produces
        };
        RequestHandler { method: self.method, accepts: self.accepts, produces, logic: Arc::new(handler) }
    }
}

macro_rules! method_handler {
    ($name:ident, $method:ident) => {
        /// Shorthand for a handler on this method producing `*/*`.
        pub fn $name<F, Fut>(f: F) -> RequestHandler
        where
            F: Fn(Request, Channel) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<Option<Response>, HttpError>> + Send + 'static,
        {
            RequestHandler::builder(Method::$method).apply(handler_fn(f))
        }
    };
}

method_handler!(get, GET);
method_handler!(post, POST);
method_handler!(put, PUT);
method_handler!(delete, DELETE);
method_handler!(head, HEAD);
method_handler!(options, OPTIONS);
method_handler!(patch, PATCH);
