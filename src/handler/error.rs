//! Error interception: the application handler chain and the default
//! translation policy.

use std::future::Future;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::connection::Channel;
use crate::handler::RequestHandler;
use crate::protocol::{responses, HttpError, HttpVersion, RejectReason, Request, Response};

/// What an error handler decided about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A response has been arranged; the chain stops.
    Handled,
    /// This handler opts out; the next handler in registration order gets
    /// the same error.
    Declined,
}

/// An application error interceptor.
///
/// Handlers run in registration order. Returning [`Resolution::Handled`]
/// terminates the chain, [`Resolution::Declined`] passes the same error on,
/// and returning a *different* error restarts the cycle with it. `request`
/// is present whenever head parsing succeeded, `handler` whenever handler
/// selection had completed before the failure.
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        error: &HttpError,
        channel: &Channel,
        request: Option<&Request>,
        handler: Option<&RequestHandler>,
    ) -> Result<Resolution, HttpError>;
}

/// Adapts an async closure into an [`ErrorHandler`]. The closure receives
/// owned copies, which keeps it free of higher-ranked lifetimes.
pub fn error_handler_fn<F, Fut>(f: F) -> ErrorHandlerFn<F>
where
    F: Fn(HttpError, Channel, Option<Request>, Option<RequestHandler>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resolution, HttpError>> + Send + 'static,
{
    ErrorHandlerFn { f }
}

pub struct ErrorHandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ErrorHandler for ErrorHandlerFn<F>
where
    F: Fn(HttpError, Channel, Option<Request>, Option<RequestHandler>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resolution, HttpError>> + Send + 'static,
{
    async fn handle(
        &self,
        error: &HttpError,
        channel: &Channel,
        request: Option<&Request>,
        handler: Option<&RequestHandler>,
    ) -> Result<Resolution, HttpError> {
        (self.f)(error.clone(), channel.clone(), request.cloned(), handler.cloned()).await
    }
}

/// The default translation policy: every error kind either yields a
/// response or `None`, which closes the connection without one.
///
/// `had_handler` distinguishes client faults from application faults for
/// the kinds that can be either.
pub(crate) fn default_response(
    error: &HttpError,
    had_handler: bool,
    version: HttpVersion,
    ignore_rejected_interim: bool,
) -> Option<Response> {
    match error {
        HttpError::HeadParse { .. } | HttpError::VersionParse { .. } | HttpError::BadHeader { .. } => {
            // the input stream state is unknown after a parse failure
            Some(with_close(responses::bad_request()))
        }

        HttpError::HttpVersionTooOld { upgrade, .. } => {
            Some(responses::upgrade_required(upgrade, version.supports_interim()))
        }

        HttpError::HttpVersionTooNew { .. } => Some(responses::http_version_not_supported()),

        HttpError::NoRouteFound { path } => {
            warn!(path, "no route found");
            Some(responses::not_found())
        }

        HttpError::HeadTooLarge { limit } => {
            warn!(limit, "request head too large");
            Some(responses::entity_too_large())
        }

        HttpError::NoHandlerFound { details } => {
            warn!(details, "no handler qualified");
            Some(responses::not_implemented())
        }

        HttpError::AmbiguousHandler { details } => {
            warn!(details, "ambiguous handler selection");
            Some(responses::not_implemented())
        }

        HttpError::MediaTypeParse { .. } | HttpError::IllegalBody { .. } => {
            if had_handler {
                error!(cause = %error, "application fault");
                Some(responses::internal_server_error())
            } else {
                Some(responses::bad_request())
            }
        }

        HttpError::EndOfStream => None,

        HttpError::ResponseRejected { reason: RejectReason::ProtocolNotSupported, interim: true }
            if !version.supports_interim() && ignore_rejected_interim =>
        {
            None
        }

        HttpError::ResponseRejected { .. } => {
            error!(cause = %error, "response rejected");
            Some(responses::internal_server_error())
        }

        HttpError::HeadTimeout | HttpError::BodyTimeout => Some(responses::request_timeout()),

        HttpError::ResponseTimeout => {
            error!("response write timed out");
            Some(responses::service_unavailable())
        }

        // client aborts short-circuit before translation; a stray one closes
        HttpError::ClientAborted => None,

        other => {
            error!(cause = %other, "unhandled error");
            Some(responses::internal_server_error())
        }
    }
}

fn with_close(response: Response) -> Response {
    response
        .into_builder()
        .close_after_write(true)
        .build()
        .expect("adding a close flag cannot invalidate a built response")
}
