//! The message model: errors, versions, targets, requests, responses and
//! their bodies.

pub mod body;
pub mod responses;

mod error;
mod http_version;
mod message;
mod request;
mod response;
mod target;

pub use error::{HttpError, RejectReason};
pub use http_version::HttpVersion;
pub use message::{Message, PayloadItem, PayloadSize};
pub use request::{PathParam, PathParams, Request, RequestHead};
pub use response::{Response, ResponseBuilder, ResponseHead};
pub use target::{percent_decode, QueryParam, RequestTarget, TargetSegment};
