//! A plain HTTP/1.x server library.
//!
//! The building blocks: a [`Server`] owns a [`route::RouteRegistry`] and an
//! ordered error-handler chain; every accepted connection runs exchanges
//! through a per-request state machine that parses the head, matches a
//! [`route::Route`], selects a [`RequestHandler`] by method and media
//! types, and streams the response(s) back. Request and response bodies
//! are lazy chunk sequences gated by consumer demand
//! ([`util::TransferService`]), so a slow handler never pulls more off the
//! socket than it asked for.
//!
//! ```no_run
//! use plain_http::protocol::responses;
//! use plain_http::{handler, Route, Server};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let route = Route::builder("/hello/:name")
//!     .handler(handler::get(|request, _channel| async move {
//!         let name = request.param("name").unwrap_or("world").to_string();
//!         Ok(Some(responses::text(format!("Hello {name}!"))))
//!     }))
//!     .build()?;
//!
//! let server = Server::builder().route(route).build()?;
//! let handle = server.start(None)?;
//! println!("listening on {}", handle.local_addr());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod handler;
pub mod media;
pub mod protocol;
pub mod route;
pub mod server;
pub mod util;

pub use connection::Channel;
pub use handler::{error_handler_fn, handler_fn, ErrorHandler, Handler, RequestHandler, Resolution};
pub use protocol::{HttpError, HttpVersion, Request, Response};
pub use route::{Route, RouteError};
pub use server::{Server, ServerConfig, ServerHandle};

pub(crate) use help::ensure;

mod help {

    macro_rules! ensure {
        ($predicate:expr, $error:expr) => {
            if !$predicate {
                return Err($error);
            }
        };
    }
    pub(crate) use ensure;
}
