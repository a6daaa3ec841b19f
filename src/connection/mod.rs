//! Per-connection machinery: the exchange orchestrator, the response
//! pipeline and the write handle handed to handlers.

mod channel;
mod exchange;
mod http_connection;

pub use channel::Channel;

pub(crate) use http_connection::HttpConnection;
