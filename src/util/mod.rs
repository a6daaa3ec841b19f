//! Concurrency primitives underlying body transfer and per-connection
//! sequencing.

mod serial;
mod transfer;

pub use serial::SerialExecutor;
pub use transfer::TransferService;

pub(crate) use serial::SerialRun;
