use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::connection::exchange::{ConnectionMode, HttpExchange};
use crate::protocol::HttpError;
use crate::server::ServerShared;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// One accepted connection: framed halves plus the loop running exchange
/// after exchange until the connection stops being persistent.
pub(crate) struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(reader: R, writer: W, max_head_size: usize) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(max_head_size), READ_BUFFER_SIZE),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
        }
    }

    /// Runs exchanges until the connection closes. The abort token cancels
    /// everything in flight, which handlers observe as failing body
    /// streams and sealed channels.
    pub(crate) async fn process(mut self, shared: Arc<ServerShared>, abort: CancellationToken) -> Result<(), HttpError> {
        loop {
            // config is re-read once per exchange
            let config = shared.config();
            let exchange = HttpExchange::new(shared.clone(), config, &mut self.framed_read, &mut self.framed_write);

            let result = select! {
                biased;
                _ = abort.cancelled() => return Err(HttpError::internal("server stopped")),
                result = exchange.run() => result,
            };

            result.outcome?;

            match result.mode {
                ConnectionMode::Persist => continue,
                ConnectionMode::ShutdownOutput => {
                    debug!("half-closing connection output");
                    self.framed_write.get_mut().shutdown().await.map_err(HttpError::from_io)?;
                    return Ok(());
                }
                ConnectionMode::Close => return Ok(()),
            }
        }
    }
}
