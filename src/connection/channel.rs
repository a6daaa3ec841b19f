//! The per-exchange write handle and the response pipeline states behind
//! it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::protocol::{HttpError, HttpVersion, RejectReason, Response};
use crate::util::SerialExecutor;

/// Where the response pipeline currently is within one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipeState {
    /// Ready to accept the next response.
    Idle,
    /// A `1xx` is being transmitted; more may follow, one final is owed.
    StreamingInterim,
    /// The final response is being transmitted; nothing may follow.
    StreamingFinal,
    /// Output is gone; every submission is rejected.
    Closed,
}

/// One submitted response on its way to the wire.
pub(crate) struct WriteJob {
    pub(crate) response: Response,
    /// Resolved when the response has been written (or failed). Absent for
    /// fire-and-forget submissions such as the automatic `100 Continue`.
    pub(crate) ack: Option<oneshot::Sender<Result<(), HttpError>>>,
}

/// The write handle a handler uses to emit responses.
///
/// Clones share one pipeline. Submissions are admitted strictly in order
/// through a per-connection serial executor: the state check, the
/// transition, and the enqueue happen as one non-overlapping action, so
/// concurrent writers cannot interleave half-admitted responses.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    version: HttpVersion,
    ignore_rejected_interim: bool,
    state: Mutex<PipeState>,
    serial: SerialExecutor,
    jobs: mpsc::UnboundedSender<WriteJob>,
}

impl Channel {
    pub(crate) fn new(
        version: HttpVersion,
        ignore_rejected_interim: bool,
        jobs: mpsc::UnboundedSender<WriteJob>,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                version,
                ignore_rejected_interim,
                state: Mutex::new(PipeState::Idle),
                serial: SerialExecutor::new(),
                jobs,
            }),
        }
    }

    /// The HTTP version of the exchange this channel writes to.
    pub fn version(&self) -> HttpVersion {
        self.inner.version
    }

    /// Whether the channel still accepts responses.
    pub fn is_open(&self) -> bool {
        *lock(&self.inner.state) != PipeState::Closed
    }

    /// Submits a response and resolves once it is on the wire.
    ///
    /// An interim response may be followed by more; a final response seals
    /// the exchange. Fails with [`HttpError::ResponseRejected`] when a final
    /// response is already streaming (`AlreadyFinal`), output is gone
    /// (`ChannelClosed`), or the client version cannot take an interim
    /// response (`ProtocolNotSupported`). The latter is silently dropped
    /// instead when the server is configured to ignore rejected interims.
    pub async fn write(&self, response: Response) -> Result<(), HttpError> {
        let interim = response.is_interim();

        let (admitted_tx, admitted_rx) = oneshot::channel();
        let inner = self.inner.clone();
        self.inner.serial.execute(move || {
            let verdict = inner.admit(response, true);
            let _ = admitted_tx.send(verdict);
        });

        let pending = admitted_rx
            .await
            .map_err(|_| HttpError::rejected(RejectReason::ChannelClosed, interim))??;

        match pending {
            Some(written) => written
                .await
                .map_err(|_| HttpError::rejected(RejectReason::ChannelClosed, interim))?,
            // the interim was dropped by configuration
            None => Ok(()),
        }
    }

    /// Fire-and-forget interim submission, used for the automatic
    /// `100 Continue`. Rejections are dropped.
    pub(crate) fn submit_unacked(&self, response: Response) {
        let inner = self.inner.clone();
        self.inner.serial.execute(move || {
            let _ = inner.admit(response, false);
        });
    }

    /// Marks the current interim response complete; the pipeline is idle
    /// again.
    pub(crate) fn interim_complete(&self) {
        let mut state = lock(&self.inner.state);
        if *state == PipeState::StreamingInterim {
            *state = PipeState::Idle;
        }
    }

    /// Closes the pipeline; every further submission is rejected.
    pub(crate) fn seal(&self) {
        *lock(&self.inner.state) = PipeState::Closed;
    }
}

type Admitted = Option<oneshot::Receiver<Result<(), HttpError>>>;

impl ChannelInner {
    fn admit(&self, response: Response, want_ack: bool) -> Result<Admitted, HttpError> {
        let interim = response.is_interim();
        let mut state = lock(&self.state);

        match *state {
            PipeState::Closed => return Err(HttpError::rejected(RejectReason::ChannelClosed, interim)),
            PipeState::StreamingFinal => return Err(HttpError::rejected(RejectReason::AlreadyFinal, interim)),
            PipeState::Idle | PipeState::StreamingInterim => {}
        }

        if interim && !self.version.supports_interim() {
            if self.ignore_rejected_interim {
                debug!(version = %self.version, "dropping interim response unsupported by client");
                return Ok(None);
            }
            return Err(HttpError::rejected(RejectReason::ProtocolNotSupported, true));
        }

        *state = if interim { PipeState::StreamingInterim } else { PipeState::StreamingFinal };
        drop(state);

        let (ack_tx, ack_rx) = if want_ack {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        if self.jobs.send(WriteJob { response, ack: ack_tx }).is_err() {
            *lock(&self.state) = PipeState::Closed;
            return Err(HttpError::rejected(RejectReason::ChannelClosed, interim));
        }
        Ok(ack_rx)
    }
}

fn lock<'a>(mutex: &'a Mutex<PipeState>) -> MutexGuard<'a, PipeState> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
