//! The per-exchange state machine: head parse, routing, handler
//! invocation, response pipelining and error recovery.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::{SinkExt, StreamExt};
use http::header::{HeaderValue, DATE};
use http::Method;
use httpdate::fmt_http_date;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::connection::channel::{Channel, WriteJob};
use crate::handler::{default_response, RequestHandler, Resolution};
use crate::protocol::body::{chunk_channel, chunk_channel_with_before_first, BodySink};
use crate::protocol::{
    responses, HttpError, HttpVersion, Message, PathParams, PayloadItem, PayloadSize, Request, RequestHead,
    RequestTarget, Response,
};
use crate::server::{ServerConfig, ServerShared};

/// What the connection should do once the exchange has terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionMode {
    /// Start reading the next head.
    Persist,
    /// Half-close the output, then end the connection.
    ShutdownOutput,
    /// Tear the connection down.
    Close,
}

pub(crate) struct ExchangeResult {
    pub(crate) outcome: Result<(), HttpError>,
    pub(crate) mode: ConnectionMode,
}

impl ExchangeResult {
    fn failed(error: HttpError) -> Self {
        Self { outcome: Err(error), mode: ConnectionMode::Close }
    }
}

/// Connection-relevant facts about the written final response.
#[derive(Debug, Clone, Copy)]
struct FinalInfo {
    close_after_write: bool,
    shutdown_after_write: bool,
    connection_close: bool,
    unknown_length: bool,
}

struct JobFailure {
    error: HttpError,
    /// Fatal failures closed or corrupted the output; no recovery response
    /// can follow.
    fatal: bool,
}

enum WorkOutcome {
    Handler(Result<Option<Response>, HttpError>),
    Submitted(Result<(), HttpError>),
    Recovered(Result<RecoveryOutcome, HttpError>),
}

enum RecoveryOutcome {
    /// A response has been arranged.
    Responded,
    /// Policy says: no response, close the connection.
    Silent(HttpError),
}

enum LoopEnd {
    Clean(FinalInfo),
    Silent(HttpError),
    Fatal(HttpError),
}

type WorkFuture = Pin<Box<dyn Future<Output = WorkOutcome> + Send>>;

/// Orchestrator of one HTTP exchange, from request head to final response.
pub(crate) struct HttpExchange<'conn, R, W> {
    shared: Arc<ServerShared>,
    config: Arc<ServerConfig>,
    framed_read: &'conn mut FramedRead<R, RequestDecoder>,
    framed_write: &'conn mut FramedWrite<W, ResponseEncoder>,
}

impl<'conn, R, W> HttpExchange<'conn, R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(
        shared: Arc<ServerShared>,
        config: Arc<ServerConfig>,
        framed_read: &'conn mut FramedRead<R, RequestDecoder>,
        framed_write: &'conn mut FramedWrite<W, ResponseEncoder>,
    ) -> Self {
        Self { shared, config, framed_read, framed_write }
    }

    pub(crate) async fn run(self) -> ExchangeResult {
        let HttpExchange { shared, config, framed_read, framed_write } = self;
        framed_read.decoder_mut().set_max_head_size(config.max_request_head_size);

        debug!("beginning a new http exchange");
        let head = match timeout(config.head_timeout, framed_read.next()).await {
            Err(_elapsed) => Err(HttpError::HeadTimeout),
            Ok(None) => {
                debug!("connection ended between exchanges");
                return ExchangeResult { outcome: Ok(()), mode: ConnectionMode::Close };
            }
            Ok(Some(Err(error))) => Err(error),
            Ok(Some(Ok(Message::Header(header)))) => Ok(header),
            Ok(Some(Ok(Message::Payload(_)))) => Err(HttpError::internal("payload frame while expecting a head")),
        };

        // version defaults to 1.1 until successfully parsed
        let version = head.as_ref().map(|(h, _)| h.version()).unwrap_or(HttpVersion::HTTP_11);
        let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel();
        let channel = Channel::new(version, config.ignore_rejected_interim, jobs_tx);

        let (request, handler, sink, first_error) = match head {
            Ok((head, payload_size)) => initialize(&shared, &config, &channel, head, payload_size),
            Err(error) => (None, None, None, Some(error)),
        };

        let mut recovered = first_error.is_some();
        let mut work: Option<WorkFuture> = if let Some(error) = first_error {
            Some(make_recovery(&shared, &config, &channel, &request, &handler, error))
        } else if let (Some(request), Some(handler)) = (&request, &handler) {
            let handler = handler.clone();
            let request = request.clone();
            let handler_channel = channel.clone();
            Some(Box::pin(async move {
                WorkOutcome::Handler(handler.invoke(request, handler_channel).await)
            }))
        } else {
            None
        };

        let mut pump_result: Option<Result<bool, HttpError>> = sink.is_none().then(|| Ok(true));
        let request_method = request.as_ref().map(|r| r.method().clone());

        let end: LoopEnd = {
            let body_timeout = config.body_timeout;
            let reader = &mut *framed_read;
            let pump = async move {
                match sink {
                    Some(sink) => pump_body(reader, sink, body_timeout).await,
                    // unreachable: the pump arm is disabled when there is no sink
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(pump);

            let mut final_info: Option<FinalInfo> = None;
            loop {
                if work.is_none() {
                    if let Some(info) = final_info {
                        let body_settled =
                            pump_result.is_some() || request.as_ref().map_or(true, |r| r.body_untaken());
                        if body_settled {
                            break LoopEnd::Clean(info);
                        }
                    }
                }

                select! {
                    biased;

                    job = jobs_rx.recv() => {
                        let Some(job) = job else {
                            break LoopEnd::Fatal(HttpError::internal("response pipeline detached"));
                        };
                        match process_job(
                            framed_write,
                            job,
                            request_method.as_ref(),
                            &channel,
                            config.response_timeout,
                        ).await {
                            Ok(Some(info)) => final_info = Some(info),
                            Ok(None) => {}
                            Err(failure) if failure.fatal => break LoopEnd::Fatal(failure.error),
                            Err(failure) => {
                                if recovered {
                                    break LoopEnd::Fatal(failure.error);
                                }
                                recovered = true;
                                // any handler still running is abandoned
                                work = Some(make_recovery(&shared, &config, &channel, &request, &handler, failure.error));
                            }
                        }
                    }

                    Some(outcome) = poll_work(&mut work) => {
                        work = None;
                        match outcome {
                            WorkOutcome::Handler(Ok(Some(response))) => {
                                let submit_channel = channel.clone();
                                work = Some(Box::pin(async move {
                                    WorkOutcome::Submitted(submit_channel.write(response).await)
                                }));
                            }
                            WorkOutcome::Handler(Ok(None)) | WorkOutcome::Submitted(Ok(())) => {}
                            WorkOutcome::Handler(Err(error)) | WorkOutcome::Submitted(Err(error)) => {
                                if matches!(error, HttpError::ClientAborted) || recovered {
                                    break LoopEnd::Fatal(error);
                                }
                                recovered = true;
                                work = Some(make_recovery(&shared, &config, &channel, &request, &handler, error));
                            }
                            WorkOutcome::Recovered(Ok(RecoveryOutcome::Responded)) => {}
                            WorkOutcome::Recovered(Ok(RecoveryOutcome::Silent(error))) => {
                                break LoopEnd::Silent(error);
                            }
                            WorkOutcome::Recovered(Err(error)) => break LoopEnd::Fatal(error),
                        }
                    }

                    result = &mut pump, if pump_result.is_none() => {
                        if let Err(error) = &result {
                            debug!(cause = %error, "request body pump failed");
                        }
                        pump_result = Some(result);
                    }

                    // the final response is owed but nothing is advancing
                    _ = sleep(config.response_timeout), if work.is_none() && final_info.is_none() => {
                        if recovered {
                            break LoopEnd::Fatal(HttpError::ResponseTimeout);
                        }
                        recovered = true;
                        work = Some(make_recovery(&shared, &config, &channel, &request, &handler, HttpError::ResponseTimeout));
                    }

                    // a taken body that nobody drives anymore
                    _ = sleep(config.body_timeout), if work.is_none() && final_info.is_some() && pump_result.is_none() => {
                        break LoopEnd::Fatal(HttpError::BodyTimeout);
                    }
                }
            }
        };

        channel.seal();

        match end {
            LoopEnd::Clean(info) => {
                let input_usable = match &pump_result {
                    Some(Ok(true)) => true,
                    Some(Err(_)) => false,
                    Some(Ok(false)) | None => match drain_body(framed_read, config.body_timeout).await {
                        Ok(()) => true,
                        Err(error) => {
                            debug!(cause = %error, "discarding unconsumed request body failed");
                            false
                        }
                    },
                };

                let request_close = request.as_ref().map_or(false, |r| r.head().connection_close());
                let mode = if info.close_after_write {
                    ConnectionMode::Close
                } else if info.shutdown_after_write {
                    ConnectionMode::ShutdownOutput
                } else if !input_usable
                    || info.connection_close
                    || request_close
                    || info.unknown_length
                    || version.is_1_0()
                {
                    ConnectionMode::Close
                } else {
                    ConnectionMode::Persist
                };

                ExchangeResult { outcome: Ok(()), mode }
            }
            LoopEnd::Silent(error) => {
                debug!(cause = %error, "exchange ended without a response");
                ExchangeResult::failed(error)
            }
            LoopEnd::Fatal(error) => ExchangeResult::failed(error),
        }
    }
}

/// Resolves with `None` right away when there is no work, which disables
/// the branch for that round of the select.
async fn poll_work(work: &mut Option<WorkFuture>) -> Option<WorkOutcome> {
    match work {
        Some(future) => Some(future.as_mut().await),
        None => None,
    }
}

/// Builds the request and resolves route and handler. The request is
/// assembled whenever the head parsed, so error handlers for routing and
/// selection failures observe it.
fn initialize(
    shared: &ServerShared,
    config: &ServerConfig,
    channel: &Channel,
    head: RequestHead,
    payload_size: PayloadSize,
) -> (Option<Request>, Option<RequestHandler>, Option<BodySink>, Option<HttpError>) {
    let version = head.version();

    if version.major() < 1 {
        return (None, None, None, Some(HttpError::version_too_old(version)));
    }
    if version.major() > 1 {
        return (None, None, None, Some(HttpError::version_too_new(version)));
    }
    if version.is_1_0() && config.reject_http_1_0 {
        return (None, None, None, Some(HttpError::version_too_old(version)));
    }

    let target = RequestTarget::parse(head.target());
    let lookup = shared.registry.lookup(&target);

    let (sink, stream) = if payload_size.is_empty() {
        (None, None)
    } else if head.expects_continue() && version.supports_interim() {
        // the interim goes out when the handler first pulls the body
        let continue_channel = channel.clone();
        let (sink, stream) =
            chunk_channel_with_before_first(move || continue_channel.submit_unacked(responses::continue_()));
        (Some(sink), Some(stream))
    } else {
        let (sink, stream) = chunk_channel();
        (Some(sink), Some(stream))
    };

    match lookup {
        Err(error) => {
            let request = Request::new(head, target, PathParams::empty(), payload_size, stream);
            (Some(request), None, sink, Some(error))
        }
        Ok(matched) => {
            let (route, params) = matched.into_parts();
            let request = Request::new(head, target, params, payload_size, stream);

            if request.method() == Method::TRACE && !payload_size.is_empty() {
                let error = HttpError::illegal_body("body in a TRACE request");
                return (Some(request), None, sink, Some(error));
            }

            let content_type = match request.content_type() {
                Ok(content_type) => content_type,
                Err(error) => return (Some(request), None, sink, Some(error)),
            };
            let accept = match request.accept() {
                Ok(accept) => accept,
                Err(error) => return (Some(request), None, sink, Some(error)),
            };

            match route.select(request.method(), content_type.as_ref(), &accept) {
                Ok(handler) => {
                    let handler = handler.clone();
                    debug!(method = %request.method(), path = request.path(), "matched handler");
                    (Some(request), Some(handler), sink, None)
                }
                Err(error) => (Some(request), None, sink, Some(error)),
            }
        }
    }
}

fn make_recovery(
    shared: &Arc<ServerShared>,
    config: &Arc<ServerConfig>,
    channel: &Channel,
    request: &Option<Request>,
    handler: &Option<RequestHandler>,
    error: HttpError,
) -> WorkFuture {
    let shared = shared.clone();
    let config = config.clone();
    let channel = channel.clone();
    let request = request.clone();
    let handler = handler.clone();
    Box::pin(async move {
        WorkOutcome::Recovered(recover(shared, config, channel, request, handler, error).await)
    })
}

/// Drives the error handler chain, then the default policy.
async fn recover(
    shared: Arc<ServerShared>,
    config: Arc<ServerConfig>,
    channel: Channel,
    request: Option<Request>,
    handler: Option<RequestHandler>,
    mut error: HttpError,
) -> Result<RecoveryOutcome, HttpError> {
    let mut suppressed: Vec<HttpError> = Vec::new();
    let mut attempts: u32 = 0;

    loop {
        if matches!(error, HttpError::ClientAborted) {
            debug!("client aborted the exchange");
            return Err(error);
        }
        if !channel.is_open() {
            debug!(cause = %error, "output closed, recovery impossible");
            log_suppressed(&suppressed);
            return Err(error);
        }

        if !shared.error_handlers.is_empty() && attempts < config.max_error_recovery_attempts {
            let mut restart = false;
            for error_handler in &shared.error_handlers {
                if attempts >= config.max_error_recovery_attempts {
                    break;
                }
                attempts += 1;
                debug!(attempt = attempts, cause = %error, "attempting error recovery");
                match error_handler.handle(&error, &channel, request.as_ref(), handler.as_ref()).await {
                    Ok(Resolution::Handled) => {
                        log_suppressed(&suppressed);
                        return Ok(RecoveryOutcome::Responded);
                    }
                    Ok(Resolution::Declined) => continue,
                    Err(next) => {
                        // a new error restarts the cycle, the old one joins
                        // the suppressed trail
                        suppressed.push(std::mem::replace(&mut error, next));
                        restart = true;
                        break;
                    }
                }
            }
            if restart {
                continue;
            }
        } else if !shared.error_handlers.is_empty() {
            warn!("error recovery attempts depleted, using default handler");
        }

        log_suppressed(&suppressed);
        return match default_response(&error, handler.is_some(), channel.version(), config.ignore_rejected_interim) {
            Some(response) => channel.write(response).await.map(|_| RecoveryOutcome::Responded),
            None => Ok(RecoveryOutcome::Silent(error)),
        };
    }
}

fn log_suppressed(suppressed: &[HttpError]) {
    if !suppressed.is_empty() {
        let trail: Vec<String> = suppressed.iter().map(ToString::to_string).collect();
        warn!(?trail, "errors suppressed during recovery");
    }
}

/// Writes one submitted response to the wire.
async fn process_job<W>(
    framed_write: &mut FramedWrite<W, ResponseEncoder>,
    job: WriteJob,
    request_method: Option<&Method>,
    channel: &Channel,
    response_timeout: Duration,
) -> Result<Option<FinalInfo>, JobFailure>
where
    W: AsyncWrite + Unpin,
{
    let interim = job.response.is_interim();

    if !interim {
        if let Some(method) = request_method {
            if (method == Method::HEAD || method == Method::CONNECT) && !job.response.body().is_empty() {
                let error = HttpError::illegal_body(format!("body on a response to {method}"));
                if let Some(ack) = job.ack {
                    let _ = ack.send(Err(error.clone()));
                }
                return Err(JobFailure { error, fatal: false });
            }
        }
    }

    let payload_size = job.response.payload_size();
    let info = (!interim).then(|| FinalInfo {
        close_after_write: job.response.must_close_after_write(),
        shutdown_after_write: job.response.must_shutdown_output_after_write(),
        connection_close: job.response.connection_close(),
        unknown_length: matches!(payload_size, PayloadSize::Unknown),
    });

    let (mut head, mut body) = job.response.into_parts();
    if !interim && !head.headers().contains_key(DATE) {
        if let Ok(value) = HeaderValue::from_str(&fmt_http_date(SystemTime::now())) {
            head.headers_mut().insert(DATE, value);
        }
    }

    let result = write_out(framed_write, head, payload_size, &mut body, response_timeout).await;
    match result {
        Ok(()) => {
            if interim {
                channel.interim_complete();
            }
            if let Some(ack) = job.ack {
                let _ = ack.send(Ok(()));
            }
            Ok(info)
        }
        Err(error) => {
            if let Some(ack) = job.ack {
                let _ = ack.send(Err(error.clone()));
            }
            // head or body bytes may already be on the wire
            Err(JobFailure { error, fatal: true })
        }
    }
}

async fn write_out<W>(
    framed_write: &mut FramedWrite<W, ResponseEncoder>,
    head: crate::protocol::ResponseHead,
    payload_size: PayloadSize,
    body: &mut crate::protocol::body::ResponseBody,
    response_timeout: Duration,
) -> Result<(), HttpError>
where
    W: AsyncWrite + Unpin,
{
    timed(response_timeout, framed_write.feed(Message::Header((head, payload_size)))).await?;

    if !payload_size.is_empty() {
        loop {
            match timeout(response_timeout, body.next_chunk()).await {
                Err(_elapsed) => return Err(HttpError::ResponseTimeout),
                Ok(None) => {
                    timed(response_timeout, framed_write.feed(Message::Payload(PayloadItem::Eof))).await?;
                    break;
                }
                Ok(Some(Ok(bytes))) => {
                    timed(response_timeout, framed_write.feed(Message::Payload(PayloadItem::Chunk(bytes)))).await?;
                }
                Ok(Some(Err(error))) => return Err(error),
            }
        }
    }

    timed(response_timeout, framed_write.flush()).await
}

async fn timed<F>(deadline: Duration, operation: F) -> Result<(), HttpError>
where
    F: Future<Output = Result<(), HttpError>>,
{
    match timeout(deadline, operation).await {
        Err(_elapsed) => Err(HttpError::ResponseTimeout),
        Ok(result) => result,
    }
}

/// Feeds decoded body frames into the sink as the subscriber demands them.
///
/// Returns whether the end of the body was consumed off the wire.
async fn pump_body<R>(
    framed_read: &mut FramedRead<R, RequestDecoder>,
    mut sink: BodySink,
    body_timeout: Duration,
) -> Result<bool, HttpError>
where
    R: AsyncRead + Unpin,
{
    loop {
        sink.ready().await;
        if sink.is_finished() {
            // the subscriber went away; the remainder stays on the wire
            return Ok(false);
        }

        match timeout(body_timeout, framed_read.next()).await {
            Err(_elapsed) => {
                sink.fail(HttpError::BodyTimeout);
                return Err(HttpError::BodyTimeout);
            }
            Ok(None) => {
                sink.fail(HttpError::EndOfStream);
                return Err(HttpError::EndOfStream);
            }
            Ok(Some(Err(error))) => {
                sink.fail(error.clone());
                return Err(error);
            }
            Ok(Some(Ok(Message::Payload(PayloadItem::Chunk(bytes))))) => sink.send(bytes),
            Ok(Some(Ok(Message::Payload(PayloadItem::Eof)))) => {
                sink.send_eof();
                return Ok(true);
            }
            Ok(Some(Ok(Message::Header(_)))) => {
                let error = HttpError::internal("head frame inside a request body");
                sink.fail(error.clone());
                return Err(error);
            }
        }
    }
}

/// Discards body bytes left on the wire so the next exchange starts at a
/// head boundary.
async fn drain_body<R>(
    framed_read: &mut FramedRead<R, RequestDecoder>,
    body_timeout: Duration,
) -> Result<(), HttpError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match timeout(body_timeout, framed_read.next()).await {
            Err(_elapsed) => return Err(HttpError::BodyTimeout),
            Ok(None) => return Err(HttpError::EndOfStream),
            Ok(Some(Err(error))) => return Err(error),
            Ok(Some(Ok(Message::Payload(PayloadItem::Eof)))) => return Ok(()),
            Ok(Some(Ok(Message::Payload(_)))) => continue,
            Ok(Some(Ok(Message::Header(_)))) => {
                return Err(HttpError::internal("head frame while discarding a body"));
            }
        }
    }
}
