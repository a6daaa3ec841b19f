//! The server surface: listener lifecycle, the shared worker pool and the
//! per-server state every exchange reads.

mod config;

pub use config::{ServerConfig, ServerConfigBuilder};

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use tokio::net::TcpListener;
use tokio::runtime::{Builder, Runtime};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::connection::HttpConnection;
use crate::handler::ErrorHandler;
use crate::protocol::HttpError;
use crate::route::{Route, RouteError, RouteRegistry};

/// State shared between a server, its handles and every exchange.
pub(crate) struct ServerShared {
    config: ArcSwap<ServerConfig>,
    pub(crate) registry: RouteRegistry,
    pub(crate) error_handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl ServerShared {
    pub(crate) fn config(&self) -> Arc<ServerConfig> {
        self.config.load_full()
    }
}

/// The process-wide worker pool, created at the first server start and
/// shared by every server after that.
static WORKER_POOL: OnceLock<Runtime> = OnceLock::new();

fn worker_pool(size: usize) -> &'static Runtime {
    WORKER_POOL.get_or_init(|| {
        Builder::new_multi_thread()
            .worker_threads(size)
            .thread_name("plain-http-worker")
            .enable_all()
            .build()
            .expect("worker pool must start")
    })
}

pub struct ServerBuilder {
    config: ServerConfig,
    routes: Vec<Arc<Route>>,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { config: ServerConfig::default(), routes: Vec::new(), error_handlers: Vec::new() }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn route(mut self, route: Arc<Route>) -> Self {
        self.routes.push(route);
        self
    }

    /// Appends an application error handler; handlers run in registration
    /// order.
    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.error_handlers.push(Arc::new(handler));
        self
    }

    /// Builds the server, registering every route. Fails on route
    /// collisions.
    pub fn build(self) -> Result<Server, RouteError> {
        let registry = RouteRegistry::new();
        for route in self.routes {
            registry.add(route)?;
        }
        Ok(Server {
            shared: Arc::new(ServerShared {
                config: ArcSwap::from_pointee(self.config),
                registry,
                error_handlers: self.error_handlers,
            }),
        })
    }
}

/// An HTTP/1.x server: config, route registry and error handler chain.
///
/// Cloning is cheap and clones share all state, so routes added through
/// one clone are visible to a listener started from another.
#[derive(Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Registers a route on the running server.
    pub fn add_route(&self, route: Arc<Route>) -> Result<(), RouteError> {
        self.shared.registry.add(route)
    }

    /// Removes whatever route occupies the pattern's position.
    pub fn remove_route_by_pattern(&self, pattern: &str) -> Result<Option<Arc<Route>>, RouteError> {
        self.shared.registry.remove(pattern)
    }

    /// Removes the route by identity; `false` when it is not registered.
    pub fn remove_route(&self, route: &Arc<Route>) -> bool {
        self.shared.registry.remove_route(route)
    }

    /// Replaces the live configuration; applies from the next exchange.
    /// The worker pool size is fixed at the first server start.
    pub fn set_config(&self, config: ServerConfig) {
        self.shared.config.store(Arc::new(config));
    }

    /// Opens a listening endpoint and starts serving on the process-wide
    /// worker pool. `None` binds the loopback interface on an ephemeral
    /// port.
    pub fn start(&self, addr: Option<SocketAddr>) -> io::Result<ServerHandle> {
        let addr = addr.unwrap_or_else(|| (Ipv4Addr::LOCALHOST, 0).into());
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let runtime = worker_pool(self.shared.config().worker_pool_size);
        let accept_token = CancellationToken::new();
        let abort_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        let shared = self.shared.clone();
        let loop_accept_token = accept_token.clone();
        let loop_abort_token = abort_token.clone();
        let loop_tracker = tracker.clone();
        tracker.spawn_on(
            async move {
                accept_loop(listener, shared, loop_accept_token, loop_abort_token, loop_tracker).await;
            },
            runtime.handle(),
        );

        info!(%local_addr, "server listening");
        Ok(ServerHandle { local_addr, accept_token, abort_token, tracker })
    }
}

/// Control handle for a started listener.
pub struct ServerHandle {
    local_addr: SocketAddr,
    accept_token: CancellationToken,
    abort_token: CancellationToken,
    tracker: TaskTracker,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Closes the listener immediately; resolves when in-flight exchanges
    /// have drained.
    pub async fn stop(&self) {
        self.accept_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Closes the listener and aborts in-flight exchanges: body publishers
    /// fail and channels close.
    pub async fn stop_now(&self) {
        self.accept_token.cancel();
        self.abort_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn accept_loop(
    listener: std::net::TcpListener,
    shared: Arc<ServerShared>,
    accept_token: CancellationToken,
    abort_token: CancellationToken,
    tracker: TaskTracker,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!(cause = %e, "failed to register listener with the worker pool");
            return;
        }
    };

    loop {
        let (stream, remote_addr) = select! {
            biased;
            _ = accept_token.cancelled() => {
                debug!("listener closed");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            },
        };

        debug!(%remote_addr, "accepted connection");
        let shared = shared.clone();
        let connection_abort = abort_token.child_token();
        let max_head_size = shared.config().max_request_head_size;
        tracker.spawn(async move {
            let (reader, writer) = stream.into_split();
            let connection = HttpConnection::new(reader, writer, max_head_size);
            match connection.process(shared, connection_abort).await {
                Ok(()) => debug!(%remote_addr, "connection finished"),
                Err(HttpError::EndOfStream | HttpError::ClientAborted) => {
                    debug!(%remote_addr, "client went away")
                }
                Err(e) => error!(%remote_addr, cause = %e, "connection ended with error"),
            }
        });
    }
}
