//! Supervisor: a `TcpListener` accept loop plus the registration API,
//! running one `tokio::task::spawn`-ed task per accepted connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mime::Mime;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::action::{ActionError, AfterAction, BeforeAction};
use crate::config::Config;
use crate::exception::ExceptionHandler;
use crate::events::Events;
use crate::exchange::{self, Engine};
use crate::media::MediaSpec;
use crate::method::Method;
use crate::route::{HandlerFn, RouteError};

/// A running server instance: the shared [`Engine`] plus the handle to its
/// accept-loop task and the shutdown signal that stops it.
pub struct Server {
    engine: Arc<Engine>,
    stopping: Arc<AtomicBool>,
    notify: Arc<Notify>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accept_loop: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds `addr` and starts the accept loop.
    pub async fn start(addr: SocketAddr, config: Config) -> std::io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let engine = Arc::new(Engine::new(config));
        let stopping = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let connections = Arc::new(Mutex::new(Vec::new()));

        let accept_loop = tokio::spawn(accept_loop(listener, engine.clone(), stopping.clone(), notify.clone(), connections.clone()));

        info!(%local_addr, "server listening");
        Ok(Server { engine, stopping, notify, connections, accept_loop, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn add(&self, pattern: &str) -> Result<usize, RouteError> {
        self.engine.add_route(pattern).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_handler(
        &self,
        route: usize,
        method: Method,
        consumes: MediaSpec,
        produces: Mime,
        handler: HandlerFn,
    ) -> Result<(), crate::error::RoutingError> {
        self.engine.add_handler(route, method, consumes, produces, handler).await
    }

    pub async fn before(&self, pattern: &str, action: Arc<dyn BeforeAction>) -> Result<(), ActionError> {
        self.engine.before(pattern, action).await
    }

    pub async fn after(&self, pattern: &str, action: Arc<dyn AfterAction>) -> Result<(), ActionError> {
        self.engine.after(pattern, action).await
    }

    pub async fn exception_handler(&self, handler: Arc<dyn ExceptionHandler>) {
        self.engine.exception_handler(handler).await
    }

    pub fn events(&self) -> &Events {
        self.engine.events()
    }

    /// Requests a graceful stop: the accept loop exits immediately and no
    /// new connections are taken, but exchanges already in flight are given
    /// up to `graceful_timeout` to finish on their own before this forcibly
    /// aborts whatever remains.
    pub async fn stop(&self, graceful_timeout: Duration) {
        self.stopping.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();

        let deadline = tokio::time::Instant::now() + graceful_timeout;
        loop {
            let mut handles = self.connections.lock().await;
            handles.retain(|h| !h.is_finished());
            if handles.is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                for handle in handles.drain(..) {
                    handle.abort();
                }
                return;
            }
            drop(handles);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stops accepting and aborts every in-flight connection task
    /// immediately, without waiting.
    pub async fn kill(self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.accept_loop.abort();
        let _ = self.accept_loop.await;
        for handle in self.connections.lock().await.drain(..) {
            handle.abort();
        }
    }

    /// Waits for a graceful [`Server::stop`] to finish its accept loop.
    pub async fn join(self) {
        let _ = self.accept_loop.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: Arc<Engine>,
    stopping: Arc<AtomicBool>,
    notify: Arc<Notify>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    loop {
        if stopping.load(Ordering::SeqCst) {
            return;
        }
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = notify.notified() => return,
        };
        match accepted {
            Ok((socket, peer)) => {
                if let Err(err) = socket.set_nodelay(true) {
                    warn!(%peer, error = %err, "failed to set TCP_NODELAY");
                }
                let engine = engine.clone();
                let handle = tokio::spawn(async move {
                    drive_tcp_connection(engine, socket, peer).await;
                });
                let mut handles = connections.lock().await;
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
            }
        }
    }
}

async fn drive_tcp_connection(engine: Arc<Engine>, socket: TcpStream, peer: SocketAddr) {
    exchange::drive_connection(engine, socket).await;
    tracing::debug!(%peer, "connection closed");
}
