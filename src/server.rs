//! TCP listener and server lifecycle.
//!
//! Binds the listening socket, runs the accept loop and the activity
//! monitor as background tasks, and hands each accepted stream to its own
//! [`ConnectionHandler`] task.

use crate::activity::ActivityState;
use crate::backend::Backend;
use crate::config::{Config, ConfigError};
use crate::connection::{ConnectionHandler, ConnectionSettings};
use crate::monitor;
use crate::registry::ConnectionRegistry;
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace};

/// Pause after a failed accept so persistent errors (EMFILE) do not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Server instance
pub struct Server {
    config: Config,
    backend: Arc<dyn Backend>,
    activity: Arc<ActivityState>,
    registry: Arc<ConnectionRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&registry)));
        let connection_limit =
            (config.max_connections > 0).then(|| Arc::new(Semaphore::new(config.max_connections)));

        Server {
            config,
            backend,
            activity: Arc::new(ActivityState::new()),
            registry,
            coordinator,
            connection_limit,
        }
    }

    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    /// Bind the listener and spawn the accept loop and activity monitor.
    ///
    /// Returns the bound address. A bind failure runs shutdown with
    /// [`ShutdownReason::StartupFailure`] before the error is returned.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        let (listener, local_addr) = match self.bind() {
            Ok(bound) => bound,
            Err(e) => {
                error!(error = %e, "Failed to start listener");
                self.coordinator.shutdown(ShutdownReason::StartupFailure);
                return Err(e);
            }
        };
        info!(address = %local_addr, "Server listening");

        let acceptor = Acceptor {
            listener,
            backend: Arc::clone(&self.backend),
            activity: Arc::clone(&self.activity),
            registry: Arc::clone(&self.registry),
            coordinator: Arc::clone(&self.coordinator),
            connection_limit: self.connection_limit.clone(),
            settings: ConnectionSettings {
                max_frame_len: self.config.max_frame_len,
                read_timeout: self.config.read_timeout(),
            },
        };
        let accept_task = tokio::spawn(acceptor.run());
        self.coordinator.register_listener(accept_task.abort_handle());

        let monitor_task = tokio::spawn(monitor::run(
            Arc::clone(&self.activity),
            Arc::clone(&self.coordinator),
            self.config.monitor_interval(),
            self.config.idle_shutdown(),
        ));
        self.coordinator.register_monitor(monitor_task.abort_handle());

        Ok(local_addr)
    }

    /// Start the server and wait until it has shut down.
    pub async fn run(&self) -> Result<ShutdownReason, ServerError> {
        self.start()?;
        Ok(self.coordinator.stopped().await)
    }

    fn bind(&self) -> Result<(TcpListener, SocketAddr), ServerError> {
        let addr = self.config.listen_addr()?;
        let bound = create_listener(addr, self.config.backlog)
            .and_then(TcpListener::from_std)
            .and_then(|listener| {
                let local_addr = listener.local_addr()?;
                Ok((listener, local_addr))
            });
        bound.map_err(|source| ServerError::Bind { addr, source })
    }

    #[cfg(test)]
    pub fn activity(&self) -> &Arc<ActivityState> {
        &self.activity
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// State owned by the accept loop task.
struct Acceptor {
    listener: TcpListener,
    backend: Arc<dyn Backend>,
    activity: Arc<ActivityState>,
    registry: Arc<ConnectionRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
    connection_limit: Option<Arc<Semaphore>>,
    settings: ConnectionSettings,
}

impl Acceptor {
    async fn run(self) {
        loop {
            // Wait for a connection slot
            let permit = match &self.connection_limit {
                Some(limit) => match Arc::clone(limit).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
                None => None,
            };

            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    if self.accept_failed(e).await {
                        continue;
                    }
                    break;
                }
            };

            let Some(registration) = self.registry.reserve() else {
                debug!(peer = %peer, "Dropping connection accepted during shutdown");
                break;
            };
            if let Err(e) = stream.set_nodelay(true) {
                trace!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let key = registration.key();
            let handler = ConnectionHandler::new(
                stream,
                peer,
                Arc::clone(&self.backend),
                &self.activity,
                self.settings,
            )
            .with_registration(registration);

            let task = tokio::spawn(async move {
                handler.run().await;
                drop(permit);
            });
            self.registry.attach(key, task.abort_handle());
        }
        debug!("Accept loop exited");
    }

    /// Handle an accept error. Returns `false` when the loop should exit.
    async fn accept_failed(&self, e: io::Error) -> bool {
        if self.coordinator.is_shutting_down() {
            debug!(error = %e, "Accept loop stopping");
            return false;
        }
        error!(error = %e, "Failed to accept connection");
        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
        true
    }
}
