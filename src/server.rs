//! TCP listener for editor requests.
//!
//! Accepts connections and hands each one to its own task. The accept loop
//! never waits on a handler; it only stops when the shutdown future resolves.

use crate::config::Config;
use crate::handler::{self, ReadSettings};
use crate::launcher::Launch;
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// How long shutdown waits for in-flight connections to finish
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Server instance
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    settings: ReadSettings,
    launcher: Arc<dyn Launch>,
    max_connections: usize,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &Config, launcher: Arc<dyn Launch>) -> Result<Self, ServerError> {
        let listen = config.listen_addr();
        let addr = listen
            .to_socket_addrs()
            .map_err(|e| ServerError::Resolve(listen.clone(), e))?
            .next()
            .ok_or_else(|| {
                ServerError::Resolve(
                    listen.clone(),
                    io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
                )
            })?;

        let listener = create_listener(addr, config.backlog)
            .and_then(TcpListener::from_std)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Server {
            listener,
            local_addr,
            settings: ReadSettings {
                chunk_size: config.read_chunk_size,
                timeout: config.read_timeout,
            },
            launcher,
            max_connections: config.max_connections,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// The listener is closed first; handlers still running are then given
    /// up to `DRAIN_TIMEOUT` to finish before this returns.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!(port = self.local_addr.port(), address = %self.local_addr, "Server is up");

        tokio::pin!(shutdown);

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.connection_limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(ip = %peer.ip(), port = peer.port(), "Connected");

                        let settings = self.settings;
                        let launcher = Arc::clone(&self.launcher);

                        tokio::spawn(async move {
                            handler::handle_connection(stream, peer, settings, launcher).await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        drop(self.listener);

        let in_flight = self.max_connections - self.connection_limit.available_permits();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight connections");
            let all = u32::try_from(self.max_connections).unwrap_or(u32::MAX);
            let drained =
                tokio::time::timeout(DRAIN_TIMEOUT, self.connection_limit.acquire_many(all)).await;
            if drained.is_err() {
                warn!("Connections still open at shutdown, leaving them behind");
            }
        }

        info!("Server shutdown done");
        Ok(())
    }
}

/// Resolves when the operator asks the process to stop (Ctrl-C, or SIGTERM on Unix).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("User interruption, stopping server"),
        _ = terminate => info!("Terminated, stopping server"),
    }
}

/// Create a listening socket with an explicit backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    // Lets a restarted relay rebind while old connections sit in TIME_WAIT.
    // Two live listeners on one port still conflict.
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Server errors
#[derive(Debug)]
pub enum ServerError {
    Resolve(String, io::Error),
    Bind { addr: SocketAddr, source: io::Error },
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Resolve(listen, e) => {
                write!(f, "Failed to resolve listen address '{listen}': {e}")
            }
            ServerError::Bind { addr, source } => match source.raw_os_error() {
                Some(code) => write!(
                    f,
                    "Bind failed on {addr}. Error code: {code}, message: {source}"
                ),
                None => write!(f, "Bind failed on {addr}: {source}"),
            },
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Resolve(_, e) => Some(e),
            ServerError::Bind { source, .. } => Some(source),
        }
    }
}
