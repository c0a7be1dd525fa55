use crate::{
    common::{
        runtime,
        util::{read_env_parsed, Join},
    },
    server::{connection::serve_connection, handler::Handler, listener},
};
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{net::TcpListener, runtime::Handle, sync::oneshot};

/// Pause after a failed accept, e.g. when the process ran out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum Error {
    #[error("the mock server is already running")]
    AlreadyRunning,
    #[error("cannot bind to socket addr {0}: {1}")]
    SocketBindError(SocketAddr, io::Error),
    #[error("cannot set up listening socket: {0}")]
    SocketSetupError(io::Error),
    #[error("cannot obtain local address: {0}")]
    LocalSocketAddrError(io::Error),
    #[error("cannot build server runtime: {0}")]
    RuntimeError(io::Error),
}

/// Settings for a mock server. `Default` reads them from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Worker threads of the server runtime (`HTTPSTUB_WORKER_THREADS`, default 2).
    pub worker_threads: usize,
    /// Upper bound for blocking threads (`HTTPSTUB_BLOCKING_THREADS`, default 2).
    pub blocking_threads: usize,
    /// Maximum number of recorded requests; older entries are evicted first
    /// (`HTTPSTUB_HISTORY_LIMIT`, default unlimited).
    pub history_limit: Option<usize>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let history_limit = read_env_parsed("HTTPSTUB_HISTORY_LIMIT", 0usize);
        Self {
            worker_threads: read_env_parsed("HTTPSTUB_WORKER_THREADS", 2),
            blocking_threads: read_env_parsed("HTTPSTUB_BLOCKING_THREADS", 2),
            history_limit: (history_limit > 0).then_some(history_limit),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig::from_env()
    }
}

/// A running accept loop.
///
/// The loop is a task on the server runtime woken by the reactor whenever the listening socket
/// is readable. Every accepted connection is served by its own task.
pub(crate) struct Acceptor {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    closed: Option<oneshot::Receiver<()>>,
}

impl Acceptor {
    pub fn start<H>(runtime: &Handle, port: u16, handler: Arc<H>) -> Result<Self, Error>
    where
        H: Handler + Send + Sync + 'static,
    {
        let listener = listener::bind(port)?;

        let listener = {
            let _guard = runtime.enter();
            listener::register(listener)?
        };
        let local_addr = listener.local_addr().map_err(Error::LocalSocketAddrError)?;

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let (closed_sender, closed_receiver) = oneshot::channel();

        tracing::info!("Listening on {}", local_addr);
        runtime.spawn(run_accept_loop(
            listener,
            handler,
            shutdown_receiver,
            closed_sender,
        ));

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown_sender),
            closed: Some(closed_receiver),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and blocks until the listening socket is closed.
    pub fn stop(mut self) {
        self.shutdown_and_wait();
    }

    fn shutdown_and_wait(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(closed) = self.closed.take() {
            if closed.join().is_err() {
                tracing::warn!("Accept loop on {} ended unexpectedly", self.local_addr);
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.shutdown_and_wait();
    }
}

async fn run_accept_loop<H>(
    listener: TcpListener,
    handler: Arc<H>,
    mut shutdown: oneshot::Receiver<()>,
    closed: oneshot::Sender<()>,
) where
    H: Handler + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            accepted = listener::accept(&listener) => {
                match accepted {
                    Ok((stream, remote_address)) => {
                        let handler = handler.clone();
                        tokio::spawn(serve_connection(stream, Some(remote_address), handler));
                    },
                    Err(err) => {
                        tracing::error!("TCP accept error: {:?}", err);
                        if back_off(&mut shutdown).await {
                            break;
                        }
                    },
                };
            }
            _ = &mut shutdown => {
                break;
            }
        }
    }

    let local_addr = listener.local_addr().ok();
    drop(listener);
    tracing::info!("Stopped listening on {:?}", local_addr);

    let _ = closed.send(());
}

/// Waits out [`ACCEPT_ERROR_BACKOFF`]. Returns `true` if shutdown was requested meanwhile.
async fn back_off(shutdown: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = runtime::sleep(ACCEPT_ERROR_BACKOFF) => false,
        _ = shutdown => true,
    }
}
