use crate::{
    api::{Mock, MockRef},
    common::{data::Request, runtime},
    server::{
        handler::MockHandler,
        server::{Acceptor, Error, ServerConfig},
        state::MockState,
    },
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Runtime;

#[derive(Default)]
struct Inner {
    runtime: Option<Runtime>,
    acceptor: Option<Acceptor>,
}

/// A mock server that is able to receive and respond to HTTP requests.
///
/// Mock rules and the request history belong to the server instance and survive
/// [`stop`](MockServer::stop) and a later [`start`](MockServer::start).
///
/// ```
/// use httpstub::{Mock, MockServer};
///
/// let server = MockServer::new();
/// let port = server.start(0).unwrap();
///
/// server.mock_response(Mock::new(200).endpoint("GET /hello").body("hi"));
///
/// assert!(server.is_running());
/// assert_eq!(server.base_url(), Some(format!("http://localhost:{}", port)));
///
/// server.stop();
/// assert_eq!(server.port(), 0);
/// ```
pub struct MockServer {
    pub(crate) state: Arc<MockState>,
    config: ServerConfig,
    inner: Mutex<Inner>,
}

impl MockServer {
    /// Creates a stopped server configured from the environment. See [`ServerConfig`].
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            state: Arc::new(MockState::new(config.history_limit)),
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Binds `port` on all interfaces (IPv4 and IPv6) and starts serving. Port `0` picks a free
    /// ephemeral port. Returns the bound port.
    ///
    /// Fails if the server is already running or the port cannot be bound. Nothing is retried.
    pub fn start(&self, port: u16) -> Result<u16, Error> {
        let mut inner = self.lock_inner();
        if inner.acceptor.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let runtime = match inner.runtime.take() {
            Some(rt) => rt,
            None => runtime::new(self.config.worker_threads, self.config.blocking_threads)
                .map_err(Error::RuntimeError)?,
        };
        let handle = runtime.handle().clone();
        inner.runtime = Some(runtime);

        let handler = Arc::new(MockHandler::new(self.state.clone()));
        let acceptor = Acceptor::start(&handle, port, handler)?;
        let port = acceptor.local_addr().port();
        inner.acceptor = Some(acceptor);

        Ok(port)
    }

    /// Starts the server on an ephemeral port.
    pub fn start_ephemeral(&self) -> Result<u16, Error> {
        self.start(0)
    }

    /// Stops accepting connections. Blocks until the listening socket is closed, so the same
    /// port can be bound again right away. Connections that were already accepted are served
    /// to completion.
    pub fn stop(&self) {
        let acceptor = self.lock_inner().acceptor.take();
        if let Some(acceptor) = acceptor {
            acceptor.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_inner().acceptor.is_some()
    }

    /// The bound port, or `0` if the server is not running.
    pub fn port(&self) -> u16 {
        self.lock_inner()
            .acceptor
            .as_ref()
            .map(|acceptor| acceptor.local_addr().port())
            .unwrap_or(0)
    }

    /// `http://localhost:<port>` while running, `None` otherwise.
    pub fn base_url(&self) -> Option<String> {
        match self.port() {
            0 => None,
            port => Some(format!("http://localhost:{}", port)),
        }
    }

    /// Builds the URL for `path` on this server, or `None` if it is not running.
    pub fn url<S: AsRef<str>>(&self, path: S) -> Option<String> {
        self.base_url()
            .map(|base| format!("{}{}", base, path.as_ref()))
    }

    /// Registers a mock rule. Rules are matched in registration order.
    pub fn mock_response<M: Into<Mock>>(&self, mock: M) -> MockRef<'_> {
        let (matcher, response, only_once) = mock.into().into_parts();
        let id = self.state.registry.add(matcher, response, only_once);
        MockRef { id, server: self }
    }

    /// Deletes all mock rules. The request history is kept.
    pub fn clear_mock_responses(&self) {
        self.state.registry.clear();
    }

    /// Deletes all mock rules and the request history.
    pub fn clear_all_mocking_state(&self) {
        self.state.reset();
    }

    /// All recorded requests, oldest first.
    pub fn latest_requests(&self) -> Vec<Arc<Request>> {
        self.state.history.all()
    }

    /// The `"METHOD PATH"` of every recorded request, oldest first.
    pub fn latest_request_endpoints(&self) -> Vec<String> {
        self.state.history.endpoints()
    }

    pub fn last_request(&self) -> Option<Arc<Request>> {
        self.state.history.last()
    }

    pub fn clear_latest_requests(&self) {
        self.state.history.clear();
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockServer {
    fn default() -> Self {
        MockServer::new()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
        if let Some(runtime) = self.lock_inner().runtime.take() {
            runtime.shutdown_background();
        }
    }
}
