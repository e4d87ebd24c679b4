//! Server-role session: the per-connection dispatch loop.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{ProtocolErrorKind, RpcError};
use crate::graph::{CallArgs, InvokeError, PathResolver, RemoteObject};
use crate::protocol::{Envelope, Verb};
use crate::socket::Connection;

use super::SessionState;

/// Callback run when the peer asks the session to stop.
pub type StopHook = Arc<dyn Fn() + Send + Sync>;

/// Dispatch loop tuning.
#[derive(Clone)]
pub struct SessionOptions {
    /// Bounded receive wait; also the worst-case stop latency.
    pub poll_interval: Duration,
    /// Run after a peer `_stop` request.
    pub stop_hook: Option<StopHook>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            stop_hook: None,
        }
    }
}

impl SessionOptions {
    /// Options from the `[protocol]` settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.protocol.poll_interval(),
            stop_hook: None,
        }
    }

    /// Set the receive bound.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run `hook` when the peer sends `_stop`.
    pub fn with_stop_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.stop_hook = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("poll_interval", &self.poll_interval)
            .field("stop_hook", &self.stop_hook.is_some())
            .finish()
    }
}

/// Requests a stop from outside the session's owner.
#[derive(Clone)]
pub struct StopHandle {
    state: Arc<watch::Sender<SessionState>>,
}

impl StopHandle {
    /// Ask the dispatch loop to stop; does not wait for it.
    pub fn request_stop(&self) {
        request_stop(&self.state);
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }
}

fn request_stop(state: &watch::Sender<SessionState>) -> bool {
    state.send_if_modified(|current| {
        if *current == SessionState::Running {
            *current = SessionState::Stopping;
            true
        } else {
            false
        }
    })
}

/// A connection serving an object graph to its peer.
///
/// Created in the `Idle` state; [`ServerSession::start`] launches the
/// dispatch worker.
pub struct ServerSession {
    peer: SocketAddr,
    conn: Option<Connection>,
    resolver: PathResolver,
    options: SessionOptions,
    state: Arc<watch::Sender<SessionState>>,
    worker: Option<JoinHandle<Result<(), RpcError>>>,
}

impl ServerSession {
    /// Serve `root` over `conn` with default options.
    pub fn new(conn: Connection, root: Arc<dyn RemoteObject>) -> Self {
        Self::with_options(conn, root, SessionOptions::default())
    }

    /// Serve `root` over `conn`.
    pub fn with_options(conn: Connection, root: Arc<dyn RemoteObject>, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            peer: conn.peer_addr(),
            conn: Some(conn),
            resolver: PathResolver::new(root),
            options,
            state: Arc::new(state),
            worker: None,
        }
    }

    /// Remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Handle for requesting a stop without owning the session.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Launch the dispatch worker (`Idle` to `Running`).
    pub fn start(&mut self) -> Result<(), RpcError> {
        let conn = self.conn.take().ok_or_else(|| RpcError::Session {
            message: format!("session with {} was already started", self.peer),
        })?;

        self.state.send_replace(SessionState::Running);
        let worker = tokio::spawn(dispatch_loop(
            conn,
            self.resolver.clone(),
            Arc::clone(&self.state),
            self.options.clone(),
        ));
        self.worker = Some(worker);
        Ok(())
    }

    /// Request a stop and wait for the worker to exit.
    ///
    /// Returns within one poll interval plus any in-flight invocation.
    pub async fn stop(&mut self) -> Result<(), RpcError> {
        request_stop(&self.state);
        if let Some(conn) = self.conn.take() {
            // Never started.
            self.state.send_replace(SessionState::Closed);
            if let Err(e) = conn.shutdown().await {
                debug!(peer = %self.peer, error = %e, "Failed to shut down idle session");
            }
            return Ok(());
        }
        self.join().await
    }

    /// Wait for the worker to exit on its own (peer `_stop` or disconnect).
    pub async fn wait(&mut self) -> Result<(), RpcError> {
        self.join().await
    }

    async fn join(&mut self) -> Result<(), RpcError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.await {
            Ok(result) => result,
            Err(e) => {
                self.state.send_replace(SessionState::Closed);
                Err(RpcError::Session {
                    message: format!("dispatch worker for {} failed: {}", self.peer, e),
                })
            }
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        // The detached worker notices within one poll interval.
        if self.worker.is_some() {
            request_stop(&self.state);
        }
    }
}

impl fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSession")
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("resolver", &self.resolver)
            .finish()
    }
}

async fn dispatch_loop(
    mut conn: Connection,
    resolver: PathResolver,
    state: Arc<watch::Sender<SessionState>>,
    options: SessionOptions,
) -> Result<(), RpcError> {
    let peer = conn.peer_addr();
    let mut state_rx = state.subscribe();
    info!(peer = %peer, "Session started");

    let result = loop {
        if *state_rx.borrow_and_update() != SessionState::Running {
            debug!(peer = %peer, "Stop observed");
            break Ok(());
        }

        let received = tokio::select! {
            biased;
            _ = state_rx.changed() => continue,
            received = conn.recv_envelope(Some(options.poll_interval)) => received,
        };

        let envelope = match received {
            Ok(envelope) => envelope,
            Err(e) if e.is_timeout() => continue,
            Err(e) if e.is_connection_closed() => {
                info!(peer = %peer, "Peer disconnected");
                break Ok(());
            }
            Err(RpcError::Protocol {
                kind: ProtocolErrorKind::Violation { message },
            }) => {
                warn!(peer = %peer, error = %message, "Malformed request");
                let reply = Envelope::error(format!("ProtocolViolation: {}", message));
                match conn.send_envelope(&reply).await {
                    Ok(()) => continue,
                    Err(e) => break Err(e),
                }
            }
            Err(e) => break Err(e),
        };

        if envelope.verb() == Verb::Stop {
            info!(peer = %peer, "Stop requested by peer");
            state.send_replace(SessionState::Stopping);
            if let Some(hook) = &options.stop_hook {
                hook();
            }
            break Ok(());
        }

        let reply = execute(&resolver, envelope).await;
        if let Err(e) = conn.send_envelope(&reply).await {
            if e.is_connection_closed() {
                info!(peer = %peer, "Peer disconnected before reply");
                break Ok(());
            }
            break Err(e);
        }
    };

    if let Err(e) = &result {
        error!(peer = %peer, error = %e, "Session ended with error");
    }
    state.send_replace(SessionState::Closed);
    if let Err(e) = conn.shutdown().await {
        debug!(peer = %peer, error = %e, "Failed to shut down connection");
    }
    info!(peer = %peer, "Session closed");

    result
}

/// One decoded request.
#[derive(Debug)]
enum Operation {
    Exists(String),
    Read(String),
    Assign(String, Value),
    Remove(String),
    Invoke(String, CallArgs),
}

impl Operation {
    fn from_envelope(envelope: Envelope) -> Result<Self, RpcError> {
        let operation = match envelope.verb() {
            Verb::ExistAttr => Self::Exists(envelope.path_arg()?.to_string()),
            Verb::GetAttr => Self::Read(envelope.path_arg()?.to_string()),
            Verb::DelAttr => Self::Remove(envelope.path_arg()?.to_string()),
            Verb::SetAttr => {
                let path = envelope.path_arg()?.to_string();
                let value = envelope.positional()?.get(1).cloned().ok_or_else(|| {
                    RpcError::violation(format!("'set_attr' of '{}' requires a value", path))
                })?;
                Self::Assign(path, value)
            }
            Verb::Call(_) => {
                let args = envelope.positional()?.to_vec();
                Self::Invoke(envelope.verb, CallArgs::new(args, envelope.kwargs))
            }
            Verb::Return | Verb::Error | Verb::Stop => {
                return Err(RpcError::violation(format!(
                    "'{}' is not a request verb",
                    envelope.verb
                )))
            }
        };
        Ok(operation)
    }

    fn path(&self) -> &str {
        match self {
            Self::Exists(path)
            | Self::Read(path)
            | Self::Assign(path, _)
            | Self::Remove(path)
            | Self::Invoke(path, _) => path,
        }
    }

    fn run(self, resolver: &PathResolver) -> Result<Value, InvokeError> {
        match self {
            Self::Exists(path) => resolver
                .resolve(&path)
                .map(|_| Value::Bool(true)),
            Self::Read(path) => resolver.get_attr_str(&path).map(Value::String),
            Self::Assign(path, value) => resolver.set_attr(&path, value).map(|_| Value::Null),
            Self::Remove(path) => resolver.del_attr(&path).map(|_| Value::Null),
            Self::Invoke(path, args) => resolver.invoke(&path, args),
        }
    }
}

/// Run one request and build its reply. Never fails.
async fn execute(resolver: &PathResolver, envelope: Envelope) -> Envelope {
    let request_id = Uuid::new_v4();
    let verb = envelope.verb.clone();

    let operation = match Operation::from_envelope(envelope) {
        Ok(operation) => operation,
        Err(e) => {
            warn!(request_id = %request_id, verb = %verb, error = %e, "Rejected request");
            return Envelope::error(format!("ProtocolViolation: {}", violation_message(e)));
        }
    };

    let path = operation.path().to_string();
    let start_time = Instant::now();
    debug!(request_id = %request_id, verb = %verb, path = %path, "Received request");

    let resolver = resolver.clone();
    let result = tokio::task::spawn_blocking(move || operation.run(&resolver)).await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(request_id = %request_id, path = %path, error = %e, "Invocation panicked");
            Err(InvokeError::new("Panic", format!("invocation of '{}' aborted: {}", path, e)))
        }
    };

    let duration_ms = start_time.elapsed().as_millis() as u64;
    match outcome {
        Ok(value) => {
            debug!(request_id = %request_id, path = %path, duration_ms, "Request succeeded");
            Envelope::returning(value)
        }
        Err(e) => {
            debug!(request_id = %request_id, path = %path, duration_ms, error = %e, "Request failed");
            Envelope::error(e.to_string())
        }
    }
}

fn violation_message(error: RpcError) -> String {
    match error {
        RpcError::Protocol {
            kind: ProtocolErrorKind::Violation { message },
        } => message,
        other => other.to_string(),
    }
}
