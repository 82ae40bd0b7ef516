//! Per-connection session state.

use std::net::SocketAddr;
use std::time::Instant;
use uuid::Uuid;

/// Protocol state of one connection.
///
/// Transitions are monotonic: `Unbound` → `Bound` → `AwaitingUnbindAck` →
/// `Closed`, with `Closed` also directly reachable from any state on
/// socket error, EOF or authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, waiting for a bind request.
    Unbound,
    /// Bind accepted, submits are legal.
    Bound,
    /// Unbind sent, waiting for the client's acknowledgment.
    AwaitingUnbindAck,
    /// Terminal. No command is processed once this is reached.
    Closed,
}

/// A client session.
///
/// Owned exclusively by the dispatch loop of its connection; no other task
/// may mutate it. Created on accept, destroyed when the socket goes away or
/// the unbind handshake completes.
pub struct Session {
    /// Unique session ID (logging only).
    pub id: String,

    /// Remote address.
    pub remote_addr: SocketAddr,

    state: ConnectionState,

    /// system_id presented in the accepted bind.
    bound_system_id: Option<String>,

    /// Correlation id handed to the application; created lazily on the
    /// first submit, reused for the connection's lifetime, never shared
    /// across connections.
    app_session_id: Option<String>,

    frames_processed: u64,

    created_at: Instant,
}

impl Session {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            remote_addr,
            state: ConnectionState::Unbound,
            bound_system_id: None,
            app_session_id: None,
            frames_processed: 0,
            created_at: Instant::now(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Marks the session bound under the given system_id.
    pub fn bind(&mut self, system_id: impl Into<String>) {
        self.bound_system_id = Some(system_id.into());
        self.state = ConnectionState::Bound;
    }

    /// Moves the session to its terminal state.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn bound_system_id(&self) -> Option<&str> {
        self.bound_system_id.as_deref()
    }

    /// Returns the application session id, creating it on first use.
    pub fn app_session_id(&mut self) -> &str {
        self.app_session_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
    }

    /// Whether an application session has been started on this connection.
    pub fn has_app_session(&self) -> bool {
        self.app_session_id.is_some()
    }

    /// Records a processed frame.
    pub fn record_frame(&mut self) {
        self.frames_processed += 1;
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Returns the session age.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}
