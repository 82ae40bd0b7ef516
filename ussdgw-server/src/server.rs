//! TCP server implementation.
//!
//! Each accepted connection gets a task pair: a read task that turns the
//! byte stream into complete frames and feeds them through a bounded queue,
//! and a dispatch loop that owns the session and processes one frame at a
//! time. The queue is the connection's serialization point: a frame is never
//! dispatched while an earlier one (or its application call) is still in
//! flight, and bytes arriving meanwhile keep accumulating in the receive
//! buffer up to its cap.

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::session::Session;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use ussdgw_protocol::{Frame, FrameReader};

/// Server runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Identifier announced in bind responses.
    pub server_system_id: String,
    /// Maximum accepted PDU size in bytes.
    pub max_pdu_bytes: u32,
    /// Maximum per-connection receive buffer in bytes.
    pub max_buffer_bytes: usize,
    /// Depth of the per-connection frame queue.
    pub frame_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], ussdgw_protocol::DEFAULT_PORT)),
            max_connections: 1000,
            server_system_id: "server".to_string(),
            max_pdu_bytes: ussdgw_protocol::MAX_PDU_SIZE,
            max_buffer_bytes: ussdgw_protocol::DEFAULT_MAX_BUFFER,
            frame_queue_depth: 32,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            max_connections: config.network.max_connections,
            server_system_id: config.auth.server_system_id.clone(),
            max_pdu_bytes: config.limits.max_pdu_bytes,
            max_buffer_bytes: config.limits.max_buffer_bytes,
            frame_queue_depth: config.limits.frame_queue_depth,
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for the gateway.
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server around an already constructed dispatcher.
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Runs the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("USSD gateway listening on {}", self.config.bind_addr);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let dispatcher = self.dispatcher.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = handle_connection(
                                    stream,
                                    addr,
                                    dispatcher,
                                    config,
                                    conn_shutdown,
                                    stats.clone(),
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

/// Handles a single connection.
///
/// Generic over the stream so tests can drive it with an in-memory duplex
/// pipe instead of a socket.
pub(crate) async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
    mut shutdown: broadcast::Receiver<()>,
    stats: Arc<ServerStats>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    tracing::info!("client connected: {}", addr);

    let (read_half, mut write_half) = tokio::io::split(stream);
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(config.frame_queue_depth);
    let peer_closed = Arc::new(AtomicBool::new(false));

    let reader = FrameReader::with_limits(config.max_pdu_bytes, config.max_buffer_bytes);
    let read_task = tokio::spawn(read_loop(read_half, frame_tx, reader, peer_closed.clone(), addr));

    let mut session = Session::new(addr);
    let result = loop {
        tokio::select! {
            maybe_frame = frame_rx.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        stats.frames_total.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = dispatcher
                            .dispatch(&mut session, frame, &mut write_half, &peer_closed)
                            .await
                        {
                            break Err(e);
                        }
                        if session.is_closed() {
                            break Ok(());
                        }
                    }
                    // read side finished: EOF, read error or framing error
                    None => break Ok(()),
                }
            }
            _ = shutdown.recv() => {
                break Err(ServerError::ShuttingDown);
            }
        }
    };

    let _ = write_half.shutdown().await;
    read_task.abort();

    tracing::debug!(
        "[{}] session {} ended after {} frames ({:?})",
        addr,
        session.id,
        session.frames_processed(),
        session.age()
    );

    result
}

/// Reads bytes off the socket, slices them into frames and queues them in
/// arrival order. Ends on EOF, read error, framing error or queue closure;
/// raises `peer_closed` when the peer is actually gone.
async fn read_loop<R>(
    mut read_half: R,
    frame_tx: mpsc::Sender<Frame>,
    mut reader: FrameReader,
    peer_closed: Arc<AtomicBool>,
    addr: SocketAddr,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("[{}] connection closed by client", addr);
                peer_closed.store(true, Ordering::Release);
                return;
            }
            Ok(n) => {
                if let Err(e) = reader.append(&buf[..n]) {
                    tracing::warn!("[{}] {}", addr, e);
                    return;
                }
                loop {
                    match reader.next_frame() {
                        Ok(Some(frame)) => {
                            if frame_tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("[{}] framing error: {}", addr, e);
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!("[{}] read error: {}", addr, e);
                peer_closed.store(true, Ordering::Release);
                return;
            }
        }
    }
}
