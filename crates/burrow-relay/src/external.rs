//! External listener
//!
//! Accepts public client connections, pins each one to a connection id
//! and relays its bytes over the shared tunnel queue. Per connection,
//! a reader task feeds the shared outbound queue and a writer task
//! drains the connection's inbound queue; whichever exits first tears
//! the connection down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use burrow_core::{BufferPool, Outbound, RelayEngine};
use burrow_proto::{encode_tag, ConnId};

#[derive(Debug, Error)]
pub enum ExternalServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}")]
    Bind { address: String, reason: String },
}

/// External listener configuration.
///
/// Defaults mirror the relay's production timeouts; tests shrink them.
#[derive(Debug, Clone)]
pub struct ExternalServerConfig {
    pub bind_addr: SocketAddr,
    /// Attempts to grab a connection id before rejecting an accept.
    pub alloc_attempts: u32,
    /// Sleep between allocation attempts.
    pub alloc_backoff: Duration,
    /// Per-read timeout on the client socket.
    pub read_timeout: Duration,
    /// Reader gives up after this long without a successful read.
    pub reader_idle: Duration,
    /// Per-write timeout on the client socket.
    pub write_timeout: Duration,
    /// Writer closes the connection after this long without traffic.
    pub writer_idle: Duration,
    /// How often an idle writer re-checks its idle clock.
    pub idle_poll: Duration,
}

impl Default for ExternalServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8002".parse().expect("static addr"),
            alloc_attempts: 20,
            alloc_backoff: Duration::from_millis(50),
            read_timeout: Duration::from_secs(1),
            reader_idle: Duration::from_secs(5),
            write_timeout: Duration::from_secs(3),
            writer_idle: Duration::from_secs(12),
            idle_poll: Duration::from_millis(500),
        }
    }
}

/// Public-facing TCP relay listener.
pub struct ExternalServer {
    config: ExternalServerConfig,
    engine: Arc<RelayEngine>,
    listener: TcpListener,
}

impl ExternalServer {
    /// Bind the listening socket. A failure here is fatal at startup;
    /// everything after it is supervised.
    pub async fn bind(
        config: ExternalServerConfig,
        engine: Arc<RelayEngine>,
    ) -> Result<Self, ExternalServerError> {
        let listener = TcpListener::bind(config.bind_addr).await.map_err(|e| {
            ExternalServerError::Bind {
                address: config.bind_addr.to_string(),
                reason: e.to_string(),
            }
        })?;
        info!("external listener on {}", listener.local_addr()?);
        Ok(Self {
            config,
            engine,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ExternalServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; runs until an accept error, then the supervisor
    /// restarts it on the same socket.
    pub async fn run(self: Arc<Self>) -> Result<(), ExternalServerError> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, peer_addr).await;
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let Some(conn_id) = self.allocate_with_backoff().await else {
            warn!("id pool exhausted, rejecting {}", peer_addr);
            return;
        };
        debug!("accepted {} as connection {}", peer_addr, conn_id);

        let inbound_rx = self.engine.inbound().register(conn_id);
        let (read_half, write_half) = stream.into_split();

        let mut reader = tokio::spawn(read_loop(
            read_half,
            peer_addr,
            conn_id,
            self.engine.outbound_sender(),
            self.engine.buffers().clone(),
            self.config.clone(),
        ));
        let mut writer = tokio::spawn(write_loop(write_half, inbound_rx, self.config.clone()));

        // Either side exiting drains the whole connection.
        tokio::select! {
            _ = &mut reader => writer.abort(),
            _ = &mut writer => reader.abort(),
        }

        // Tell the agent this logical stream ended, then recycle the id
        // and close the inbound queue.
        let _ = self
            .engine
            .outbound_sender()
            .send(Outbound {
                conn_id,
                data: Bytes::new(),
            })
            .await;
        self.engine.ids().release(conn_id);
        self.engine.inbound().unregister(conn_id);
        debug!("connection {} ({}) closed", conn_id, peer_addr);
    }

    async fn allocate_with_backoff(&self) -> Option<ConnId> {
        for attempt in 0..self.config.alloc_attempts {
            if let Some(id) = self.engine.ids().allocate() {
                return Some(id);
            }
            if attempt + 1 < self.config.alloc_attempts {
                sleep(self.config.alloc_backoff).await;
            }
        }
        None
    }
}

/// Client socket -> shared outbound queue.
async fn read_loop(
    mut read_half: OwnedReadHalf,
    peer_addr: SocketAddr,
    conn_id: ConnId,
    outbound: mpsc::Sender<Outbound>,
    buffers: BufferPool,
    config: ExternalServerConfig,
) {
    let peer = peer_addr.to_string();
    let mut buf = buffers.get();
    let mut last_read = Instant::now();

    loop {
        match timeout(config.read_timeout, read_half.read(&mut buf)).await {
            Err(_) => {
                if last_read.elapsed() > config.reader_idle {
                    debug!("connection {} reader idle, stopping", conn_id);
                    return;
                }
            }
            Ok(Ok(0)) => {
                debug!("connection {} closed by peer", conn_id);
                return;
            }
            Ok(Ok(n)) => {
                last_read = Instant::now();
                let data = encode_tag(&peer, conn_id, &buf[..n]);
                // Blocks when the shared queue is full: backpressure
                // into this client rather than unbounded buffering.
                if outbound.send(Outbound { conn_id, data }).await.is_err() {
                    error!("shared outbound queue closed, dropping connection {}", conn_id);
                    return;
                }
            }
            Ok(Err(e)) => {
                debug!("connection {} read error: {}", conn_id, e);
                return;
            }
        }
    }
}

/// Inbound queue -> client socket.
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut inbound: mpsc::Receiver<Bytes>,
    config: ExternalServerConfig,
) {
    let mut last_write = Instant::now();

    loop {
        match timeout(config.idle_poll, inbound.recv()).await {
            Ok(Some(payload)) => {
                match timeout(config.write_timeout, write_half.write_all(&payload)).await {
                    // A slow client write times out; the payload is
                    // skipped and the connection keeps going.
                    Err(_) => continue,
                    Ok(Ok(())) => last_write = Instant::now(),
                    Ok(Err(e)) => {
                        debug!("client write error: {}", e);
                        return;
                    }
                }
            }
            // Queue closed by teardown.
            Ok(None) => return,
            Err(_) => {
                if last_write.elapsed() >= config.writer_idle {
                    debug!("writer idle past threshold, closing connection");
                    return;
                }
            }
        }
    }
}
