//! Tunnel listener
//!
//! Accepts the internal agent's single long-lived connection. After a
//! shared-secret handshake, the send loop drains the shared outbound
//! queue onto the wire and the receive loop feeds raw reads through
//! the frame assembler into the dispatcher. Agent connections are
//! served one at a time; a newcomer waits until the current tunnel is
//! gone.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use burrow_core::{dispatch, RelayEngine};
use burrow_proto::{encode, ConnId, FrameAssembler};

/// Acknowledgement written to the agent after a successful handshake.
pub const TUNNEL_ACK: &[u8] = b"connect success ...";

/// Upper bound on the handshake credential read.
const AUTH_BUF_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum TunnelServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}")]
    Bind { address: String, reason: String },
}

/// Tunnel listener configuration.
#[derive(Debug, Clone)]
pub struct TunnelServerConfig {
    pub bind_addr: SocketAddr,
    /// Pre-shared secret the agent must present verbatim.
    pub secret: String,
    /// Deadline for the handshake read and the ack write.
    pub auth_timeout: Duration,
    /// Per-write timeout on the tunnel socket.
    pub write_timeout: Duration,
    /// Per-read timeout on the tunnel socket.
    pub read_timeout: Duration,
}

impl TunnelServerConfig {
    pub fn new(bind_addr: SocketAddr, secret: String) -> Self {
        Self {
            bind_addr,
            secret,
            auth_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Listener for the internal agent's tunnel connection.
pub struct TunnelServer {
    config: TunnelServerConfig,
    engine: Arc<RelayEngine>,
    listener: TcpListener,
}

impl TunnelServer {
    /// Bind the tunnel socket. A failure here is fatal at startup.
    pub async fn bind(
        config: TunnelServerConfig,
        engine: Arc<RelayEngine>,
    ) -> Result<Self, TunnelServerError> {
        let listener = TcpListener::bind(config.bind_addr).await.map_err(|e| {
            TunnelServerError::Bind {
                address: config.bind_addr.to_string(),
                reason: e.to_string(),
            }
        })?;
        info!("tunnel listener on {}", listener.local_addr()?);
        Ok(Self {
            config,
            engine,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TunnelServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. One agent connection is serviced at a time; the
    /// loop returns only on an accept error, for the supervisor to
    /// restart.
    pub async fn run(self: Arc<Self>) -> Result<(), TunnelServerError> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            debug!("agent connection attempt from {}", peer_addr);

            // Deliberately opaque on failure: no partial-credential
            // feedback, the socket just closes.
            let Some(stream) = self.handshake(stream).await else {
                warn!("tunnel handshake from {} rejected", peer_addr);
                continue;
            };
            info!("agent {} connected", peer_addr);

            self.serve(stream).await;
            info!("tunnel from {} ended", peer_addr);
        }
    }

    async fn handshake(&self, mut stream: TcpStream) -> Option<TcpStream> {
        let mut buf = [0u8; AUTH_BUF_LEN];
        let n = match timeout(self.config.auth_timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => n,
            _ => return None,
        };
        if buf[..n] != *self.config.secret.as_bytes() {
            return None;
        }
        match timeout(self.config.auth_timeout, stream.write_all(TUNNEL_ACK)).await {
            Ok(Ok(())) => Some(stream),
            _ => None,
        }
    }

    /// Run the send and receive loops until either side fails; the
    /// other is cancelled by drop, which closes the socket.
    async fn serve(&self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        tokio::select! {
            _ = send_loop(write_half, self.engine.clone(), self.config.write_timeout) => {}
            _ = recv_loop(read_half, self.engine.clone(), self.config.read_timeout) => {}
        }
        // Lingering external connections are not force-closed here;
        // their own idle timeouts reclaim them.
    }
}

/// Shared outbound queue -> tunnel socket.
async fn send_loop(
    mut write_half: OwnedWriteHalf,
    engine: Arc<RelayEngine>,
    write_timeout: Duration,
) {
    // Holding the receiver guard makes this connection "the" tunnel.
    let mut outbound = engine.lock_outbound().await;
    let mut pending: Option<(ConnId, Bytes)> = None;

    loop {
        let (conn_id, frame) = match pending.take() {
            Some(item) => item,
            None => match outbound.recv().await {
                Some(item) => {
                    trace!(
                        "forwarding {} bytes for connection {}",
                        item.data.len(),
                        item.conn_id
                    );
                    (item.conn_id, encode(&item.data))
                }
                None => return,
            },
        };

        match timeout(write_timeout, write_half.write_all(&frame)).await {
            Err(_) => {
                // Retried whole next iteration. If the timeout hit
                // after a partial write the agent sees the frame
                // twice; at-least-once is the accepted behavior here.
                debug!("tunnel write timed out, retrying frame for connection {}", conn_id);
                pending = Some((conn_id, frame));
            }
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("tunnel write error: {}", e);
                return;
            }
        }
    }
}

/// Tunnel socket -> assembler -> dispatcher.
async fn recv_loop(mut read_half: OwnedReadHalf, engine: Arc<RelayEngine>, read_timeout: Duration) {
    let mut buf = engine.buffers().get();
    let mut assembler = FrameAssembler::new();

    loop {
        match timeout(read_timeout, read_half.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => {
                debug!("tunnel closed by agent");
                return;
            }
            Ok(Ok(n)) => {
                for frame in assembler.push(&buf[..n]) {
                    dispatch(&engine, frame).await;
                }
            }
            Ok(Err(e)) => {
                debug!("tunnel read error: {}", e);
                return;
            }
        }
    }
}
