//! End-to-end relay tests over real sockets: an external client on one
//! side, a scripted agent on the tunnel side.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use burrow_core::{EngineConfig, RelayEngine};
use burrow_proto::{FrameAssembler, FRAME_DELIMITER};
use burrow_relay::{ExternalServer, ExternalServerConfig, TunnelServer, TunnelServerConfig};

const SECRET: &str = "relay-secret";
const WAIT: Duration = Duration::from_secs(5);

struct Relay {
    engine: Arc<RelayEngine>,
    external_addr: SocketAddr,
    tunnel_addr: SocketAddr,
}

async fn start_relay(external_config: ExternalServerConfig) -> Relay {
    let engine = Arc::new(RelayEngine::new(EngineConfig {
        max_conns: 32,
        outbound_capacity: 64,
        inbound_capacity: 8,
        buffer_size: 4096,
        buffer_pool_idle: 4,
    }));

    let external = Arc::new(
        ExternalServer::bind(external_config, engine.clone())
            .await
            .expect("bind external"),
    );
    let external_addr = external.local_addr().unwrap();

    let mut tunnel_config =
        TunnelServerConfig::new("127.0.0.1:0".parse().unwrap(), SECRET.to_string());
    tunnel_config.read_timeout = Duration::from_millis(100);
    tunnel_config.auth_timeout = Duration::from_millis(500);
    let tunnel = Arc::new(
        TunnelServer::bind(tunnel_config, engine.clone())
            .await
            .expect("bind tunnel"),
    );
    let tunnel_addr = tunnel.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = external.run().await;
    });
    tokio::spawn(async move {
        let _ = tunnel.run().await;
    });

    Relay {
        engine,
        external_addr,
        tunnel_addr,
    }
}

fn fast_external_config() -> ExternalServerConfig {
    ExternalServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        read_timeout: Duration::from_millis(100),
        reader_idle: Duration::from_secs(10),
        write_timeout: Duration::from_millis(500),
        writer_idle: Duration::from_secs(10),
        idle_poll: Duration::from_millis(50),
        ..ExternalServerConfig::default()
    }
}

async fn connect_agent(addr: SocketAddr) -> TcpStream {
    let mut agent = TcpStream::connect(addr).await.expect("connect tunnel");
    agent.write_all(SECRET.as_bytes()).await.unwrap();
    let mut ack = [0u8; 64];
    let n = timeout(WAIT, agent.read(&mut ack)).await.unwrap().unwrap();
    assert_eq!(&ack[..n], b"connect success ...");
    agent
}

/// Reassembles frames on the agent side of the wire.
#[derive(Default)]
struct AgentReader {
    assembler: FrameAssembler,
    queued: VecDeque<Bytes>,
}

impl AgentReader {
    async fn next_frame(&mut self, stream: &mut TcpStream) -> Bytes {
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return frame;
            }
            let mut buf = [0u8; 1024];
            let n = timeout(WAIT, stream.read(&mut buf))
                .await
                .expect("timed out waiting for a frame")
                .unwrap();
            assert!(n > 0, "tunnel closed while waiting for a frame");
            self.queued.extend(self.assembler.push(&buf[..n]));
        }
    }
}

/// Splits a relay -> agent frame tag `"<addr> <id>\r\n"` off the payload.
fn parse_relay_frame(frame: &[u8]) -> (u16, Vec<u8>) {
    let pos = frame
        .windows(2)
        .position(|w| w == b"\r\n")
        .expect("frame has no tag separator");
    let tag = std::str::from_utf8(&frame[..pos]).unwrap();
    let id = tag
        .rsplit(' ')
        .next()
        .and_then(|id| id.parse().ok())
        .expect("tag has no id");
    (id, frame[pos + 2..].to_vec())
}

#[tokio::test]
async fn test_ping_pong_round_trip() {
    let relay = start_relay(fast_external_config()).await;
    let mut agent = connect_agent(relay.tunnel_addr).await;
    let mut reader = AgentReader::default();

    let mut client = TcpStream::connect(relay.external_addr).await.unwrap();
    client.write_all(b"PING").await.unwrap();

    // The agent sees the tagged payload as one frame.
    let frame = reader.next_frame(&mut agent).await;
    let (conn_id, payload) = parse_relay_frame(&frame);
    assert_eq!(payload, b"PING");
    assert!(relay.engine.ids().is_allocated(conn_id));

    // Echo back through the tunnel; the client sees exactly PONG.
    let mut reply = format!("{conn_id}\r\nPONG").into_bytes();
    reply.extend_from_slice(FRAME_DELIMITER);
    agent.write_all(&reply).await.unwrap();

    let mut buf = [0u8; 64];
    let n = timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"PONG");
}

#[tokio::test]
async fn test_heartbeats_and_unrouted_frames_filtered() {
    let relay = start_relay(fast_external_config()).await;
    let mut agent = connect_agent(relay.tunnel_addr).await;
    let mut reader = AgentReader::default();

    let mut client = TcpStream::connect(relay.external_addr).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    let frame = reader.next_frame(&mut agent).await;
    let (conn_id, _) = parse_relay_frame(&frame);

    // A heartbeat and a frame for an id nobody owns, then real data.
    let mut wire = Vec::new();
    wire.extend_from_slice(b"h");
    wire.extend_from_slice(FRAME_DELIMITER);
    wire.extend_from_slice(b"31\r\nlost");
    wire.extend_from_slice(FRAME_DELIMITER);
    wire.extend_from_slice(format!("{conn_id}\r\nreal").as_bytes());
    wire.extend_from_slice(FRAME_DELIMITER);
    agent.write_all(&wire).await.unwrap();

    // Only the routed payload reaches the client.
    let mut buf = [0u8; 64];
    let n = timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"real");
}

#[tokio::test]
async fn test_failed_auth_gets_no_ack() {
    let relay = start_relay(fast_external_config()).await;

    let mut intruder = TcpStream::connect(relay.tunnel_addr).await.unwrap();
    intruder.write_all(b"wrong-secret").await.unwrap();

    // The relay closes without writing anything.
    let mut buf = [0u8; 64];
    let n = timeout(WAIT, intruder.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);

    // The listener still accepts a correctly-authenticated agent.
    let _agent = connect_agent(relay.tunnel_addr).await;
}

#[tokio::test]
async fn test_idle_writer_reclaims_identifier() {
    // Writer idle fires long before the reader would give up, so the
    // teardown is driven by the writer while the reader is still
    // parked on a pending timeout read.
    let config = ExternalServerConfig {
        writer_idle: Duration::from_millis(400),
        ..fast_external_config()
    };
    let relay = start_relay(config).await;

    let mut client = TcpStream::connect(relay.external_addr).await.unwrap();
    client.write_all(b"one burst").await.unwrap();

    // Wait for the id to be allocated, then for idle teardown.
    timeout(WAIT, async {
        while !relay.engine.ids().is_allocated(1) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("id never allocated");

    timeout(WAIT, async {
        while relay.engine.ids().is_allocated(1) {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("idle connection never released its id");

    // The client observes the close.
    let mut buf = [0u8; 64];
    loop {
        let n = timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap();
        if n == 0 {
            break;
        }
    }
}

#[tokio::test]
async fn test_client_disconnect_sends_close_marker() {
    let relay = start_relay(fast_external_config()).await;
    let mut agent = connect_agent(relay.tunnel_addr).await;
    let mut reader = AgentReader::default();

    let client = TcpStream::connect(relay.external_addr).await;
    let mut client = client.unwrap();
    client.write_all(b"bye").await.unwrap();
    let _ = reader.next_frame(&mut agent).await;

    drop(client);

    // The close marker is a zero-length payload: a bare delimiter on
    // the wire. Read raw bytes since the assembler skips empties.
    let mut wire = Vec::new();
    timeout(WAIT, async {
        let mut buf = [0u8; 256];
        while !wire
            .windows(FRAME_DELIMITER.len())
            .any(|w| w == FRAME_DELIMITER)
        {
            let n = agent.read(&mut buf).await.unwrap();
            assert!(n > 0);
            wire.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .expect("close marker never arrived");
    assert_eq!(wire, FRAME_DELIMITER);
}

#[tokio::test]
async fn test_second_client_gets_distinct_id() {
    let relay = start_relay(fast_external_config()).await;
    let mut agent = connect_agent(relay.tunnel_addr).await;
    let mut reader = AgentReader::default();

    let mut first = TcpStream::connect(relay.external_addr).await.unwrap();
    first.write_all(b"from-first").await.unwrap();
    let (first_id, _) = parse_relay_frame(&reader.next_frame(&mut agent).await);

    let mut second = TcpStream::connect(relay.external_addr).await.unwrap();
    second.write_all(b"from-second").await.unwrap();
    let (second_id, payload) = parse_relay_frame(&reader.next_frame(&mut agent).await);

    assert_ne!(first_id, second_id);
    assert_eq!(payload, b"from-second");

    // Replies route independently.
    let mut reply = format!("{second_id}\r\nto-second").into_bytes();
    reply.extend_from_slice(FRAME_DELIMITER);
    reply.extend_from_slice(format!("{first_id}\r\nto-first").as_bytes());
    reply.extend_from_slice(FRAME_DELIMITER);
    agent.write_all(&reply).await.unwrap();

    let mut buf = [0u8; 64];
    let n = timeout(WAIT, second.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"to-second");
    let n = timeout(WAIT, first.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"to-first");
}
