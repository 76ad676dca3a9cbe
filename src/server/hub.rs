//! QUIC conference hub server
//!
//! This module provides the main server that accepts connections, classifies
//! incoming bidirectional streams by their first frame, and routes them to
//! the participant dispatcher or the transfer registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{Connection, Endpoint, RecvStream, SendStream};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{HubError, Result};
use crate::protocol::codec::Decodable;
use crate::protocol::frame::{FrameCodec, FrameType};
use crate::protocol::messages::{
    Envelope, TransferOpen, TransferRequest, TransferResponse, WireError,
};
use crate::server::dispatcher;
use crate::server::room::RoomRegistry;
use crate::server::transfer::{ATTACH_WINDOW, Attachment, RESPONSE_WINDOW, TransferRegistry};
use crate::transport::{read_frame, write_message};

/// ALPN protocol id spoken by hub and clients
pub const ALPN: &[u8] = b"palaver";

/// Server configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Connection idle timeout
    pub idle_timeout: Duration,
    /// Arbitration window for transfer requests
    pub response_window: Duration,
    /// Attachment window for accepted transfers
    pub attach_window: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:50051".parse().expect("static address"),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            response_window: RESPONSE_WINDOW,
            attach_window: ATTACH_WINDOW,
        }
    }
}

/// QUIC conference hub server
pub struct HubServer {
    config: HubConfig,
    endpoint: Option<Endpoint>,
    rooms: Arc<RoomRegistry>,
    transfers: Arc<TransferRegistry>,
}

impl HubServer {
    /// Create a new hub server
    pub fn new(config: HubConfig) -> Self {
        let transfers = Arc::new(TransferRegistry::with_windows(
            config.response_window,
            config.attach_window,
        ));
        Self {
            config,
            endpoint: None,
            rooms: Arc::new(RoomRegistry::new()),
            transfers,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    /// Get the room registry
    pub fn rooms(&self) -> Arc<RoomRegistry> {
        Arc::clone(&self.rooms)
    }

    /// Get the transfer registry
    pub fn transfers(&self) -> Arc<TransferRegistry> {
        Arc::clone(&self.transfers)
    }

    /// Bind the endpoint and return the local address
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        info!("Starting conference hub on {}", self.config.bind_addr);

        // Generate self-signed certificate for development
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| HubError::config(format!("Failed to generate certificate: {}", e)))?;

        let cert_der = CertificateDer::from(
            cert.serialize_der()
                .map_err(|e| HubError::config(format!("Failed to serialize certificate: {}", e)))?,
        );
        let key_der =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));

        // Configure rustls
        let mut server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .map_err(|e| HubError::config(format!("Failed to configure TLS: {}", e)))?;

        server_config.alpn_protocols = vec![ALPN.to_vec()];
        server_config.max_early_data_size = 0;

        // Configure QUIC
        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_concurrent_bidi_streams(256u32.into());
        transport_config.max_idle_timeout(Some(
            self.config
                .idle_timeout
                .try_into()
                .map_err(|e| HubError::config(format!("Invalid idle timeout: {}", e)))?,
        ));

        let mut quic_server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_config)
                .map_err(|e| HubError::config(format!("Failed to create QUIC config: {}", e)))?,
        ));
        quic_server_config.transport_config(Arc::new(transport_config));

        // Create endpoint
        let endpoint = Endpoint::server(quic_server_config, self.config.bind_addr)
            .map_err(|e| HubError::network(format!("Failed to create endpoint: {}", e)))?;

        let local_addr = endpoint.local_addr()?;
        info!("Hub listening on {}", local_addr);

        self.endpoint = Some(endpoint);
        Ok(local_addr)
    }

    /// Accept connections until the endpoint closes
    pub async fn run(&self) -> Result<()> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| HubError::config("Server is not bound"))?;

        loop {
            match endpoint.accept().await {
                Some(incoming) => {
                    if endpoint.open_connections() >= self.config.max_connections {
                        warn!("Connection limit reached, refusing connection");
                        incoming.refuse();
                        continue;
                    }

                    let rooms = Arc::clone(&self.rooms);
                    let transfers = Arc::clone(&self.transfers);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(rooms, transfers, incoming).await {
                            error!("Connection handling failed: {}", e);
                        }
                    });
                }
                None => {
                    warn!("Endpoint stopped accepting connections");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Bind and serve
    pub async fn start(&mut self) -> Result<()> {
        self.bind().await?;
        self.run().await
    }

    /// Shutdown the server
    pub fn shutdown(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"Server shutdown");
            info!("Hub shutdown complete");
        }
    }
}

/// Handle one client connection: accept its bidirectional streams and spawn
/// a classifier for each
async fn handle_connection(
    rooms: Arc<RoomRegistry>,
    transfers: Arc<TransferRegistry>,
    incoming: quinn::Incoming,
) -> Result<()> {
    let connection = incoming.await?;
    let remote = connection.remote_address();
    debug!("New connection from {}", remote);

    loop {
        match connection.accept_bi().await {
            Ok((send, recv)) => {
                let rooms = Arc::clone(&rooms);
                let transfers = Arc::clone(&transfers);
                let connection = connection.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_stream(rooms, transfers, &connection, send, recv).await {
                        debug!("Stream from {} ended with error: {}", remote, e);
                    }
                });
            }
            Err(e) => {
                debug!("Connection from {} closed: {}", remote, e);
                break;
            }
        }
    }

    Ok(())
}

/// Classify a fresh stream by its first frame and hand it to the owning
/// surface
async fn handle_stream(
    rooms: Arc<RoomRegistry>,
    transfers: Arc<TransferRegistry>,
    connection: &Connection,
    mut send: SendStream,
    mut recv: RecvStream,
) -> Result<()> {
    let mut codec = FrameCodec::new();
    let mut buf = vec![0u8; 8 * 1024];

    let first = match read_frame(&mut recv, &mut codec, &mut buf).await? {
        Some(frame) => frame,
        None => return Ok(()), // Stream closed without data
    };

    match first.frame_type {
        FrameType::Envelope => {
            let envelope = Envelope::decode_frame(&first)
                .map_err(|e| HubError::invalid_argument(format!("Invalid first envelope: {}", e)))?;
            let addr = format!("{}/{}", connection.remote_address(), Uuid::new_v4());
            dispatcher::run(rooms, transfers, addr, envelope, send, recv, codec).await
        }

        FrameType::TransferRequest => {
            let req = TransferRequest::decode_frame(&first)
                .map_err(|e| HubError::invalid_argument(format!("Invalid request: {}", e)))?;
            match transfers.request(&rooms, req).await {
                Ok(resp) => write_message(&mut send, &resp).await?,
                Err(e) => write_message(&mut send, &WireError::from(&e)).await?,
            }
            let _ = send.finish();
            Ok(())
        }

        FrameType::TransferResponse => {
            let resp = TransferResponse::decode_frame(&first)
                .map_err(|e| HubError::invalid_argument(format!("Invalid response: {}", e)))?;
            match transfers.respond(resp).await {
                Ok(echo) => write_message(&mut send, &echo).await?,
                Err(e) => write_message(&mut send, &WireError::from(&e)).await?,
            }
            let _ = send.finish();
            Ok(())
        }

        FrameType::TransferOpen => {
            let open = TransferOpen::decode_frame(&first)
                .map_err(|e| HubError::invalid_argument(format!("Invalid attachment: {}", e)))?;
            transfers.attach(open, Attachment { send, recv, codec }).await
        }

        other => {
            let err = HubError::protocol(format!("Unexpected first frame {:?}", other));
            let _ = write_message(&mut send, &WireError::from(&err)).await;
            let _ = send.finish();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{HubClient, HubClientConfig};
    use crate::protocol::messages::{CommandKind, FileChunk, Payload, Role, SERVER_SENDER};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn start_hub() -> (SocketAddr, Arc<TransferRegistry>) {
        let mut server = HubServer::new(HubConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            response_window: Duration::from_secs(10),
            attach_window: Duration::from_secs(10),
            ..HubConfig::default()
        });
        let addr = server.bind().await.expect("bind hub");
        let transfers = server.transfers();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        (addr, transfers)
    }

    async fn connect(addr: SocketAddr) -> HubClient {
        let mut client = HubClient::new(HubClientConfig {
            server_addr: addr,
            ..HubClientConfig::default()
        });
        client.connect().await.expect("connect client");
        client
    }

    async fn next_envelope(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for envelope")
            .expect("stream ended unexpectedly")
    }

    fn text_content(envelope: &Envelope) -> &str {
        match &envelope.payload {
            Payload::Text(text) => &text.content,
            other => panic!("Expected Text payload, got {:?}", other),
        }
    }

    fn command_value(envelope: &Envelope, kind: CommandKind) -> &str {
        match &envelope.payload {
            Payload::Command(cmd) if cmd.kind == kind => &cmd.value,
            other => panic!("Expected {:?} command, got {:?}", kind, other),
        }
    }

    #[tokio::test]
    async fn test_basic_fanout() {
        let (addr, _transfers) = start_hub().await;

        let alice = connect(addr).await;
        let (mut alice_room, mut alice_rx) = alice.join("r1", "alice").await.unwrap();
        let welcome = next_envelope(&mut alice_rx).await;
        assert_eq!(welcome.sender, SERVER_SENDER);
        assert!(command_value(&welcome, CommandKind::Welcome).contains("r1"));

        let bob = connect(addr).await;
        let (_bob_room, mut bob_rx) = bob.join("r1", "bob").await.unwrap();
        let bob_welcome = next_envelope(&mut bob_rx).await;
        command_value(&bob_welcome, CommandKind::Welcome);

        // Alice sees bob join, bob does not see himself
        let joined = next_envelope(&mut alice_rx).await;
        assert_eq!(command_value(&joined, CommandKind::UserJoined), "bob");

        alice_room.send_text("hi").await.unwrap();

        let msg = next_envelope(&mut bob_rx).await;
        assert_eq!(msg.sender, "alice");
        assert_eq!(text_content(&msg), "hi");

        // Audio frames are relayed opaquely on the same path
        alice_room.send_audio(vec![1, 2, 3, 4]).await.unwrap();
        let audio = next_envelope(&mut bob_rx).await;
        match &audio.payload {
            Payload::Audio(frame) => assert_eq!(frame.data, vec![1, 2, 3, 4]),
            other => panic!("Expected Audio payload, got {:?}", other),
        }

        // No echo back to alice
        assert!(
            timeout(Duration::from_millis(300), alice_rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_username_collision_closes_stream() {
        let (addr, _transfers) = start_hub().await;

        let alice = connect(addr).await;
        let (_alice_room, mut alice_rx) = alice.join("r1", "alice").await.unwrap();
        next_envelope(&mut alice_rx).await; // welcome

        let impostor = connect(addr).await;
        let (_room, mut rx) = impostor.join("r1", "Alice").await.unwrap();

        let rejection = next_envelope(&mut rx).await;
        assert_eq!(rejection.sender, SERVER_SENDER);
        let reason = command_value(&rejection, CommandKind::Error);
        assert!(reason.contains("alice"));

        // Stream closes after the rejection
        assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());

        // Alice never heard about the impostor
        assert!(
            timeout(Duration::from_millis(300), alice_rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_private_message_miss() {
        let (addr, _transfers) = start_hub().await;

        let alice = connect(addr).await;
        let (mut alice_room, mut alice_rx) = alice.join("r1", "alice").await.unwrap();
        next_envelope(&mut alice_rx).await; // welcome

        let bob = connect(addr).await;
        let (_bob_room, mut bob_rx) = bob.join("r1", "bob").await.unwrap();
        next_envelope(&mut bob_rx).await; // welcome
        next_envelope(&mut alice_rx).await; // bob joined

        alice_room.send_private("carol", "psst").await.unwrap();

        let err = next_envelope(&mut alice_rx).await;
        assert_eq!(err.sender, SERVER_SENDER);
        assert!(command_value(&err, CommandKind::Error).contains("carol"));

        assert!(
            timeout(Duration::from_millis(300), bob_rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_private_message_hit() {
        let (addr, _transfers) = start_hub().await;

        let alice = connect(addr).await;
        let (mut alice_room, mut alice_rx) = alice.join("r1", "alice").await.unwrap();
        next_envelope(&mut alice_rx).await;

        let bob = connect(addr).await;
        let (_bob_room, mut bob_rx) = bob.join("r1", "bob").await.unwrap();
        next_envelope(&mut bob_rx).await;

        alice_room.send_private("bob", "psst").await.unwrap();

        let msg = next_envelope(&mut bob_rx).await;
        assert_eq!(msg.sender, "alice");
        assert_eq!(text_content(&msg), "(private from alice) psst");
    }

    #[tokio::test]
    async fn test_rejected_transfer_leaves_nothing_behind() {
        let (addr, transfers) = start_hub().await;

        let alice = connect(addr).await;
        let (_alice_room, mut alice_rx) = alice.join("r1", "alice").await.unwrap();
        next_envelope(&mut alice_rx).await;

        let bob = connect(addr).await;
        let (_bob_room, mut bob_rx) = bob.join("r1", "bob").await.unwrap();
        next_envelope(&mut bob_rx).await;
        next_envelope(&mut alice_rx).await; // bob joined

        let req = TransferRequest {
            transfer_id: "t1".to_string(),
            sender: "alice".to_string(),
            recipient: "bob".to_string(),
            room_id: "r1".to_string(),
            filename: "a.bin".to_string(),
            size: 10,
            timestamp: crate::current_timestamp(),
        };

        let bob_client = connect(addr).await;
        let responder = tokio::spawn(async move {
            // Bob declines once the sentinel notice arrives
            let notice = timeout(WAIT, bob_rx.recv()).await.unwrap().unwrap();
            let content = match &notice.payload {
                Payload::Text(text) => text.content.clone(),
                other => panic!("Expected Text payload, got {:?}", other),
            };
            let parsed = crate::protocol::messages::parse_file_request_notice(&content).unwrap();
            bob_client
                .respond_transfer(TransferResponse {
                    transfer_id: parsed.transfer_id,
                    accepted: false,
                    sender: "bob".to_string(),
                    recipient: "alice".to_string(),
                    room_id: "r1".to_string(),
                })
                .await
        });

        let resp = alice.request_transfer(req).await.unwrap();
        assert!(!resp.accepted);
        assert_eq!(resp.transfer_id, "t1");
        responder.await.unwrap().unwrap();

        assert!(!transfers.contains("t1").await);

        // Attaching to the rejected transfer fails with NotFound
        let mut stream = alice.open_transfer("t1", Role::Sender).await.unwrap();
        let err = stream.recv_chunk().await.unwrap_err();
        assert!(matches!(err, HubError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_accepted_p2p_transfer_relays_chunks_in_order() {
        let (addr, transfers) = start_hub().await;

        let alice = connect(addr).await;
        let (_alice_room, mut alice_rx) = alice.join("r1", "alice").await.unwrap();
        next_envelope(&mut alice_rx).await;

        let bob = connect(addr).await;
        let (_bob_room, mut bob_rx) = bob.join("r1", "bob").await.unwrap();
        next_envelope(&mut bob_rx).await;

        let req = TransferRequest {
            transfer_id: "t2".to_string(),
            sender: "alice".to_string(),
            recipient: "bob".to_string(),
            room_id: "r1".to_string(),
            filename: "b.bin".to_string(),
            size: 12,
            timestamp: crate::current_timestamp(),
        };

        let bob_client = connect(addr).await;
        let responder = tokio::spawn(async move {
            let _notice = timeout(WAIT, bob_rx.recv()).await.unwrap().unwrap();
            bob_client
                .respond_transfer(TransferResponse {
                    transfer_id: "t2".to_string(),
                    accepted: true,
                    sender: "bob".to_string(),
                    recipient: "alice".to_string(),
                    room_id: "r1".to_string(),
                })
                .await
        });

        let resp = alice.request_transfer(req).await.unwrap();
        assert!(resp.accepted);
        responder.await.unwrap().unwrap();

        let mut up = alice.open_transfer("t2", Role::Sender).await.unwrap();
        let mut down = bob.open_transfer("t2", Role::Receiver).await.unwrap();

        let payloads: [&[u8]; 3] = [b"AAAA", b"BBBB", b"CCCC"];
        for (i, data) in payloads.iter().enumerate() {
            up.send_chunk(FileChunk {
                transfer_id: "t2".to_string(),
                data: data.to_vec(),
                chunk_number: i as u32,
                is_last: false,
            })
            .await
            .unwrap();
        }
        up.send_chunk(FileChunk {
            transfer_id: "t2".to_string(),
            data: Vec::new(),
            chunk_number: 3,
            is_last: true,
        })
        .await
        .unwrap();

        for (i, expected) in payloads.iter().enumerate() {
            let chunk = timeout(WAIT, down.recv_chunk())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(chunk.chunk_number, i as u32);
            assert_eq!(chunk.data, expected.to_vec());
            assert!(!chunk.is_last);
        }
        let last = timeout(WAIT, down.recv_chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(last.is_last);
        assert_eq!(last.chunk_number, 3);

        // The registry forgets the transfer after the terminal chunk
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!transfers.contains("t2").await);
    }

    #[tokio::test]
    async fn test_broadcast_transfer_late_receiver_sees_suffix() {
        let (addr, transfers) = start_hub().await;

        let alice = connect(addr).await;
        let (mut alice_room, mut alice_rx) = alice.join("r1", "alice").await.unwrap();
        next_envelope(&mut alice_rx).await;

        let bob = connect(addr).await;
        let (_bob_room, mut bob_rx) = bob.join("r1", "bob").await.unwrap();
        next_envelope(&mut bob_rx).await;

        alice_room
            .announce_file("big.iso", 1 << 20, "t3")
            .await
            .unwrap();

        // Bob sees the announcement
        let announcement = next_envelope(&mut bob_rx).await;
        match &announcement.payload {
            Payload::FileAnnouncement(ann) => assert_eq!(ann.transfer_id, "t3"),
            other => panic!("Expected FileAnnouncement payload, got {:?}", other),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(transfers.contains("t3").await);

        let mut up = alice.open_transfer("t3", Role::Sender).await.unwrap();
        up.send_chunk(FileChunk {
            transfer_id: "t3".to_string(),
            data: b"early".to_vec(),
            chunk_number: 0,
            is_last: false,
        })
        .await
        .unwrap();

        // Let chunk 0 be relayed before bob attaches
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut down = bob.open_transfer("t3", Role::Receiver).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        up.send_chunk(FileChunk {
            transfer_id: "t3".to_string(),
            data: b"late".to_vec(),
            chunk_number: 1,
            is_last: false,
        })
        .await
        .unwrap();
        up.send_chunk(FileChunk {
            transfer_id: "t3".to_string(),
            data: Vec::new(),
            chunk_number: 2,
            is_last: true,
        })
        .await
        .unwrap();

        // Bob observes a strict suffix ending with the terminal chunk
        let first = timeout(WAIT, down.recv_chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(first.chunk_number >= 1);

        let mut last = first;
        while !last.is_last {
            last = timeout(WAIT, down.recv_chunk())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
        }
        assert_eq!(last.chunk_number, 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!transfers.contains("t3").await);
    }

    #[tokio::test]
    async fn test_join_with_empty_sender_is_rejected() {
        let (addr, _transfers) = start_hub().await;

        let client = connect(addr).await;
        let (_room, mut rx) = client.join("r1", "").await.unwrap();

        let rejection = next_envelope(&mut rx).await;
        assert_eq!(rejection.sender, SERVER_SENDER);
        let reason = command_value(&rejection, CommandKind::Error);
        assert!(reason.contains("sender"));

        assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_join_then_disconnect_restores_registry() {
        let (addr, _transfers) = start_hub().await;

        let mut alice = connect(addr).await;
        let (_room, mut rx) = alice.join("ghost-room", "alice").await.unwrap();
        next_envelope(&mut rx).await; // welcome
        alice.disconnect();

        // Give the hub a moment to observe the broken stream and release
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The room disappears once its only member is gone, so the same
        // username is admitted again
        let probe = connect(addr).await;
        let (_probe_room, mut probe_rx) = probe.join("ghost-room", "alice").await.unwrap();
        let welcome = next_envelope(&mut probe_rx).await;
        command_value(&welcome, CommandKind::Welcome);
    }
}
