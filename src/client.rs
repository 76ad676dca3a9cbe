//! QUIC-based conference hub client
//!
//! This module provides a client for the four hub surfaces: the long-lived
//! Join stream, the unary transfer request/response exchanges, and the bulk
//! transfer stream. It exists as the boundary interface of the hub; user
//! interfaces, audio capture and file I/O stay with the callers.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{ClientConfig as QuinnClientConfig, Connection, Endpoint, RecvStream, SendStream};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{HubError, Result};
use crate::protocol::codec::{Decodable, Encodable};
use crate::protocol::frame::{FrameCodec, FrameType};
use crate::protocol::messages::{
    AudioFrame, Envelope, FileAnnouncement, FileChunk, Payload, PrivateMessage, Role,
    TransferOpen, TransferRequest, TransferResponse, WireError,
};
use crate::server::hub::ALPN;
use crate::transport::{read_frame, write_message};

const READ_BUF: usize = 64 * 1024;

/// Hub client configuration
#[derive(Clone, Debug)]
pub struct HubClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Client bind address (use 0.0.0.0:0 for auto)
    pub bind_addr: SocketAddr,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for HubClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:50051".parse().expect("static address"),
            bind_addr: "0.0.0.0:0".parse().expect("static address"),
            connect_timeout_secs: 10,
        }
    }
}

/// QUIC-based conference hub client
pub struct HubClient {
    config: HubClientConfig,
    connection: Option<Connection>,
    endpoint: Option<Endpoint>,
}

impl HubClient {
    /// Create a new client with the given configuration
    pub fn new(config: HubClientConfig) -> Self {
        Self {
            config,
            connection: None,
            endpoint: None,
        }
    }

    /// Connect to the hub
    pub async fn connect(&mut self) -> Result<()> {
        info!("Connecting to conference hub at {}", self.config.server_addr);

        let client_config = self.configure_client()?;

        let mut endpoint = Endpoint::client(self.config.bind_addr)
            .map_err(|e| HubError::network(format!("Failed to create endpoint: {}", e)))?;
        endpoint.set_default_client_config(client_config);

        let connecting = endpoint
            .connect(self.config.server_addr, "localhost")
            .map_err(|e| HubError::connection(format!("Failed to initiate connection: {}", e)))?;

        let connection = tokio::time::timeout(
            std::time::Duration::from_secs(self.config.connect_timeout_secs),
            connecting,
        )
        .await
        .map_err(|_| HubError::deadline_exceeded("Connection timeout"))?
        .map_err(|e| HubError::connection(format!("Failed to connect: {}", e)))?;

        self.endpoint = Some(endpoint);
        self.connection = Some(connection);
        Ok(())
    }

    /// Configure the QUIC client
    fn configure_client(&self) -> Result<QuinnClientConfig> {
        // The hub presents a throwaway self-signed certificate, so the
        // development client skips verification entirely
        let mut crypto = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(TrustAnyServerCert))
            .with_no_client_auth();

        // Set ALPN protocol to match server
        crypto.alpn_protocols = vec![ALPN.to_vec()];

        Ok(QuinnClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| HubError::config(format!("Failed to create QUIC config: {}", e)))?,
        )))
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .ok_or_else(|| HubError::connection("Not connected to hub"))
    }

    /// Join a room. Returns a session for sending and a receiver of every
    /// envelope the hub delivers, starting with the welcome notice.
    pub async fn join(
        &self,
        room_id: impl Into<String>,
        username: impl Into<String>,
    ) -> Result<(RoomSession, mpsc::UnboundedReceiver<Envelope>)> {
        let room_id = room_id.into();
        let username = username.into();

        let (mut send, mut recv) = self.connection()?.open_bi().await?;

        // The first envelope identifies the participant; its payload is not
        // dispatched by the hub
        write_message(&mut send, &Envelope::text(&username, &room_id, "")).await?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut codec = FrameCodec::new();
            let mut buf = vec![0u8; READ_BUF];
            loop {
                match read_frame(&mut recv, &mut codec, &mut buf).await {
                    Ok(Some(frame)) => match Envelope::decode_frame(&frame) {
                        Ok(envelope) => {
                            if event_tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("Failed to parse envelope: {}", e);
                            break;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Join stream ended: {}", e);
                        break;
                    }
                }
            }
        });

        Ok((
            RoomSession {
                send,
                username,
                room_id,
            },
            event_rx,
        ))
    }

    /// Request a point-to-point file transfer and await the arbitration
    /// outcome
    pub async fn request_transfer(&self, req: TransferRequest) -> Result<TransferResponse> {
        self.unary(&req).await
    }

    /// Answer a pending transfer request; the hub echoes the response back
    pub async fn respond_transfer(&self, resp: TransferResponse) -> Result<TransferResponse> {
        self.unary(&resp).await
    }

    /// Open a transfer stream in the given role
    pub async fn open_transfer(
        &self,
        transfer_id: impl Into<String>,
        role: Role,
    ) -> Result<TransferStream> {
        let (mut send, recv) = self.connection()?.open_bi().await?;
        write_message(
            &mut send,
            &TransferOpen {
                transfer_id: transfer_id.into(),
                role,
            },
        )
        .await?;

        Ok(TransferStream {
            send,
            recv,
            codec: FrameCodec::new(),
            buf: vec![0u8; READ_BUF],
        })
    }

    /// One-request, one-response exchange on a fresh stream
    async fn unary<T: Encodable, R: Decodable>(&self, msg: &T) -> Result<R> {
        let (mut send, mut recv) = self.connection()?.open_bi().await?;
        write_message(&mut send, msg).await?;
        let _ = send.finish();

        let mut codec = FrameCodec::new();
        let mut buf = vec![0u8; 8 * 1024];
        let frame = read_frame(&mut recv, &mut codec, &mut buf)
            .await?
            .ok_or_else(|| HubError::unavailable("Hub closed the stream without a response"))?;

        if frame.frame_type == FrameType::Error {
            let err = WireError::decode_frame(&frame)
                .map_err(|e| HubError::serialization(format!("Invalid error frame: {}", e)))?;
            return Err(HubError::from_code(err.code, err.message));
        }

        R::decode_frame(&frame)
            .map_err(|e| HubError::serialization(format!("Invalid response frame: {}", e)))
    }

    /// Disconnect from the hub
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close(0u32.into(), b"Client disconnect");
            info!("Disconnected from conference hub");
        }
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"Client shutdown");
        }
    }

    /// Check if connected to the hub
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

/// Sending half of a joined room
pub struct RoomSession {
    send: SendStream,
    /// Username this session joined with
    pub username: String,
    /// Room this session belongs to
    pub room_id: String,
}

impl RoomSession {
    /// Send a chat text to the room
    pub async fn send_text(&mut self, content: impl Into<String>) -> Result<()> {
        let envelope = Envelope::text(&self.username, &self.room_id, content);
        write_message(&mut self.send, &envelope).await
    }

    /// Send a private message to a named participant
    pub async fn send_private(
        &mut self,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<()> {
        let envelope = Envelope {
            sender: self.username.clone(),
            room_id: self.room_id.clone(),
            payload: Payload::Private(PrivateMessage {
                recipient: recipient.into(),
                content: content.into(),
            }),
        };
        write_message(&mut self.send, &envelope).await
    }

    /// Send an opaque audio frame to the room
    pub async fn send_audio(&mut self, data: Vec<u8>) -> Result<()> {
        let envelope = Envelope {
            sender: self.username.clone(),
            room_id: self.room_id.clone(),
            payload: Payload::Audio(AudioFrame { data }),
        };
        write_message(&mut self.send, &envelope).await
    }

    /// Announce a broadcast file transfer to the room. The announcer should
    /// attach as sender right after.
    pub async fn announce_file(
        &mut self,
        filename: impl Into<String>,
        size: u64,
        transfer_id: impl Into<String>,
    ) -> Result<()> {
        let envelope = Envelope {
            sender: self.username.clone(),
            room_id: self.room_id.clone(),
            payload: Payload::FileAnnouncement(FileAnnouncement {
                filename: filename.into(),
                size,
                transfer_id: transfer_id.into(),
            }),
        };
        write_message(&mut self.send, &envelope).await
    }

    /// Leave the room by finishing the stream
    pub fn leave(mut self) {
        let _ = self.send.finish();
    }
}

/// An attached transfer stream, usable in either role
pub struct TransferStream {
    send: SendStream,
    recv: RecvStream,
    codec: FrameCodec,
    buf: Vec<u8>,
}

impl TransferStream {
    /// Send one chunk (sender role)
    pub async fn send_chunk(&mut self, chunk: FileChunk) -> Result<()> {
        write_message(&mut self.send, &chunk).await
    }

    /// Signal that no further chunks follow
    pub fn finish(&mut self) {
        let _ = self.send.finish();
    }

    /// Receive the next chunk (receiver role). Returns Ok(None) on a clean
    /// end of stream; hub-reported failures surface as errors.
    pub async fn recv_chunk(&mut self) -> Result<Option<FileChunk>> {
        let frame = match read_frame(&mut self.recv, &mut self.codec, &mut self.buf).await? {
            Some(frame) => frame,
            None => return Ok(None),
        };

        if frame.frame_type == FrameType::Error {
            let err = WireError::decode_frame(&frame)
                .map_err(|e| HubError::serialization(format!("Invalid error frame: {}", e)))?;
            return Err(HubError::from_code(err.code, err.message));
        }

        let chunk = FileChunk::decode_frame(&frame)
            .map_err(|e| HubError::serialization(format!("Invalid chunk frame: {}", e)))?;
        Ok(Some(chunk))
    }
}

/// Verifier that trusts whatever certificate the hub presents. The hub mints
/// a fresh self-signed certificate on every start, so there is nothing to
/// pin against; do not point this client at a hub you do not control.
#[derive(Debug)]
struct TrustAnyServerCert;

impl ServerCertVerifier for TrustAnyServerCert {
    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ED25519,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }

    fn verify_server_cert(
        &self,
        _cert: &CertificateDer<'_>,
        _chain: &[CertificateDer<'_>],
        _host: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = HubClientConfig::default();
        assert_eq!(config.server_addr.port(), 50051);
        assert_eq!(config.bind_addr.port(), 0);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_client_creation() {
        let config = HubClientConfig::default();
        let client = HubClient::new(config.clone());

        assert_eq!(client.config.server_addr, config.server_addr);
        assert!(client.connection.is_none());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_client_disconnect_when_not_connected() {
        let mut client = HubClient::new(HubClientConfig::default());
        client.disconnect();
        assert!(!client.is_connected());
    }
}
