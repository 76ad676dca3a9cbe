//! Palaver - Real-Time Multi-Room Conference Hub
//!
//! This library provides a QUIC conference server that relays text, audio
//! frames and file data among participants organized into named rooms.
//!
//! ## Architecture
//!
//! A single QUIC endpoint carries four logical surfaces, each on a
//! client-initiated bidirectional stream classified by its first frame:
//!
//! - **Join** (long-lived): heterogeneous envelopes in both directions
//! - **RequestFileTransfer** (unary): registers the transfer rendezvous
//! - **RespondFileTransfer** (unary): resolves the rendezvous
//! - **TransferFile** (long-lived): bulk chunk relay, point-to-point or
//!   broadcast
//!
//! ## Example
//!
//! ```rust,ignore
//! use palaver::{HubConfig, HubServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = HubServer::new(HubConfig::default());
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

// Re-export error types
pub use error::{HubError, Result};

// Re-export protocol types
pub use protocol::{
    // Codec traits
    Decodable,
    DecodedMessage,
    Encodable,
    // Frame types
    Frame,
    FrameCodec,
    FrameType,
    // Message types
    messages::{
        AudioFrame,
        Command,
        CommandKind,
        Envelope,
        FILE_NOTICE_SENDER,
        FileAnnouncement,
        FileChunk,
        FileRequestNotice,
        Payload,
        PrivateMessage,
        Role,
        SERVER_SENDER,
        TextMessage,
        TransferOpen,
        TransferRequest,
        TransferResponse,
        WireError,
        parse_file_request_notice,
    },
};

// Re-export server types
pub use server::{HubConfig, HubServer, Participant, Room, RoomRegistry, TransferRegistry};

// Re-export client types
pub use client::{HubClient, HubClientConfig, RoomSession, TransferStream};

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a unique transfer ID
pub fn generate_transfer_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HubConfig::default();
        assert_eq!(config.bind_addr.port(), 50051);
        assert_eq!(config.response_window.as_secs(), 60);
        assert_eq!(config.attach_window.as_secs(), 30);
    }

    #[test]
    fn test_transfer_id_uniqueness() {
        let a = generate_transfer_id();
        let b = generate_transfer_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_timestamp_monotone_enough() {
        let t1 = current_timestamp();
        let t2 = current_timestamp();
        assert!(t2 >= t1);
        assert!(t1 > 0);
    }
}
