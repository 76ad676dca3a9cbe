//! Protocol message types for the conference hub
//!
//! All message payloads that can be serialized/deserialized within frames.
//! Uses serde for JSON serialization (can be swapped for protobuf/flatbuffers).

use serde::{Deserialize, Serialize};

use crate::current_timestamp;

/// Reserved sender identity for server-originated control envelopes
pub const SERVER_SENDER: &str = "Server";

/// Reserved sender identity for the in-text file-request notification
pub const FILE_NOTICE_SENDER: &str = "Sistema-FileTransfer";

/// Prefix of the legacy file-request sentinel carried over the text path
pub const FILE_REQUEST_PREFIX: &str = "FILE_REQUEST:";

// =============================================================================
// Main stream: Envelope and payload variants
// =============================================================================

/// Top-level framed unit on the main conference stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating username (reserved identities for server notices)
    pub sender: String,
    /// Room this envelope belongs to
    pub room_id: String,
    /// Exactly one payload variant
    pub payload: Payload,
}

/// Discriminated payload union; exactly one variant is present per envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Payload {
    /// Room-wide chat text
    Text(TextMessage),
    /// Point-to-point message routed by username
    Private(PrivateMessage),
    /// Opaque audio frame, relayed without interpretation
    Audio(AudioFrame),
    /// Announcement of a broadcast file transfer
    FileAnnouncement(FileAnnouncement),
    /// Control command; server-originated, ignored when sent by a client
    Command(Command),
}

/// Chat text payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMessage {
    /// Message content
    pub content: String,
    /// Timestamp (Unix ms)
    pub timestamp: u64,
    /// Optional client-assigned trace id
    pub trace_id: Option<String>,
}

/// Private message payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateMessage {
    /// Recipient username
    pub recipient: String,
    /// Message content
    pub content: String,
}

/// Opaque audio frame (typically raw PCM; the server does not interpret it)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Raw sample bytes
    pub data: Vec<u8>,
}

/// Broadcast file transfer announcement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnnouncement {
    /// File name as announced by the sender
    pub filename: String,
    /// Total size in bytes
    pub size: u64,
    /// Transfer id receivers attach with
    pub transfer_id: String,
}

/// Control command payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Command kind
    pub kind: CommandKind,
    /// Command value (username, welcome text, error reason)
    pub value: String,
}

/// Control command kinds emitted by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Welcome,
    UserJoined,
    UserLeft,
    Error,
    /// Forward-compatibility catch-all for unrecognized kinds
    #[serde(other)]
    Unknown,
}

impl Envelope {
    /// Create a text envelope from a participant
    pub fn text(sender: impl Into<String>, room_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            room_id: room_id.into(),
            payload: Payload::Text(TextMessage {
                content: content.into(),
                timestamp: current_timestamp(),
                trace_id: None,
            }),
        }
    }

    /// Create a server command envelope with the reserved `Server` sender
    pub fn command(room_id: impl Into<String>, kind: CommandKind, value: impl Into<String>) -> Self {
        Self {
            sender: SERVER_SENDER.to_string(),
            room_id: room_id.into(),
            payload: Payload::Command(Command {
                kind,
                value: value.into(),
            }),
        }
    }

    /// Create a server error command envelope
    pub fn server_error(room_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::command(room_id, CommandKind::Error, reason)
    }

    /// Create the in-text file-request notification envelope
    pub fn file_request_notice(req: &TransferRequest) -> Self {
        Self {
            sender: FILE_NOTICE_SENDER.to_string(),
            room_id: req.room_id.clone(),
            payload: Payload::Text(TextMessage {
                content: format!(
                    "{}{}:{}:{}:{}:{}",
                    FILE_REQUEST_PREFIX,
                    req.transfer_id,
                    req.sender,
                    req.filename,
                    req.size,
                    req.timestamp
                ),
                timestamp: current_timestamp(),
                trace_id: None,
            }),
        }
    }
}

// =============================================================================
// File transfer arbitration
// =============================================================================

/// Request to start a point-to-point file transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Transfer id (UUID)
    pub transfer_id: String,
    /// Source username
    pub sender: String,
    /// Destination username
    pub recipient: String,
    /// Room both participants belong to
    pub room_id: String,
    /// File name
    pub filename: String,
    /// Total size in bytes
    pub size: u64,
    /// Request timestamp (Unix ms)
    pub timestamp: u64,
}

/// Response resolving a transfer request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResponse {
    /// Transfer id being answered
    pub transfer_id: String,
    /// Whether the destination accepted
    pub accepted: bool,
    /// Responding username
    pub sender: String,
    /// Original requester
    pub recipient: String,
    /// Room id
    pub room_id: String,
}

impl TransferResponse {
    /// Response produced when the arbitration window elapses
    pub fn rejected(transfer_id: impl Into<String>) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            accepted: false,
            sender: String::new(),
            recipient: String::new(),
            room_id: String::new(),
        }
    }
}

// =============================================================================
// Bulk transfer stream
// =============================================================================

/// Role of a transfer stream attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(Role::Sender),
            "receiver" => Ok(Role::Receiver),
            other => Err(crate::error::HubError::invalid_argument(format!(
                "unknown role '{}'",
                other
            ))),
        }
    }
}

/// First frame on a transfer stream, declaring id and role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOpen {
    /// Transfer id to attach to
    pub transfer_id: String,
    /// Declared role
    pub role: Role,
}

/// One relayed chunk of a transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunk {
    /// Transfer this chunk belongs to
    pub transfer_id: String,
    /// Opaque chunk bytes (empty for the terminal chunk)
    pub data: Vec<u8>,
    /// Monotone chunk index, carried through opaquely
    pub chunk_number: u32,
    /// Terminal flag; once true, no further chunks follow
    pub is_last: bool,
}

// =============================================================================
// Error surface for unary exchanges
// =============================================================================

/// Error frame payload for the arbitration surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    /// Error code, mirrors `HubError::code`
    pub code: u32,
    /// Human-readable message
    pub message: String,
}

impl WireError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&crate::error::HubError> for WireError {
    fn from(err: &crate::error::HubError) -> Self {
        Self::new(err.code(), err.message())
    }
}

// =============================================================================
// Legacy sentinel parsing (client notification path)
// =============================================================================

/// Parsed form of the `FILE_REQUEST:...` sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequestNotice {
    pub transfer_id: String,
    pub sender: String,
    pub filename: String,
    pub size: u64,
    pub timestamp: u64,
}

/// Parse the legacy `FILE_REQUEST:<id>:<source>:<filename>:<size>:<timestamp>`
/// sentinel. The filename may itself contain `:`; the fixed fields are split
/// off from both ends.
pub fn parse_file_request_notice(content: &str) -> Option<FileRequestNotice> {
    let rest = content.strip_prefix(FILE_REQUEST_PREFIX)?;

    let (transfer_id, rest) = rest.split_once(':')?;
    let (sender, rest) = rest.split_once(':')?;
    let (rest, timestamp) = rest.rsplit_once(':')?;
    let (filename, size) = rest.rsplit_once(':')?;

    if transfer_id.is_empty() || sender.is_empty() || filename.is_empty() {
        return None;
    }

    Some(FileRequestNotice {
        transfer_id: transfer_id.to_string(),
        sender: sender.to_string(),
        filename: filename.to_string(),
        size: size.parse().ok()?,
        timestamp: timestamp.parse().ok()?,
    })
}
