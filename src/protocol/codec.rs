//! Codec for encoding/decoding protocol messages to/from frames
//!
//! This module provides the bridge between typed messages and binary frames.

use super::frame::{Frame, FrameType};
use super::messages::*;
use bytes::Bytes;
use std::io::{self, Error as IoError, ErrorKind};

/// Trait for messages that can be encoded to frames
pub trait Encodable {
    /// Get the frame type for this message
    fn frame_type(&self) -> FrameType;

    /// Encode the message payload to bytes
    fn encode_payload(&self) -> io::Result<Bytes>;

    /// Encode the complete frame
    fn encode_frame(&self) -> io::Result<Frame> {
        Ok(Frame::new(self.frame_type(), self.encode_payload()?))
    }
}

/// Trait for messages that can be decoded from frames
pub trait Decodable: Sized {
    /// Expected frame type for this message
    fn expected_frame_type() -> FrameType;

    /// Decode the message from a payload
    fn decode_payload(payload: &[u8]) -> io::Result<Self>;

    /// Decode from a complete frame, validating the frame type
    fn decode_frame(frame: &Frame) -> io::Result<Self> {
        if frame.frame_type != Self::expected_frame_type() {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "Expected frame type {:?}, got {:?}",
                    Self::expected_frame_type(),
                    frame.frame_type
                ),
            ));
        }
        Self::decode_payload(&frame.payload)
    }
}

/// Helper macro to implement Encodable and Decodable for a message type
macro_rules! impl_codec {
    ($type:ty, $frame_type:expr) => {
        impl Encodable for $type {
            fn frame_type(&self) -> FrameType {
                $frame_type
            }

            fn encode_payload(&self) -> io::Result<Bytes> {
                serde_json::to_vec(self)
                    .map(Bytes::from)
                    .map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }

        impl Decodable for $type {
            fn expected_frame_type() -> FrameType {
                $frame_type
            }

            fn decode_payload(payload: &[u8]) -> io::Result<Self> {
                serde_json::from_slice(payload).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }
    };
}

impl_codec!(Envelope, FrameType::Envelope);
impl_codec!(TransferRequest, FrameType::TransferRequest);
impl_codec!(TransferResponse, FrameType::TransferResponse);
impl_codec!(TransferOpen, FrameType::TransferOpen);
impl_codec!(FileChunk, FrameType::FileChunk);
impl_codec!(WireError, FrameType::Error);

/// Decode any frame into a typed message enum
#[derive(Debug, Clone)]
pub enum DecodedMessage {
    Envelope(Envelope),
    TransferRequest(TransferRequest),
    TransferResponse(TransferResponse),
    TransferOpen(TransferOpen),
    FileChunk(FileChunk),
    Error(WireError),
}

impl DecodedMessage {
    /// Decode a frame into a typed message
    pub fn decode(frame: &Frame) -> io::Result<Self> {
        let payload = &frame.payload;

        match frame.frame_type {
            FrameType::Envelope => Ok(Self::Envelope(serde_json::from_slice(payload)?)),
            FrameType::TransferRequest => {
                Ok(Self::TransferRequest(serde_json::from_slice(payload)?))
            }
            FrameType::TransferResponse => {
                Ok(Self::TransferResponse(serde_json::from_slice(payload)?))
            }
            FrameType::TransferOpen => Ok(Self::TransferOpen(serde_json::from_slice(payload)?)),
            FrameType::FileChunk => Ok(Self::FileChunk(serde_json::from_slice(payload)?)),
            FrameType::Error => Ok(Self::Error(serde_json::from_slice(payload)?)),
        }
    }

    /// Get the frame type of this message
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Envelope(_) => FrameType::Envelope,
            Self::TransferRequest(_) => FrameType::TransferRequest,
            Self::TransferResponse(_) => FrameType::TransferResponse,
            Self::TransferOpen(_) => FrameType::TransferOpen,
            Self::FileChunk(_) => FrameType::FileChunk,
            Self::Error(_) => FrameType::Error,
        }
    }
}

/// Encode a message directly to bytes (convenience function)
pub fn encode<T: Encodable>(msg: &T) -> io::Result<Bytes> {
    msg.encode_frame().map(|f| f.encode_to_bytes())
}

/// Decode a frame to a specific message type (convenience function)
pub fn decode<T: Decodable>(frame: &Frame) -> io::Result<T> {
    T::decode_frame(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let original = Envelope::text("alice", "r1", "Hello, World!");

        let frame = original.encode_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::Envelope);

        let decoded = Envelope::decode_frame(&frame).unwrap();
        assert_eq!(original.sender, decoded.sender);
        assert_eq!(original.room_id, decoded.room_id);
    }

    #[test]
    fn test_decoded_message_enum() {
        let chunk = FileChunk {
            transfer_id: "t1".to_string(),
            data: vec![1, 2, 3],
            chunk_number: 0,
            is_last: false,
        };
        let frame = chunk.encode_frame().unwrap();

        let decoded = DecodedMessage::decode(&frame).unwrap();
        assert_eq!(decoded.frame_type(), FrameType::FileChunk);

        match decoded {
            DecodedMessage::FileChunk(c) => {
                assert_eq!(c.transfer_id, "t1");
                assert_eq!(c.data, vec![1, 2, 3]);
            }
            _ => panic!("Expected FileChunk message"),
        }
    }

    #[test]
    fn test_wrong_frame_type() {
        let open = TransferOpen {
            transfer_id: "t1".to_string(),
            role: Role::Sender,
        };
        let frame = open.encode_frame().unwrap();

        // Try to decode as a chunk (wrong type)
        let result = FileChunk::decode_frame(&frame);
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_helper() {
        let resp = TransferResponse::rejected("t1");
        let bytes = encode(&resp).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn test_wire_error_encoding() {
        let err = crate::error::HubError::not_found("transfer 't1' is not registered");
        let wire = WireError::from(&err);
        let frame = wire.encode_frame().unwrap();

        let decoded = WireError::decode_frame(&frame).unwrap();
        assert_eq!(decoded.code, err.code());
        assert!(decoded.message.contains("t1"));
    }
}
