//! Frame I/O over QUIC streams
//!
//! Thin helpers shared by the server and the client for moving typed
//! messages across quinn streams. A `FrameCodec` travels with each receive
//! stream so bytes read past one frame are not lost between readers.

use quinn::{RecvStream, SendStream};

use crate::error::{HubError, Result};
use crate::protocol::codec::Encodable;
use crate::protocol::frame::{Frame, FrameCodec};

/// Read the next complete frame, feeding the codec from the stream as
/// needed. Returns Ok(None) on a clean end of stream.
pub async fn read_frame(
    recv: &mut RecvStream,
    codec: &mut FrameCodec,
    buf: &mut [u8],
) -> Result<Option<Frame>> {
    loop {
        if let Some(frame) = codec
            .decode_next()
            .map_err(|e| HubError::protocol(format!("Frame decode error: {}", e)))?
        {
            return Ok(Some(frame));
        }

        match recv.read(buf).await? {
            Some(n) => codec.feed(&buf[..n]),
            None => return Ok(None),
        }
    }
}

/// Encode a raw frame and write it to the stream
pub async fn write_frame(send: &mut SendStream, frame: &Frame) -> Result<()> {
    send.write_all(&frame.encode_to_bytes()).await?;
    Ok(())
}

/// Encode a typed message as a frame and write it to the stream
pub async fn write_message<T: Encodable>(send: &mut SendStream, msg: &T) -> Result<()> {
    let frame = msg
        .encode_frame()
        .map_err(|e| HubError::serialization(format!("Failed to encode frame: {}", e)))?;
    write_frame(send, &frame).await
}
