//! Per-participant dispatcher for the main conference stream
//!
//! One dispatcher runs per Join stream. It validates the identifying first
//! envelope, admits the participant into its room, then runs two concurrent
//! duties: the inbound loop classifying payload variants, and the outbound
//! drain moving queued envelopes onto the wire.

use std::sync::Arc;

use quinn::{RecvStream, SendStream};
use tracing::{debug, info, warn};

use crate::error::{HubError, Result};
use crate::protocol::codec::Decodable;
use crate::protocol::frame::{FrameCodec, FrameType};
use crate::protocol::messages::{CommandKind, Envelope, Payload};
use crate::server::room::{OUTBOUND_QUEUE_DEPTH, Participant, Room, RoomRegistry};
use crate::server::transfer::TransferRegistry;
use crate::transport::{read_frame, write_message};

const READ_BUF: usize = 8 * 1024;

/// Run a participant session on an accepted Join stream. The first envelope
/// has already been read by the stream classifier; `codec` carries any bytes
/// read past it.
pub async fn run(
    rooms: Arc<RoomRegistry>,
    transfers: Arc<TransferRegistry>,
    addr: String,
    first: Envelope,
    mut send: SendStream,
    recv: RecvStream,
    codec: FrameCodec,
) -> Result<()> {
    if first.sender.is_empty() || first.room_id.is_empty() {
        let err = HubError::invalid_argument("room_id and sender must be provided");
        let reject = Envelope::server_error(&first.room_id, err.message());
        let _ = write_message(&mut send, &reject).await;
        let _ = send.finish();
        return Err(err);
    }

    let (participant, mut outbound_rx) =
        Participant::new(&first.sender, &addr, &first.room_id, OUTBOUND_QUEUE_DEPTH);

    let room = match rooms.attach(Arc::clone(&participant)).await {
        Ok(room) => room,
        Err(e) => {
            warn!(
                "Participant '{}' failed to join room '{}': {}",
                first.sender, first.room_id, e
            );
            let reject = Envelope::server_error(&first.room_id, e.message());
            let _ = write_message(&mut send, &reject).await;
            let _ = send.finish();
            return Ok(());
        }
    };

    info!(
        "Participant '{}' ({}) joined room '{}'",
        participant.username, participant.addr, room.id
    );

    // Announce the newcomer to the others, then welcome the newcomer
    room.broadcast(
        Envelope::command(&room.id, CommandKind::UserJoined, &participant.username),
        Some(&participant.addr),
    )
    .await;
    participant.enqueue(Envelope::command(
        &room.id,
        CommandKind::Welcome,
        format!("Welcome to room '{}'", room.id),
    ));

    // Outbound drain: queue -> stream. A send error ends the drain; the
    // inbound duty then observes the broken stream and releases.
    let drain = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if let Err(e) = write_message(&mut send, &envelope).await {
                debug!("Outbound send failed: {}", e);
                return;
            }
        }
        let _ = send.finish();
    });

    let result = inbound_loop(&transfers, &participant, &room, recv, codec).await;

    // Release exactly once; the registry tears the room down when empty
    rooms.detach(&participant).await;
    info!(
        "Participant '{}' left room '{}'",
        participant.username, participant.room_id
    );

    // Dropping our handle closes the queue so the drain can finish flushing
    drop(participant);
    let _ = drain.await;

    result
}

/// Receive envelopes and dispatch them by payload variant until the stream
/// ends
async fn inbound_loop(
    transfers: &Arc<TransferRegistry>,
    participant: &Arc<Participant>,
    room: &Arc<Room>,
    mut recv: RecvStream,
    mut codec: FrameCodec,
) -> Result<()> {
    let mut buf = vec![0u8; READ_BUF];

    loop {
        let frame = match read_frame(&mut recv, &mut codec, &mut buf).await? {
            Some(frame) => frame,
            None => return Ok(()),
        };

        if frame.frame_type != FrameType::Envelope {
            warn!(
                "Unexpected {:?} frame on main stream from '{}'",
                frame.frame_type, participant.username
            );
            continue;
        }

        let mut envelope = Envelope::decode_frame(&frame)
            .map_err(|e| HubError::protocol(format!("Invalid envelope: {}", e)))?;

        // The session identity wins over whatever the client wrote
        envelope.sender = participant.username.clone();
        envelope.room_id = room.id.clone();

        match &envelope.payload {
            Payload::Private(pm) => {
                let (recipient, content) = (pm.recipient.clone(), pm.content.clone());
                room.send_private(participant, &recipient, &content).await;
            }
            Payload::FileAnnouncement(ann) => {
                info!(
                    "File announcement from '{}' in room '{}' for '{}'",
                    participant.username, room.id, ann.filename
                );
                transfers.register_broadcast(&ann.transfer_id).await;
                room.broadcast(envelope, Some(&participant.addr)).await;
            }
            Payload::Command(cmd) => {
                // Control commands are server-originated only
                debug!(
                    "Ignoring {:?} command from participant '{}'",
                    cmd.kind, participant.username
                );
            }
            Payload::Text(_) | Payload::Audio(_) => {
                room.broadcast(envelope, Some(&participant.addr)).await;
            }
        }
    }
}
