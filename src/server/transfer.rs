//! File transfer arbitration and the chunk proxy
//!
//! This module owns the transfer lifecycle: the one-shot rendezvous pairing
//! a request with its response, the attachment of sender/receiver streams,
//! and the proxy that relays chunks between them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quinn::{RecvStream, SendStream};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{HubError, Result};
use crate::protocol::codec::Decodable;
use crate::protocol::frame::FrameCodec;
use crate::protocol::messages::{
    Envelope, FileChunk, Role, TransferOpen, TransferRequest, TransferResponse, WireError,
};
use crate::server::room::RoomRegistry;
use crate::transport::{read_frame, write_message};

/// Arbitration window: a transfer without a response resolves as rejected
pub const RESPONSE_WINDOW: Duration = Duration::from_secs(60);

/// Attachment window: an accepted transfer without both streams errors out
pub const ATTACH_WINDOW: Duration = Duration::from_secs(30);

const CHUNK_READ_BUF: usize = 64 * 1024;

/// One attached end of a transfer stream. The codec carries bytes the
/// stream classifier may have read past the opening frame.
pub struct Attachment {
    pub send: SendStream,
    pub recv: RecvStream,
    pub codec: FrameCodec,
}

/// Point-to-point attachment slots; the proxy starts when both are present
#[derive(Default)]
struct P2pSlots {
    sender: Option<Attachment>,
    receiver: Option<Attachment>,
    streaming: bool,
}

/// Broadcast transfer state; receivers may come and go while relaying
struct BroadcastSlots {
    sender_attached: Mutex<bool>,
    receivers: Arc<Mutex<HashMap<String, SendStream>>>,
}

/// An active transfer after acceptance (p2p) or announcement (broadcast)
enum Transfer {
    PointToPoint(Mutex<P2pSlots>),
    Broadcast(BroadcastSlots),
}

impl Transfer {
    fn p2p() -> Self {
        Transfer::PointToPoint(Mutex::new(P2pSlots::default()))
    }

    fn broadcast() -> Self {
        Transfer::Broadcast(BroadcastSlots {
            sender_attached: Mutex::new(false),
            receivers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn is_streaming(&self) -> bool {
        match self {
            Transfer::PointToPoint(slots) => slots.lock().await.streaming,
            Transfer::Broadcast(slots) => *slots.sender_attached.lock().await,
        }
    }
}

/// Registry arbitrating transfer rendezvous and owning active transfers
pub struct TransferRegistry {
    /// One-shot rendezvous keyed by transfer id; at most one outstanding
    pending: Mutex<HashMap<String, oneshot::Sender<TransferResponse>>>,
    /// Active transfers keyed by transfer id
    active: Mutex<HashMap<String, Arc<Transfer>>>,
    response_window: Duration,
    attach_window: Duration,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::with_windows(RESPONSE_WINDOW, ATTACH_WINDOW)
    }

    /// Create a registry with custom arbitration and attachment windows
    pub fn with_windows(response_window: Duration, attach_window: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            response_window,
            attach_window,
        }
    }

    /// Register the rendezvous, notify the destination participant through
    /// the text path, and await the arbitration outcome. A missing or
    /// silent responder resolves as rejected once the window elapses.
    pub async fn request(
        self: &Arc<Self>,
        rooms: &RoomRegistry,
        req: TransferRequest,
    ) -> Result<TransferResponse> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&req.transfer_id) {
                return Err(HubError::already_exists(format!(
                    "transfer '{}' already has a pending request",
                    req.transfer_id
                )));
            }
            pending.insert(req.transfer_id.clone(), tx);
        }

        info!(
            "File request '{}' from '{}' to '{}' for '{}' ({} bytes)",
            req.transfer_id, req.sender, req.recipient, req.filename, req.size
        );

        match rooms.get(&req.room_id).await {
            Some(room) => {
                if !room
                    .notify(&req.recipient, Envelope::file_request_notice(&req))
                    .await
                {
                    debug!(
                        "Transfer '{}': recipient '{}' not reachable in room '{}'",
                        req.transfer_id, req.recipient, req.room_id
                    );
                }
            }
            None => debug!(
                "Transfer '{}': room '{}' does not exist",
                req.transfer_id, req.room_id
            ),
        }

        let outcome = tokio::time::timeout(self.response_window, rx).await;
        self.pending.lock().await.remove(&req.transfer_id);

        match outcome {
            Ok(Ok(resp)) => {
                if resp.accepted {
                    self.insert_active(req.transfer_id.clone(), Transfer::p2p())
                        .await;
                }
                Ok(resp)
            }
            // Rendezvous dropped or window elapsed: treated as rejection
            _ => {
                debug!("Transfer '{}' rejected by timeout", req.transfer_id);
                Ok(TransferResponse::rejected(req.transfer_id))
            }
        }
    }

    /// Deliver a response to the pending rendezvous; the response is echoed
    /// back to the responder on success
    pub async fn respond(&self, resp: TransferResponse) -> Result<TransferResponse> {
        let tx = self
            .pending
            .lock()
            .await
            .remove(&resp.transfer_id)
            .ok_or_else(|| {
                HubError::not_found(format!("transfer '{}' is not registered", resp.transfer_id))
            })?;

        let echo = resp.clone();
        let _ = tx.send(resp);
        Ok(echo)
    }

    /// Record a broadcast transfer announced on the main stream. The
    /// announcer is expected to attach as sender within the window.
    pub async fn register_broadcast(self: &Arc<Self>, transfer_id: &str) {
        info!("Broadcast transfer '{}' registered", transfer_id);
        self.insert_active(transfer_id.to_string(), Transfer::broadcast())
            .await;
    }

    /// Attach a transfer stream in its declared role. Either attachment
    /// order works; the proxy starts once its peer requirement is met.
    /// On failure the error is written back onto the attaching stream
    /// before it is closed.
    pub async fn attach(self: &Arc<Self>, open: TransferOpen, attachment: Attachment) -> Result<()> {
        match self.try_attach(&open, attachment).await {
            Ok(()) => Ok(()),
            Err((err, mut attachment)) => {
                let _ = write_message(&mut attachment.send, &WireError::from(&err)).await;
                let _ = attachment.send.finish();
                Err(err)
            }
        }
    }

    async fn try_attach(
        self: &Arc<Self>,
        open: &TransferOpen,
        attachment: Attachment,
    ) -> std::result::Result<(), (HubError, Attachment)> {
        let transfer = match self.active.lock().await.get(&open.transfer_id).cloned() {
            Some(transfer) => transfer,
            None => {
                return Err((
                    HubError::not_found(format!(
                        "transfer '{}' is not registered",
                        open.transfer_id
                    )),
                    attachment,
                ));
            }
        };

        match transfer.as_ref() {
            Transfer::PointToPoint(slots) => {
                let mut slots = slots.lock().await;
                match open.role {
                    Role::Sender => {
                        if slots.sender.is_some() {
                            return Err((
                                HubError::already_exists(format!(
                                    "sender for transfer '{}' already attached",
                                    open.transfer_id
                                )),
                                attachment,
                            ));
                        }
                        slots.sender = Some(attachment);
                    }
                    Role::Receiver => {
                        if slots.receiver.is_some() {
                            return Err((
                                HubError::already_exists(format!(
                                    "receiver for transfer '{}' already attached",
                                    open.transfer_id
                                )),
                                attachment,
                            ));
                        }
                        slots.receiver = Some(attachment);
                    }
                }

                if slots.sender.is_some() && slots.receiver.is_some() {
                    if let (Some(sender), Some(receiver)) =
                        (slots.sender.take(), slots.receiver.take())
                    {
                        slots.streaming = true;
                        let registry = Arc::clone(self);
                        let id = open.transfer_id.clone();
                        tokio::spawn(async move {
                            registry.run_p2p_proxy(id, sender, receiver).await;
                        });
                    }
                }
                Ok(())
            }

            Transfer::Broadcast(slots) => match open.role {
                Role::Sender => {
                    {
                        let mut attached = slots.sender_attached.lock().await;
                        if *attached {
                            return Err((
                                HubError::already_exists(format!(
                                    "broadcast sender for '{}' already exists",
                                    open.transfer_id
                                )),
                                attachment,
                            ));
                        }
                        *attached = true;
                    }
                    let registry = Arc::clone(self);
                    let receivers = Arc::clone(&slots.receivers);
                    let id = open.transfer_id.clone();
                    tokio::spawn(async move {
                        registry.run_broadcast_proxy(id, attachment, receivers).await;
                    });
                    Ok(())
                }
                Role::Receiver => {
                    slots
                        .receivers
                        .lock()
                        .await
                        .insert(Uuid::new_v4().to_string(), attachment.send);
                    Ok(())
                }
            },
        }
    }

    /// Check whether a transfer id is currently active
    pub async fn contains(&self, transfer_id: &str) -> bool {
        self.active.lock().await.contains_key(transfer_id)
    }

    /// Number of rendezvous still awaiting a response
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Insert an active transfer and arm its attachment watchdog
    async fn insert_active(self: &Arc<Self>, id: String, transfer: Transfer) {
        self.active
            .lock()
            .await
            .insert(id.clone(), Arc::new(transfer));

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(registry.attach_window).await;
            let mut active = registry.active.lock().await;
            if let Some(transfer) = active.get(&id) {
                if !transfer.is_streaming().await {
                    active.remove(&id);
                    warn!("Transfer '{}' timed out waiting for stream attachment", id);
                }
            }
        });
    }

    /// Relay chunks from the single sender to the single receiver
    async fn run_p2p_proxy(self: Arc<Self>, id: String, sender: Attachment, receiver: Attachment) {
        let result = proxy_to_one(sender, receiver).await;
        self.active.lock().await.remove(&id);
        match result {
            Ok(chunks) => info!("Transfer '{}' completed ({} chunks)", id, chunks),
            Err(e) => warn!("Transfer '{}' failed: {}", id, e),
        }
    }

    /// Relay chunks from the sender to every currently attached receiver.
    /// A failing receiver is evicted; the transfer itself keeps going.
    async fn run_broadcast_proxy(
        self: Arc<Self>,
        id: String,
        mut sender: Attachment,
        receivers: Arc<Mutex<HashMap<String, SendStream>>>,
    ) {
        let mut buf = vec![0u8; CHUNK_READ_BUF];
        let mut relayed = 0u32;

        let result = loop {
            let frame = match read_frame(&mut sender.recv, &mut sender.codec, &mut buf).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    break Err(HubError::unavailable(
                        "sender stream closed before terminal chunk",
                    ));
                }
                Err(e) => break Err(e),
            };

            let chunk = match FileChunk::decode_frame(&frame) {
                Ok(chunk) => chunk,
                Err(e) => break Err(HubError::protocol(format!("Invalid chunk: {}", e))),
            };

            let data = frame.encode_to_bytes();
            let mut sinks = receivers.lock().await;
            let mut failed = Vec::new();
            for (key, stream) in sinks.iter_mut() {
                if stream.write_all(&data).await.is_err() {
                    failed.push(key.clone());
                }
            }
            for key in failed {
                sinks.remove(&key);
                warn!("Evicted broadcast receiver from transfer '{}'", id);
            }
            drop(sinks);

            relayed += 1;
            if chunk.is_last {
                break Ok(relayed);
            }
        };

        // Close out receiver streams and retire the transfer
        let mut sinks = receivers.lock().await;
        for (_, mut stream) in sinks.drain() {
            let _ = stream.finish();
        }
        drop(sinks);
        self.active.lock().await.remove(&id);

        match result {
            Ok(chunks) => info!("Broadcast transfer '{}' completed ({} chunks)", id, chunks),
            Err(e) => warn!("Broadcast transfer '{}' failed: {}", id, e),
        }
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward chunks from one attachment to another until the terminal chunk.
/// Any read or write failure is fatal to the transfer.
async fn proxy_to_one(mut sender: Attachment, mut receiver: Attachment) -> Result<u32> {
    let mut buf = vec![0u8; CHUNK_READ_BUF];
    let mut relayed = 0u32;

    loop {
        let frame = read_frame(&mut sender.recv, &mut sender.codec, &mut buf)
            .await?
            .ok_or_else(|| HubError::unavailable("sender stream closed before terminal chunk"))?;

        let chunk = FileChunk::decode_frame(&frame)
            .map_err(|e| HubError::protocol(format!("Invalid chunk: {}", e)))?;

        receiver.send.write_all(&frame.encode_to_bytes()).await?;

        relayed += 1;
        if chunk.is_last {
            let _ = receiver.send.finish();
            return Ok(relayed);
        }
    }
}
