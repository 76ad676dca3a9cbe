//! Room membership and fan-out for the conference hub
//!
//! This module handles server-side room state: admission with username
//! uniqueness, the dual membership views, broadcast fan-out and private
//! message routing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::current_timestamp;
use crate::error::{HubError, Result};
use crate::protocol::messages::{CommandKind, Envelope, Payload, TextMessage};

/// Depth of each participant's bounded outbound queue
pub const OUTBOUND_QUEUE_DEPTH: usize = 100;

/// A connected participant, member of exactly one room
#[derive(Debug)]
pub struct Participant {
    /// Username in the casing the participant chose
    pub username: String,
    /// Transport address identifying the participant's main stream
    pub addr: String,
    /// Room the participant belongs to
    pub room_id: String,
    /// Bounded outbound queue; fan-out never blocks on it
    outbound: mpsc::Sender<Envelope>,
}

impl Participant {
    /// Create a participant and the receiving half of its outbound queue
    pub fn new(
        username: impl Into<String>,
        addr: impl Into<String>,
        room_id: impl Into<String>,
        queue_depth: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let participant = Arc::new(Self {
            username: username.into(),
            addr: addr.into(),
            room_id: room_id.into(),
            outbound: tx,
        });
        (participant, rx)
    }

    /// Case-insensitive key for the username membership view
    pub fn username_key(&self) -> String {
        self.username.to_lowercase()
    }

    /// Enqueue an envelope without blocking; returns false when the queue
    /// is full or the participant is gone
    pub fn enqueue(&self, envelope: Envelope) -> bool {
        self.outbound.try_send(envelope).is_ok()
    }
}

/// Both membership views, kept mutually consistent under the room lock
#[derive(Debug, Default)]
struct Members {
    /// Keyed by transport address
    by_addr: HashMap<String, Arc<Participant>>,
    /// Keyed by lowercased username
    by_name: HashMap<String, Arc<Participant>>,
}

/// A conference room
#[derive(Debug)]
pub struct Room {
    /// Room id
    pub id: String,
    /// Membership; admission and release take the write lock, fan-out the
    /// read lock
    members: RwLock<Members>,
}

impl Room {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: RwLock::new(Members::default()),
        }
    }

    /// Admit a participant, enforcing case-insensitive username uniqueness
    pub async fn admit(&self, participant: Arc<Participant>) -> Result<()> {
        let mut members = self.members.write().await;
        let key = participant.username_key();
        if members.by_name.contains_key(&key) {
            return Err(HubError::already_exists(format!(
                "username '{}' is already taken",
                key
            )));
        }
        members
            .by_addr
            .insert(participant.addr.clone(), Arc::clone(&participant));
        members.by_name.insert(key, participant);
        Ok(())
    }

    /// Remove a participant from both views; returns false when it was
    /// already gone
    pub async fn release(&self, participant: &Participant) -> bool {
        let mut members = self.members.write().await;
        let removed = members.by_addr.remove(&participant.addr).is_some();
        if removed {
            members.by_name.remove(&participant.username_key());
        }
        removed
    }

    /// Enqueue a copy of the envelope to every member except the excluded
    /// address. A full queue drops the message for that member only.
    pub async fn broadcast(&self, envelope: Envelope, exclude_addr: Option<&str>) {
        let members = self.members.read().await;
        for (addr, member) in members.by_addr.iter() {
            if Some(addr.as_str()) == exclude_addr {
                continue;
            }
            if !member.enqueue(envelope.clone()) {
                warn!(
                    "Dropped message for participant '{}' in room '{}', queue full",
                    member.username, self.id
                );
            }
        }
    }

    /// Route a private message to the named recipient, rewriting the content
    /// to make the origin explicit. On miss, an error notice goes back to
    /// the sender instead.
    pub async fn send_private(&self, from: &Participant, recipient: &str, content: &str) {
        let members = self.members.read().await;
        match members.by_name.get(&recipient.to_lowercase()) {
            Some(target) => {
                let forwarded = Envelope {
                    sender: from.username.clone(),
                    room_id: self.id.clone(),
                    payload: Payload::Text(TextMessage {
                        content: format!("(private from {}) {}", from.username, content),
                        timestamp: current_timestamp(),
                        trace_id: None,
                    }),
                };
                if !target.enqueue(forwarded) {
                    warn!(
                        "Dropped private message for '{}' in room '{}', queue full",
                        target.username, self.id
                    );
                }
                debug!(
                    "Relayed private message from '{}' to '{}'",
                    from.username, target.username
                );
            }
            None => {
                let not_found = Envelope::command(
                    &self.id,
                    CommandKind::Error,
                    format!("User '{}' not found in this room.", recipient),
                );
                let _ = from.enqueue(not_found);
                debug!(
                    "Failed to relay private message from '{}': user '{}' not found",
                    from.username, recipient
                );
            }
        }
    }

    /// Deliver an envelope to a single member by username
    pub async fn notify(&self, username: &str, envelope: Envelope) -> bool {
        let members = self.members.read().await;
        match members.by_name.get(&username.to_lowercase()) {
            Some(target) => target.enqueue(envelope),
            None => false,
        }
    }

    /// Get member count
    pub async fn member_count(&self) -> usize {
        self.members.read().await.by_addr.len()
    }

    /// Check whether the room has no members left
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.by_addr.is_empty()
    }

    /// Current usernames, in their original casing
    pub async fn member_names(&self) -> Vec<String> {
        let members = self.members.read().await;
        members
            .by_name
            .values()
            .map(|m| m.username.clone())
            .collect()
    }
}

/// Registry owning all rooms, created lazily and destroyed when empty
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the room and admit the participant. Creation and
    /// admission happen under the registry write lock so a concurrent
    /// detach emptying the room cannot lose the new member.
    pub async fn attach(&self, participant: Arc<Participant>) -> Result<Arc<Room>> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(participant.room_id.clone())
            .or_insert_with(|| Arc::new(Room::new(participant.room_id.clone())))
            .clone();
        room.admit(participant).await?;
        Ok(room)
    }

    /// Release the participant from its room. When the room becomes empty
    /// it is removed; otherwise the remaining members get a user-left
    /// notice. Safe to call more than once.
    pub async fn detach(&self, participant: &Participant) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(&participant.room_id).cloned() else {
            return;
        };
        if !room.release(participant).await {
            return;
        }
        if room.is_empty().await {
            rooms.remove(&participant.room_id);
            info!("Room '{}' is empty and deleted", participant.room_id);
        } else {
            room.broadcast(
                Envelope::command(
                    &participant.room_id,
                    CommandKind::UserLeft,
                    &participant.username,
                ),
                None,
            )
            .await;
        }
    }

    /// Look up a room by id
    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Get room count
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
