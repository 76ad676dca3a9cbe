//! Server side of the conference hub
//!
//! This module provides the relay engine:
//!
//! - **Hub** — the QUIC endpoint, accept loop and stream classification
//! - **Dispatcher** — per-participant inbound routing and outbound drain
//! - **Room** — membership, admission, fan-out and private routing
//! - **Transfer** — rendezvous arbitration and the chunk proxy

pub mod dispatcher;
pub mod hub;
pub mod room;
pub mod transfer;

pub use hub::{HubConfig, HubServer};
pub use room::{Participant, Room, RoomRegistry};
pub use transfer::TransferRegistry;
