//! The event bus that lets a single core task own all mutable state.
//!
//! Per the design notes ("prefer message-passing or a single owning task
//! that multiplexes events ... via a channel"), every asynchronous
//! producer — the discovery listener, each per-connection reader, the
//! view's user intents — reports through `CoreEvent` instead of reaching
//! into shared state directly. [`crate::runtime`] is the sole consumer.

use crate::controller::Intent;
use crate::net::discovery::PeerObserved;
use crate::protocol::Envelope;

#[derive(Debug)]
pub enum CoreEvent {
    /// A beacon from a peer we haven't necessarily connected to yet.
    PeerObserved(PeerObserved),
    /// A TCP session's handshake completed (inbound or outbound).
    PeerConnected { id: String, ip: String, tcp_port: u16, username: String },
    /// A TCP session ended (read error, EOF, or replaced by a newer one).
    PeerDisconnected { id: String },
    /// A fully-framed message arrived on an established connection.
    FrameReceived { from: String, envelope: Envelope },
    /// A user intent forwarded by the controller (§4.8).
    UserIntent(Intent),
    /// A periodic wakeup driving timers: election deadlines, the
    /// heartbeat/playback-sync loop, pending-buffer sweep, listener-side
    /// position extrapolation.
    Tick(std::time::Instant),
}
