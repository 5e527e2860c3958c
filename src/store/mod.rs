//! The state store: peer registry, playlist, playback state, vector
//! clock, and the causal-delivery pending buffer (§3, §4.4).
//!
//! Per the design notes, cross-thread mutable state is better modeled as
//! a single owning task that multiplexes every event — discovery,
//! per-peer reads, timers — through a channel, mutating the store inside
//! that task. `StateStore` is therefore a plain `&mut self` API with no
//! internal locking: the single core task in [`crate::runtime`] is its
//! only owner, which is the ownership-typed equivalent of the "one mutex,
//! short critical sections" rule in §5.

pub mod clock;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::{Envelope, MessageKind, PlaybackSnapshot, RepeatMode, Track};
use clock::VectorClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Alive,
    Dead,
}

/// `{ id, ip, tcp_port, status }` (§3). A peer id appears at most once.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: String,
    pub ip: String,
    pub tcp_port: u16,
    pub status: PeerStatus,
}

/// Authoritative on the Host; a lagging copy on every other peer (§3).
#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub current_track: Option<Track>,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub is_playing: bool,
    pub shuffle: bool,
    pub repeat_mode: RepeatMode,
    /// Previously played tracks, most recent last, for "skip previous".
    /// Restarting a previous track needs its file path, so the full
    /// `Track` is kept rather than just the id (see DESIGN.md).
    pub history: Vec<Track>,
    history_cap: usize,
}

impl PlaybackState {
    pub fn new(history_cap: usize) -> Self {
        Self {
            current_track: None,
            position_seconds: 0.0,
            duration_seconds: 0.0,
            is_playing: false,
            shuffle: false,
            repeat_mode: RepeatMode::Off,
            history: Vec::new(),
            history_cap,
        }
    }

    pub fn push_history(&mut self, track: Track) {
        self.history.push(track);
        if self.history.len() > self.history_cap {
            let overflow = self.history.len() - self.history_cap;
            self.history.drain(0..overflow);
        }
    }

    pub fn snapshot(&self, playlist: &[Track]) -> PlaybackSnapshot {
        PlaybackSnapshot {
            playlist: playlist.to_vec(),
            current_track: self.current_track.clone(),
            position_seconds: self.position_seconds,
            duration_seconds: self.duration_seconds,
            is_playing: self.is_playing,
            shuffle: self.shuffle,
            repeat_mode: self.repeat_mode,
        }
    }
}

struct PendingEntry {
    envelope: Envelope,
    received_at: Instant,
}

/// Outcome of feeding one causal envelope to [`StateStore::try_deliver`].
#[derive(Debug, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// Applied immediately.
    Delivered,
    /// Not yet causally ready; parked in the pending buffer.
    Buffered,
}

pub struct StateStore {
    self_id: String,
    pub peers: HashMap<String, PeerRecord>,
    pub playlist: Vec<Track>,
    pub playback: PlaybackState,
    clock: VectorClock,
    pending: Vec<PendingEntry>,
    pending_cap: usize,
    pending_ttl: Duration,
}

impl StateStore {
    pub fn new(self_id: String, history_cap: usize, pending_cap: usize, pending_ttl: Duration) -> Self {
        Self {
            self_id,
            peers: HashMap::new(),
            playlist: Vec::new(),
            playback: PlaybackState::new(history_cap),
            clock: VectorClock::new(),
            pending: Vec::new(),
            pending_cap,
            pending_ttl,
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    // ── Peer registry ────────────────────────────────────────────────

    pub fn upsert_peer(&mut self, id: &str, ip: &str, tcp_port: u16) {
        self.peers
            .entry(id.to_string())
            .and_modify(|p| {
                p.ip = ip.to_string();
                p.tcp_port = tcp_port;
                p.status = PeerStatus::Alive;
            })
            .or_insert_with(|| PeerRecord {
                id: id.to_string(),
                ip: ip.to_string(),
                tcp_port,
                status: PeerStatus::Alive,
            });
    }

    pub fn mark_dead(&mut self, id: &str) {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.status = PeerStatus::Dead;
        }
    }

    pub fn alive_peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values().filter(|p| p.status == PeerStatus::Alive)
    }

    // ── Vector clock ─────────────────────────────────────────────────

    /// `clock[self] += 1`, returning a snapshot for the outgoing envelope.
    pub fn increment_own_clock(&mut self) -> VectorClock {
        self.clock.increment(&self.self_id)
    }

    pub fn merge_clock(&mut self, incoming: &VectorClock) {
        self.clock.merge(incoming);
    }

    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    // ── Causal delivery (§4.4) ───────────────────────────────────────

    /// Feed one causal envelope to the store. If it is immediately
    /// deliverable, merges its clock, applies the mutation, and then
    /// drains the pending buffer to a fixpoint. Otherwise it is parked.
    ///
    /// Returns the outcome for `envelope` itself, plus every envelope
    /// (including ones drained from the buffer) that ended up applied,
    /// in delivery order — callers that need to react to a mutation
    /// (e.g. logging) can use this list instead of re-deriving it.
    pub fn try_deliver(&mut self, envelope: Envelope) -> (DeliverOutcome, Vec<Envelope>) {
        debug_assert!(envelope.kind.is_causal());

        if self.clock.can_deliver(&envelope.sender_id, &envelope.clock) {
            let mut applied = vec![envelope.clone()];
            self.deliver_one(envelope);
            applied.extend(self.drain_deliverable());
            (DeliverOutcome::Delivered, applied)
        } else {
            self.buffer(envelope);
            (DeliverOutcome::Buffered, Vec::new())
        }
    }

    fn deliver_one(&mut self, envelope: Envelope) {
        self.clock.merge(&envelope.clock);
        self.apply_mutation(&envelope.kind);
    }

    fn drain_deliverable(&mut self) -> Vec<Envelope> {
        let mut delivered = Vec::new();
        loop {
            let ready_idx = self
                .pending
                .iter()
                .position(|entry| self.clock.can_deliver(&entry.envelope.sender_id, &entry.envelope.clock));

            let Some(idx) = ready_idx else { break };
            let entry = self.pending.remove(idx);
            self.deliver_one(entry.envelope.clone());
            delivered.push(entry.envelope);
        }
        delivered
    }

    fn buffer(&mut self, envelope: Envelope) {
        self.pending.push(PendingEntry {
            envelope,
            received_at: Instant::now(),
        });
        if self.pending.len() > self.pending_cap {
            log::warn!(
                "pending buffer exceeded cap ({}), dropping oldest entry",
                self.pending_cap
            );
            self.pending.remove(0);
        }
    }

    /// Drop pending entries older than `PENDING_TTL`; returns how many
    /// were dropped, for logging by the caller.
    pub fn sweep_pending(&mut self) -> usize {
        let ttl = self.pending_ttl;
        let before = self.pending.len();
        self.pending.retain(|entry| entry.received_at.elapsed() < ttl);
        before - self.pending.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn apply_mutation(&mut self, kind: &MessageKind) {
        match kind {
            MessageKind::QueueAdd { track } => {
                if !self.playlist.iter().any(|t| t.id == track.id) {
                    self.playlist.push(track.clone());
                }
            }
            MessageKind::QueueRemove { track_id } => {
                self.playlist.retain(|t| t.id != *track_id);
            }
            MessageKind::QueueClear => {
                self.playlist.clear();
            }
            MessageKind::FullState { snapshot } => {
                self.playlist = snapshot.playlist.clone();
                self.playback.current_track = snapshot.current_track.clone();
                self.playback.position_seconds = snapshot.position_seconds;
                self.playback.duration_seconds = snapshot.duration_seconds;
                self.playback.is_playing = snapshot.is_playing;
                self.playback.shuffle = snapshot.shuffle;
                self.playback.repeat_mode = snapshot.repeat_mode;
            }
            other => {
                debug_assert!(!other.is_causal(), "apply_mutation called on non-causal kind");
            }
        }
    }

    // ── Local (non-replicated) playlist mutations ───────────────────
    // Used by the originator of a mutation, which applies it locally
    // before broadcasting — the broadcast's own clock entry is already
    // satisfied locally by construction, so no causal check is needed.

    pub fn add_track_locally(&mut self, track: Track) {
        if !self.playlist.iter().any(|t| t.id == track.id) {
            self.playlist.push(track);
        }
    }

    pub fn remove_track_locally(&mut self, track_id: uuid::Uuid) {
        self.playlist.retain(|t| t.id != track_id);
    }

    pub fn clear_queue_locally(&mut self) {
        self.playlist.clear();
    }
}
