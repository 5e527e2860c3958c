//! Wire protocol: UDP discovery beacons, the TCP peer-message envelope,
//! and the length-prefixed framing both ride on (§4.1, §6).
//!
//! Framing is `[4-byte big-endian length][N bytes payload]`; the payload
//! is a `serde_json`-encoded, internally-tagged enum, the same
//! self-describing-tagged-union approach the reference client uses for
//! its own `PeerMessage`. Bit-exactness of the encoding is not load
//! bearing (every peer runs the same build) — only the framing is.

use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::store::clock::VectorClock;

pub const DISCOVERY_MAGIC: &[u8; 8] = b"LANTRK1\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatMode {
    Off,
    All,
    One,
}

/// Immutable once created (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    pub file_path: String,
    pub added_by: String,
    pub timestamp: u64,
}

/// Broadcast beacon payload sent periodically over UDP (§4.2, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryBeacon {
    pub node_id: String,
    pub local_ip: String,
    pub tcp_port: u16,
}

/// Snapshot of playback state carried by `FULL_STATE` (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub playlist: Vec<Track>,
    pub current_track: Option<Track>,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub is_playing: bool,
    pub shuffle: bool,
    pub repeat_mode: RepeatMode,
}

/// Every message exchanged over a TCP peer connection (§6). Internally
/// tagged so a decoder can dispatch on `kind` without a separate switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MessageKind {
    Hello { tcp_port: u16, username: String },
    Welcome { leader_id: Option<String> },
    Election { uptime: u64 },
    Answer,
    Coordinator { leader_id: String },
    Heartbeat,
    RequestState,
    FullState { snapshot: PlaybackSnapshot },
    QueueAdd { track: Track },
    QueueRemove { track_id: Uuid },
    QueueClear,
    NowPlaying { track: Track },
    PlaybackSync { position: f64, duration: f64, is_playing: bool },
    PlaybackStatus { is_playing: bool, shuffle: bool, repeat_mode: RepeatMode },
}

impl MessageKind {
    /// Only playlist-mutating messages participate in causal delivery
    /// (§4.4). Everything else — control-plane and liveness traffic — is
    /// applied immediately in per-connection receipt order.
    pub fn is_causal(&self) -> bool {
        matches!(
            self,
            MessageKind::QueueAdd { .. }
                | MessageKind::QueueRemove { .. }
                | MessageKind::QueueClear
                | MessageKind::FullState { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Hello { .. } => "HELLO",
            MessageKind::Welcome { .. } => "WELCOME",
            MessageKind::Election { .. } => "ELECTION",
            MessageKind::Answer => "ANSWER",
            MessageKind::Coordinator { .. } => "COORDINATOR",
            MessageKind::Heartbeat => "HEARTBEAT",
            MessageKind::RequestState => "REQUEST_STATE",
            MessageKind::FullState { .. } => "FULL_STATE",
            MessageKind::QueueAdd { .. } => "QUEUE_ADD",
            MessageKind::QueueRemove { .. } => "QUEUE_REMOVE",
            MessageKind::QueueClear => "QUEUE_CLEAR",
            MessageKind::NowPlaying { .. } => "NOW_PLAYING",
            MessageKind::PlaybackSync { .. } => "PLAYBACK_SYNC",
            MessageKind::PlaybackStatus { .. } => "PLAYBACK_STATUS",
        }
    }
}

/// `{sender_id, sender_ip, kind, clock}` (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sender_id: String,
    pub sender_ip: String,
    pub clock: VectorClock,
    pub kind: MessageKind,
}

// ── UDP beacon encode/decode ────────────────────────────────────────────

pub fn encode_beacon(beacon: &DiscoveryBeacon) -> Vec<u8> {
    let json = serde_json::to_vec(beacon).expect("beacon serialization is infallible");
    let mut buf = Vec::with_capacity(DISCOVERY_MAGIC.len() + json.len());
    buf.extend_from_slice(DISCOVERY_MAGIC);
    buf.extend_from_slice(&json);
    buf
}

pub fn decode_beacon(data: &[u8]) -> Option<DiscoveryBeacon> {
    if data.len() <= DISCOVERY_MAGIC.len() || &data[..DISCOVERY_MAGIC.len()] != DISCOVERY_MAGIC {
        return None;
    }
    serde_json::from_slice(&data[DISCOVERY_MAGIC.len()..]).ok()
}

// ── TCP framing ──────────────────────────────────────────────────────────

pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    let json = serde_json::to_vec(envelope).expect("envelope serialization is infallible");
    let len = json.len() as u32;
    let mut buf = Vec::with_capacity(4 + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);
    buf
}

pub async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> io::Result<()> {
    writer.write_all(&encode_envelope(envelope)).await
}

/// Read exactly one length-prefixed frame and decode it. Oversized frames
/// (beyond `max_frame_bytes`) return `ProtocolError::FrameTooLarge`
/// without reading the payload, so a misbehaving peer can't force an
/// unbounded allocation.
pub async fn read_envelope<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> Result<Envelope, ProtocolError> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)?;
    let len = u32::from_be_bytes(len_buf);

    if len > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)?;

    Ok(serde_json::from_slice(&payload)?)
}
