//! Error taxonomy for the coordination core (§7).
//!
//! Most call sites use `anyhow::Result` for fallible sequences that are
//! only ever logged at the boundary (handshakes, frame I/O). These two
//! enums exist for the handful of places a caller actually needs to
//! `match` on *which* thing went wrong: protocol violations, which always
//! mean "close this connection, don't crash", and transport bind
//! failures, which decide whether discovery is merely disabled or the
//! process must exit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {len} bytes exceeds the {max} byte cap")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("failed to decode frame payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("connection closed before a full frame was read")]
    ConnectionClosed,

    #[error("expected {expected} as the first frame on a new connection, got {got}")]
    UnexpectedFirstFrame { expected: &'static str, got: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("UDP discovery bind failed on port {port}: {source}")]
    UdpBindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("no free TCP port found in range {start}..={end}")]
    TcpPortExhausted { start: u16, end: u16 },
}
