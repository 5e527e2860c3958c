//! Translates user intents from the view into protocol actions (§4.8).
//!
//! `add_track` is the one mutating intent any peer may issue; everything
//! else is Host-only and is simply ignored (logged, not rejected with an
//! error) when the local node is not the Host — mirroring the "all
//! no-ops if not Host" rule.

use uuid::Uuid;

use crate::election::Role;
use crate::protocol::{RepeatMode, Track};

/// A user-originated command from the view (§4.8).
#[derive(Debug, Clone)]
pub enum Intent {
    AddTrack { local_path: String },
    RemoveTrack { id: Uuid },
    ClearQueue,
    PlayPause,
    SkipNext,
    SkipPrev,
    Seek { percent: f64 },
    SetShuffle(bool),
    SetRepeatMode(RepeatMode),
}

impl Intent {
    /// Whether this intent is restricted to the Host (§4.8). `AddTrack`
    /// is the sole exception: any peer may enqueue a track.
    pub fn is_host_only(&self) -> bool {
        !matches!(self, Intent::AddTrack { .. })
    }
}

/// Build a `Track` for a freshly added local file. `added_by` and
/// `timestamp` are supplied by the caller so this stays free of a
/// system-clock dependency the rest of the module doesn't otherwise need.
pub fn build_track(local_path: String, added_by: String, timestamp: u64) -> Track {
    Track {
        id: Uuid::new_v4(),
        title: title_from_path(&local_path),
        artist: String::new(),
        file_path: local_path,
        added_by,
        timestamp,
    }
}

fn title_from_path(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// `true` if `intent` may be carried out given `role`; Host-only intents
/// issued by a non-Host are dropped (logged, not erred) by the caller.
pub fn is_authorized(intent: &Intent, role: Role) -> bool {
    role == Role::Host || !intent.is_host_only()
}
