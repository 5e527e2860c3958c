//! The view contract (§6) — out of scope for this crate's own logic.
//! `ConsoleView` is a minimal stdout implementation so the binary is
//! runnable without a real GUI collaborator.

use crate::election::Role;
use crate::protocol::{RepeatMode, Track};

/// Snapshot pushed to the view on every state change worth rendering
/// (§6: `{role, leader_id, playlist, current_track, position, duration,
/// is_playing, shuffle, repeat_mode, log_line}`).
#[derive(Debug, Clone)]
pub struct ViewUpdate {
    pub role: Role,
    pub leader_id: Option<String>,
    pub playlist: Vec<Track>,
    pub current_track: Option<Track>,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub is_playing: bool,
    pub shuffle: bool,
    pub repeat_mode: RepeatMode,
    pub log_line: Option<String>,
}

pub trait View: Send {
    fn render(&mut self, update: &ViewUpdate);
}

/// Prints each update to stdout. No input handling — intents still have
/// to come in over whatever channel the embedder wires up; this exists
/// so `lantrackd` has somewhere to push state without a GUI attached.
pub struct ConsoleView;

impl View for ConsoleView {
    fn render(&mut self, update: &ViewUpdate) {
        let role = match update.role {
            Role::Host => "HOST",
            Role::Listener => "listener",
        };
        let now_playing = update
            .current_track
            .as_ref()
            .map(|t| format!("{} — {}", t.artist, t.title))
            .unwrap_or_else(|| "(nothing playing)".to_string());

        println!(
            "[{}] leader={:?} {} | {:.0}/{:.0}s | playlist={} tracks",
            role,
            update.leader_id,
            now_playing,
            update.position_seconds,
            update.duration_seconds,
            update.playlist.len(),
        );
        if let Some(line) = &update.log_line {
            println!("  note: {}", line);
        }
    }
}
