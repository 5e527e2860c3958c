//! The audio sink contract (§6) — deliberately out of scope for this
//! crate's own logic. `NullSink` is the default, headless implementation
//! used when no real audio backend is wired in, so the binary still runs
//! end to end without one.

/// `{play, stop, pause_toggle, set_volume, position, is_busy}` (§6).
///
/// `position()` is the track's absolute position in seconds, including
/// whatever `start_offset` the most recent `play()` call specified — a
/// real implementation seeks the decoder to that offset so listeners
/// don't need to separately track an accumulated offset across seeks.
pub trait AudioSink: Send {
    /// Start (or restart) playback of `path` at `start_offset` seconds.
    /// Returns `false` if the path does not resolve to playable media,
    /// per §7's missing-media-file handling.
    fn play(&mut self, path: &str, start_offset: f64) -> bool;
    fn stop(&mut self);
    /// Toggles pause; returns the resulting paused state.
    fn pause_toggle(&mut self) -> bool;
    fn set_volume(&mut self, volume: f64);
    fn position(&self) -> f64;
    /// Length of the track most recently started with `play()`, in
    /// seconds. Meaningless before the first `play()` call.
    fn duration(&self) -> f64;
    fn is_busy(&self) -> bool;
}

/// Duration reported for every track by [`NullSink`], which has no decoder
/// to ask. Arbitrary but fixed, so `PLAYBACK_SYNC`/`FULL_STATE` frames at
/// least carry a stable, non-zero value while no real backend is wired in.
const NULL_SINK_SYNTHETIC_DURATION_SECS: f64 = 180.0;

/// A sink that resolves any non-empty path, reports itself as never busy
/// (so the playback coordinator always advances on the next tick), and
/// otherwise does nothing. Used when the process has no real audio
/// backend configured.
pub struct NullSink {
    playing: bool,
    paused: bool,
    position: f64,
    volume: f64,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            playing: false,
            paused: false,
            position: 0.0,
            volume: 1.0,
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullSink {
    fn play(&mut self, path: &str, start_offset: f64) -> bool {
        if path.trim().is_empty() {
            return false;
        }
        log::debug!("null sink: play {} @ {:.1}s (no audio backend configured)", path, start_offset);
        self.playing = true;
        self.paused = false;
        self.position = start_offset;
        true
    }

    fn stop(&mut self) {
        self.playing = false;
        self.paused = false;
        self.position = 0.0;
    }

    fn pause_toggle(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn duration(&self) -> f64 {
        if self.playing {
            NULL_SINK_SYNTHETIC_DURATION_SECS
        } else {
            0.0
        }
    }

    fn is_busy(&self) -> bool {
        false
    }
}
