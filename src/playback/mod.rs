//! Host-only playback coordinator (§4.7): drives the audio sink off the
//! local playlist head, advances tracks per `repeat_mode`/`shuffle`, and
//! produces the domain-level events the runtime turns into broadcasts.
//!
//! Runs only while this node is Host; [`crate::runtime`] is responsible
//! for not calling these methods otherwise (§4.8: "all no-ops if not
//! Host" is satisfied by the caller simply not invoking them).

pub mod sink;

use rand::RngCore;
use uuid::Uuid;

use crate::protocol::{RepeatMode, Track};
use crate::store::StateStore;
use sink::AudioSink;

/// A domain-level outcome of a coordinator tick or user intent. The
/// runtime wraps each of these into an `Envelope` (incrementing the
/// clock for causal kinds) and broadcasts it.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackAction {
    Heartbeat,
    NowPlaying(Track),
    QueueRemove(Uuid),
    PlaybackSync { position: f64, duration: f64, is_playing: bool },
    PlaybackStatus { is_playing: bool, shuffle: bool, repeat_mode: RepeatMode },
    MissingFile(Track),
}

/// How far into a track "skip previous" still counts as "just started"
/// and should pop history instead of restarting (§4.7, resolved).
const SKIP_PREV_RESTART_THRESHOLD_SECS: f64 = 2.0;

pub struct PlaybackCoordinator {
    sink: Box<dyn AudioSink>,
    rng: Box<dyn RngCore + Send>,
    resolve_path: Box<dyn Fn(&str) -> bool + Send>,
}

impl PlaybackCoordinator {
    pub fn new(sink: Box<dyn AudioSink>, rng: Box<dyn RngCore + Send>) -> Self {
        Self {
            sink,
            rng,
            resolve_path: Box::new(|path| std::path::Path::new(path).is_file()),
        }
    }

    /// Substitute the filesystem check for a deterministic one (tests).
    pub fn with_resolver(
        sink: Box<dyn AudioSink>,
        rng: Box<dyn RngCore + Send>,
        resolve_path: Box<dyn Fn(&str) -> bool + Send>,
    ) -> Self {
        Self { sink, rng, resolve_path }
    }

    /// One heartbeat-interval tick: auto-advance if the sink has gone
    /// idle, then always report position (§4.7).
    pub fn tick(&mut self, store: &mut StateStore) -> Vec<PlaybackAction> {
        let mut actions = vec![PlaybackAction::Heartbeat];

        if store.playback.is_playing && !self.sink.is_busy() && store.playback.current_track.is_some() {
            let finished = store.playback.current_track.take().expect("checked above");
            store.playback.push_history(finished.clone());
            actions.extend(self.advance_past(store, finished));
        }

        let position = if store.playback.current_track.is_some() {
            self.sink.position()
        } else {
            0.0
        };
        actions.push(PlaybackAction::PlaybackSync {
            position,
            duration: store.playback.duration_seconds,
            is_playing: store.playback.is_playing,
        });

        actions
    }

    /// Select and start the next track after `finished`, skipping over
    /// any track whose file no longer resolves (§7: sink is never called
    /// for a track that fails path resolution) until one plays or the
    /// playlist is exhausted.
    fn advance_past(&mut self, store: &mut StateStore, mut finished: Track) -> Vec<PlaybackAction> {
        let mut actions = Vec::new();
        let attempts = store.playlist.len() + 1;

        for _ in 0..attempts {
            let Some(candidate) = self.select_next(store, &finished) else {
                store.playback.is_playing = false;
                store.playback.duration_seconds = 0.0;
                actions.push(PlaybackAction::PlaybackStatus {
                    is_playing: false,
                    shuffle: store.playback.shuffle,
                    repeat_mode: store.playback.repeat_mode,
                });
                return actions;
            };

            if (self.resolve_path)(&candidate.file_path) {
                let started = self.sink.play(&candidate.file_path, 0.0);
                debug_assert!(started, "resolver approved a path the sink then refused");
                store.playback.duration_seconds = self.sink.duration();
                store.playback.current_track = Some(candidate.clone());
                store.remove_track_locally(candidate.id);
                actions.push(PlaybackAction::NowPlaying(candidate.clone()));
                actions.push(PlaybackAction::QueueRemove(candidate.id));
                return actions;
            }

            log::warn!("skipping missing media file: {}", candidate.file_path);
            store.remove_track_locally(candidate.id);
            actions.push(PlaybackAction::MissingFile(candidate.clone()));
            actions.push(PlaybackAction::QueueRemove(candidate.id));
            finished = candidate;
        }

        // Exhausted every candidate without finding a playable one.
        store.playback.is_playing = false;
        store.playback.duration_seconds = 0.0;
        actions.push(PlaybackAction::PlaybackStatus {
            is_playing: false,
            shuffle: store.playback.shuffle,
            repeat_mode: store.playback.repeat_mode,
        });
        actions
    }

    fn select_next(&mut self, store: &StateStore, finished: &Track) -> Option<Track> {
        match store.playback.repeat_mode {
            RepeatMode::One => Some(finished.clone()),
            _ if store.playback.shuffle => {
                let candidates: Vec<&Track> = store
                    .playlist
                    .iter()
                    .filter(|t| store.playlist.len() <= 1 || t.id != finished.id)
                    .collect();
                if candidates.is_empty() {
                    None
                } else {
                    let idx = (self.rng.next_u32() as usize) % candidates.len();
                    Some(candidates[idx].clone())
                }
            }
            RepeatMode::Off | RepeatMode::All => store.playlist.first().cloned(),
        }
    }

    // ── User intents (Host-only; §4.7, §4.8) ─────────────────────────

    pub fn play_pause(&mut self, store: &mut StateStore) -> Vec<PlaybackAction> {
        if store.playback.current_track.is_none() {
            return Vec::new();
        }
        let is_paused = self.sink.pause_toggle();
        store.playback.is_playing = !is_paused;
        vec![PlaybackAction::PlaybackStatus {
            is_playing: store.playback.is_playing,
            shuffle: store.playback.shuffle,
            repeat_mode: store.playback.repeat_mode,
        }]
    }

    pub fn skip_next(&mut self, store: &mut StateStore) -> Vec<PlaybackAction> {
        let Some(current) = store.playback.current_track.take() else {
            return Vec::new();
        };
        self.sink.stop();
        store.playback.push_history(current.clone());
        self.advance_past(store, current)
    }

    /// Pop history and replay it if the current track has played less
    /// than `SKIP_PREV_RESTART_THRESHOLD_SECS`; otherwise restart the
    /// current track from position 0 (§4.7, resolved Open Question).
    pub fn skip_prev(&mut self, store: &mut StateStore) -> Vec<PlaybackAction> {
        let Some(current) = store.playback.current_track.clone() else {
            return Vec::new();
        };

        if self.sink.position() < SKIP_PREV_RESTART_THRESHOLD_SECS {
            if let Some(previous) = store.playback.history.pop() {
                if (self.resolve_path)(&previous.file_path) {
                    self.sink.play(&previous.file_path, 0.0);
                    store.playback.duration_seconds = self.sink.duration();
                    store.playback.current_track = Some(previous.clone());
                    return vec![PlaybackAction::NowPlaying(previous)];
                }
                log::warn!("previous track's file no longer resolves: {}", previous.file_path);
                return vec![PlaybackAction::MissingFile(previous)];
            }
        }

        self.sink.play(&current.file_path, 0.0);
        store.playback.duration_seconds = self.sink.duration();
        vec![PlaybackAction::NowPlaying(current)]
    }

    pub fn seek(&mut self, store: &mut StateStore, percent: f64) -> Vec<PlaybackAction> {
        let Some(current) = store.playback.current_track.clone() else {
            return Vec::new();
        };
        let duration = store.playback.duration_seconds;
        let position = (percent.clamp(0.0, 1.0)) * duration;
        self.sink.stop();
        self.sink.play(&current.file_path, position);
        vec![PlaybackAction::PlaybackSync {
            position,
            duration,
            is_playing: store.playback.is_playing,
        }]
    }

    pub fn set_shuffle(&mut self, store: &mut StateStore, shuffle: bool) -> Vec<PlaybackAction> {
        store.playback.shuffle = shuffle;
        vec![PlaybackAction::PlaybackStatus {
            is_playing: store.playback.is_playing,
            shuffle,
            repeat_mode: store.playback.repeat_mode,
        }]
    }

    pub fn set_repeat_mode(&mut self, store: &mut StateStore, mode: RepeatMode) -> Vec<PlaybackAction> {
        store.playback.repeat_mode = mode;
        vec![PlaybackAction::PlaybackStatus {
            is_playing: store.playback.is_playing,
            shuffle: store.playback.shuffle,
            repeat_mode: mode,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::sink::AudioSink;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    struct StubSink {
        busy: bool,
        position: f64,
        duration: f64,
        paused: bool,
        plays: Vec<String>,
    }

    impl StubSink {
        fn new() -> Self {
            Self { busy: false, position: 0.0, duration: 200.0, paused: false, plays: Vec::new() }
        }
    }

    impl AudioSink for StubSink {
        fn play(&mut self, path: &str, start_offset: f64) -> bool {
            self.plays.push(path.to_string());
            self.position = start_offset;
            self.busy = true;
            true
        }
        fn stop(&mut self) {
            self.busy = false;
            self.position = 0.0;
        }
        fn pause_toggle(&mut self) -> bool {
            self.paused = !self.paused;
            self.paused
        }
        fn set_volume(&mut self, _volume: f64) {}
        fn position(&self) -> f64 {
            self.position
        }
        fn duration(&self) -> f64 {
            self.duration
        }
        fn is_busy(&self) -> bool {
            self.busy
        }
    }

    fn track(title: &str) -> Track {
        Track {
            id: Uuid::new_v4(),
            title: title.into(),
            artist: "artist".into(),
            file_path: format!("/music/{}.mp3", title),
            added_by: "alice".into(),
            timestamp: 0,
        }
    }

    fn store_with(playlist: Vec<Track>, current: Option<Track>, playing: bool) -> StateStore {
        let mut store = StateStore::new("host".into(), 32, 256, Duration::from_secs(30));
        store.playlist = playlist;
        store.playback.current_track = current;
        store.playback.is_playing = playing;
        store
    }

    fn coordinator_all_files_exist() -> PlaybackCoordinator {
        PlaybackCoordinator::with_resolver(
            Box::new(StubSink::new()),
            Box::new(StdRng::seed_from_u64(7)),
            Box::new(|_path| true),
        )
    }

    #[test]
    fn fifo_auto_advance_moves_head_of_playlist_into_current_track() {
        let t1 = track("one");
        let t2 = track("two");
        let mut store = store_with(vec![t1.clone(), t2.clone()], Some(track("zero")), true);
        let mut coordinator = coordinator_all_files_exist();

        let actions = coordinator.tick(&mut store);
        assert!(actions.contains(&PlaybackAction::NowPlaying(t1.clone())));
        assert!(actions.contains(&PlaybackAction::QueueRemove(t1.id)));
        assert_eq!(store.playback.current_track.as_ref().unwrap().id, t1.id);
        assert_eq!(store.playlist, vec![t2]);
        assert_eq!(store.playback.duration_seconds, 200.0);
    }

    #[test]
    fn seek_computes_position_from_the_sinks_reported_duration() {
        let current = track("current");
        let mut store = store_with(Vec::new(), Some(current.clone()), true);
        store.playback.duration_seconds = 200.0;
        let mut coordinator = coordinator_all_files_exist();

        let actions = coordinator.seek(&mut store, 0.5);
        assert!(actions.contains(&PlaybackAction::PlaybackSync {
            position: 100.0,
            duration: 200.0,
            is_playing: true,
        }));
    }

    #[test]
    fn duration_resets_to_zero_when_the_queue_ends() {
        let mut store = store_with(Vec::new(), Some(track("last")), true);
        store.playback.duration_seconds = 200.0;
        let mut coordinator = coordinator_all_files_exist();

        coordinator.tick(&mut store);
        assert_eq!(store.playback.duration_seconds, 0.0);
    }

    #[test]
    fn empty_playlist_transitions_to_queue_end() {
        let mut store = store_with(Vec::new(), Some(track("last")), true);
        let mut coordinator = coordinator_all_files_exist();

        let actions = coordinator.tick(&mut store);
        assert!(store.playback.current_track.is_none());
        assert!(!store.playback.is_playing);
        assert!(actions.iter().any(|a| matches!(a, PlaybackAction::PlaybackStatus { is_playing: false, .. })));
    }

    #[test]
    fn repeat_one_replays_the_same_track() {
        let finished = track("loop");
        let mut store = store_with(vec![track("other")], Some(finished.clone()), true);
        store.playback.repeat_mode = RepeatMode::One;
        let mut coordinator = coordinator_all_files_exist();

        let actions = coordinator.tick(&mut store);
        assert!(actions.contains(&PlaybackAction::NowPlaying(finished.clone())));
        assert_eq!(store.playback.current_track.unwrap().id, finished.id);
        // The playlist, unrelated to the replayed track, is untouched.
        assert_eq!(store.playlist.len(), 1);
    }

    #[test]
    fn missing_file_is_skipped_without_calling_the_sink() {
        let missing = track("missing");
        let present = track("present");
        let mut store = store_with(
            vec![missing.clone(), present.clone()],
            Some(track("zero")),
            true,
        );
        let missing_path = missing.file_path.clone();
        let mut coordinator = PlaybackCoordinator::with_resolver(
            Box::new(StubSink::new()),
            Box::new(StdRng::seed_from_u64(1)),
            Box::new(move |path| path != missing_path),
        );

        let actions = coordinator.tick(&mut store);
        assert!(actions.contains(&PlaybackAction::MissingFile(missing.clone())));
        assert!(!actions.iter().any(|a| matches!(a, PlaybackAction::NowPlaying(t) if t.id == missing.id)));
        assert_eq!(store.playback.current_track.as_ref().unwrap().id, present.id);
    }

    #[test]
    fn skip_prev_within_threshold_pops_history() {
        let previous = track("previous");
        let current = track("current");
        let mut store = store_with(Vec::new(), Some(current.clone()), true);
        store.playback.push_history(previous.clone());

        let mut coordinator = coordinator_all_files_exist();
        let actions = coordinator.skip_prev(&mut store);
        assert!(actions.contains(&PlaybackAction::NowPlaying(previous.clone())));
        assert_eq!(store.playback.current_track.unwrap().id, previous.id);
        assert!(store.playback.history.is_empty());
    }

    #[test]
    fn skip_prev_after_threshold_restarts_current_track() {
        let previous = track("previous");
        let current = track("current");
        let mut store = store_with(Vec::new(), Some(current.clone()), true);
        store.playback.push_history(previous.clone());

        let mut coordinator = PlaybackCoordinator::with_resolver(
            Box::new(StubSink::new()),
            Box::new(StdRng::seed_from_u64(1)),
            Box::new(|_| true),
        );
        // Simulate more than the threshold having elapsed.
        coordinator.sink.play(&current.file_path, 5.0);

        let actions = coordinator.skip_prev(&mut store);
        assert!(actions.contains(&PlaybackAction::NowPlaying(current.clone())));
        assert_eq!(store.playback.current_track.unwrap().id, current.id);
        // History is untouched since we restarted rather than popped.
        assert_eq!(store.playback.history.len(), 1);
    }
}
