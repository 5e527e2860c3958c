//! Causal delivery and playback scenarios (§8 S2, S5, S6), each driven
//! against `StateStore`/`PlaybackCoordinator` directly with hand-built
//! envelopes standing in for messages that would otherwise cross a TCP
//! connection.

use std::time::Duration;

use lantrack::playback::sink::AudioSink;
use lantrack::playback::PlaybackCoordinator;
use lantrack::protocol::{Envelope, MessageKind, RepeatMode, Track};
use lantrack::store::clock::VectorClock;
use lantrack::store::{DeliverOutcome, StateStore};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

fn track(title: &str) -> Track {
    Track {
        id: Uuid::new_v4(),
        title: title.into(),
        artist: String::new(),
        file_path: format!("/music/{}.mp3", title),
        added_by: "alice".into(),
        timestamp: 0,
    }
}

/// S5: charlie receives bob's `QUEUE_ADD(T_b)` (clock `{alice:1,bob:1}`)
/// before alice's own `QUEUE_ADD(T_a)` (clock `{alice:1}`). Charlie must
/// buffer `T_b`, then deliver both in causal order once `T_a` arrives.
#[test]
fn concurrent_adds_deliver_in_causal_order_at_a_third_node() {
    let t_a = track("a");
    let t_b = track("b");

    let mut clock_a = VectorClock::new();
    clock_a.increment("alice");
    let envelope_a = Envelope {
        sender_id: "alice".into(),
        sender_ip: "10.0.0.1".into(),
        clock: clock_a.clone(),
        kind: MessageKind::QueueAdd { track: t_a.clone() },
    };

    let mut clock_b = clock_a.clone();
    clock_b.increment("bob");
    let envelope_b = Envelope {
        sender_id: "bob".into(),
        sender_ip: "10.0.0.2".into(),
        clock: clock_b,
        kind: MessageKind::QueueAdd { track: t_b.clone() },
    };

    let mut charlie = StateStore::new("charlie".into(), 32, 256, Duration::from_secs(30));

    let (outcome, applied) = charlie.try_deliver(envelope_b);
    assert_eq!(outcome, DeliverOutcome::Buffered);
    assert!(applied.is_empty());

    let (outcome, applied) = charlie.try_deliver(envelope_a);
    assert_eq!(outcome, DeliverOutcome::Delivered);
    assert_eq!(applied.len(), 2);

    assert_eq!(charlie.playlist.len(), 2);
    assert_eq!(charlie.playlist[0].id, t_a.id);
    assert_eq!(charlie.playlist[1].id, t_b.id);
}

/// S2: a late-joining peer's `FULL_STATE` application matches the
/// Host's playlist, current track, and playback flags at emission time.
#[test]
fn full_state_sync_matches_the_hosts_snapshot_at_emission() {
    let t1 = track("one");
    let t2 = track("two");
    let current = track("zero");

    let mut alice = StateStore::new("alice".into(), 32, 256, Duration::from_secs(30));
    alice.add_track_locally(t1.clone());
    alice.add_track_locally(t2.clone());
    alice.playback.current_track = Some(current.clone());
    alice.playback.is_playing = true;

    let snapshot = alice.playback.snapshot(&alice.playlist);
    let envelope = Envelope {
        sender_id: "alice".into(),
        sender_ip: "10.0.0.1".into(),
        clock: alice.clock().clone(),
        kind: MessageKind::FullState { snapshot },
    };

    let mut bob = StateStore::new("bob".into(), 32, 256, Duration::from_secs(30));
    let (outcome, _) = bob.try_deliver(envelope);
    assert_eq!(outcome, DeliverOutcome::Delivered);

    assert_eq!(bob.playlist, alice.playlist);
    assert_eq!(bob.playback.current_track.unwrap().id, current.id);
    assert!(bob.playback.is_playing);
}

/// S6: the Host auto-advances past a track whose file no longer
/// resolves without ever calling the sink for it, then plays the next
/// resolvable track.
#[test]
fn missing_file_is_skipped_during_auto_advance() {
    struct RecordingSink {
        plays: Vec<String>,
        busy: bool,
    }
    impl AudioSink for RecordingSink {
        fn play(&mut self, path: &str, _start_offset: f64) -> bool {
            self.plays.push(path.to_string());
            self.busy = true;
            true
        }
        fn stop(&mut self) {
            self.busy = false;
        }
        fn pause_toggle(&mut self) -> bool {
            false
        }
        fn set_volume(&mut self, _volume: f64) {}
        fn position(&self) -> f64 {
            0.0
        }
        fn duration(&self) -> f64 {
            200.0
        }
        fn is_busy(&self) -> bool {
            self.busy
        }
    }

    let missing = track("missing");
    let present = track("present");
    let missing_path = missing.file_path.clone();

    let mut store = StateStore::new("host".into(), 32, 256, Duration::from_secs(30));
    store.add_track_locally(missing.clone());
    store.add_track_locally(present.clone());
    store.playback.current_track = Some(track("finished"));
    store.playback.is_playing = true;

    let sink = RecordingSink { plays: Vec::new(), busy: false };
    let mut coordinator = PlaybackCoordinator::with_resolver(
        Box::new(sink),
        Box::new(StdRng::seed_from_u64(1)),
        Box::new(move |path| path != missing_path),
    );

    let actions = coordinator.tick(&mut store);

    assert!(!actions.iter().any(|a| matches!(a, lantrack::playback::PlaybackAction::NowPlaying(t) if t.id == missing.id)));
    assert!(actions
        .iter()
        .any(|a| matches!(a, lantrack::playback::PlaybackAction::MissingFile(t) if t.id == missing.id)));
    assert_eq!(store.playback.current_track.unwrap().id, present.id);
    assert!(!store.playlist.iter().any(|t| t.id == missing.id));
    assert_eq!(store.playback.repeat_mode, RepeatMode::Off);
}
