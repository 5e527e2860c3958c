//! Multi-node election scenarios (§8 S1/S3/S4), driven directly against
//! `ElectionEngine` instances standing in for separate nodes — no real
//! sockets, just the state machine and an explicit shared clock.

use std::time::{Duration, Instant};

use lantrack::election::{ElectionAction, ElectionEngine, ElectionPhase, Role};

const GRACE: Duration = Duration::from_millis(1500);

fn engine(id: &str, username: &str, started_at: Instant) -> ElectionEngine {
    ElectionEngine::new(
        id.into(),
        username.into(),
        started_at,
        GRACE,
        Duration::from_secs(3),
        Duration::from_millis(3100),
        Duration::from_secs(60),
    )
}

/// S1: a lone node becomes Host once the startup grace period elapses
/// and no one answers its ELECTION.
#[test]
fn solo_startup_elects_self_as_host() {
    let t0 = Instant::now();
    let mut alice = engine("alice-id", "alice", t0);

    alice.on_startup_grace_elapsed(t0 + GRACE);
    let deadline = alice.election_deadline().unwrap();
    let actions = alice.on_election_timer_expired(deadline + Duration::from_millis(1));

    assert_eq!(alice.role(), Role::Host);
    assert_eq!(alice.leader_id(), Some("alice-id"));
    assert!(actions.contains(&ElectionAction::BroadcastCoordinator { leader_id: "alice-id".into() }));
}

/// S3: the Host dies; the two survivors both notice via host timeout.
/// "zed" outranks "amy" lexicographically, so only amy's ELECTION is
/// ever routed anywhere; zed's own campaign times out unanswered and it
/// wins, and amy adopts zed's COORDINATOR once it arrives.
#[test]
fn host_failover_resolves_to_the_higher_ranked_survivor() {
    let t0 = Instant::now();
    let mut zed = engine("zed-id", "zed", t0 - Duration::from_secs(500));
    let mut amy = engine("amy-id", "amy", t0 - Duration::from_secs(400));

    zed.on_peer_connected("amy-id".into(), "amy".into(), t0);
    amy.on_peer_connected("zed-id".into(), "zed".into(), t0);
    zed.on_coordinator_received("alice-id".into(), t0 - Duration::from_millis(10));
    amy.on_coordinator_received("alice-id".into(), t0 - Duration::from_millis(10));

    let t_timeout = t0 + Duration::from_millis(3200);
    let zed_actions = zed.check_host_timeout(t_timeout);
    let amy_actions = amy.check_host_timeout(t_timeout);
    assert_eq!(zed.phase(), ElectionPhase::Campaigning);
    assert_eq!(amy.phase(), ElectionPhase::Campaigning);
    // zed outranks everyone else here, so its own campaign addresses no one.
    assert!(matches!(&zed_actions[0], ElectionAction::SendElection { to, .. } if to.is_empty()));
    // amy's campaign addresses zed, the only higher-ranked peer.
    assert!(matches!(&amy_actions[0], ElectionAction::SendElection { to, .. } if to == &vec!["zed-id".to_string()]));

    let zed_reply = zed.on_election_received("amy-id", amy.uptime(t_timeout), t_timeout);
    assert!(zed_reply.contains(&ElectionAction::SendAnswer { to: "amy-id".into() }));

    let amy_after_answer = amy.on_answer_received(t_timeout + Duration::from_millis(1));
    assert!(amy_after_answer.is_empty());
    assert_eq!(amy.phase(), ElectionPhase::WaitingForCoordinator);

    let zed_deadline = zed.election_deadline().unwrap();
    let zed_win = zed.on_election_timer_expired(zed_deadline + Duration::from_millis(1));
    assert_eq!(zed.role(), Role::Host);
    assert!(zed_win.contains(&ElectionAction::BroadcastCoordinator { leader_id: "zed-id".into() }));

    amy.on_coordinator_received("zed-id".into(), zed_deadline + Duration::from_millis(1));
    assert_eq!(amy.leader_id(), Some("zed-id"));
    assert_eq!(amy.role(), Role::Listener);
}

/// S4: a new, higher-ranked but much younger node must not depose a
/// long-lived incumbent (the uptime veto, exercised end to end).
#[test]
fn new_stronger_but_younger_node_does_not_unseat_the_incumbent_host() {
    let t0 = Instant::now();
    let mut alice = engine("alice-id", "alice", t0 - Duration::from_secs(600));
    alice.on_coordinator_received("alice-id".into(), t0);
    assert_eq!(alice.role(), Role::Host);

    // "eve" outranks "alice" lexicographically but just joined.
    alice.on_peer_connected("eve-id".into(), "eve".into(), t0);
    let actions = alice.on_election_received("eve-id", 0, t0 + Duration::from_secs(1));
    assert!(actions.is_empty(), "alice's long incumbency should veto eve's fresh challenge");
    assert_eq!(alice.leader_id(), Some("alice-id"));
}
