//! Weighted bully leader election with an uptime veto (§4.5).
//!
//! A pure state machine driven by external events and an explicit `now`
//! clock (the caller supplies `Instant::now()`), so the whole thing is
//! testable without sleeping. [`crate::runtime`] owns the actual timers
//! and calls back in on expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionPhase {
    Idle,
    Campaigning,
    WaitingForCoordinator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Listener,
}

#[derive(Debug, Clone)]
struct PeerRank {
    username: String,
}

/// What the engine wants sent or started; the caller (connection manager /
/// runtime) performs the actual I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum ElectionAction {
    SendElection { to: Vec<String>, uptime: u64 },
    SendAnswer { to: String },
    BroadcastCoordinator { leader_id: String },
    StartHeartbeatLoop,
}

pub struct ElectionEngine {
    self_id: String,
    self_username: String,
    started_at: Instant,
    discovery_grace: Duration,
    election_timeout: Duration,
    host_timeout: Duration,
    uptime_threshold: Duration,

    phase: ElectionPhase,
    leader_id: Option<String>,
    last_heartbeat_at: Option<Instant>,
    campaign_started_at: Option<Instant>,
    waiting_started_at: Option<Instant>,
    peers: HashMap<String, PeerRank>,
}

impl ElectionEngine {
    pub fn new(
        self_id: String,
        self_username: String,
        now: Instant,
        discovery_grace: Duration,
        election_timeout: Duration,
        host_timeout: Duration,
        uptime_threshold: Duration,
    ) -> Self {
        Self {
            self_id,
            self_username,
            started_at: now,
            discovery_grace,
            election_timeout,
            host_timeout,
            uptime_threshold,
            phase: ElectionPhase::Idle,
            leader_id: None,
            last_heartbeat_at: None,
            campaign_started_at: None,
            waiting_started_at: None,
            peers: HashMap::new(),
        }
    }

    pub fn uptime(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.started_at).as_secs()
    }

    pub fn phase(&self) -> ElectionPhase {
        self.phase
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    pub fn role(&self) -> Role {
        if self.leader_id.as_deref() == Some(self.self_id.as_str()) {
            Role::Host
        } else {
            Role::Listener
        }
    }

    fn self_rank(&self) -> (&str, &str) {
        (&self.self_username, &self.self_id)
    }

    fn self_rank_owned(&self) -> (String, String) {
        (self.self_username.clone(), self.self_id.clone())
    }

    fn peer_rank<'a>(&'a self, id: &'a str) -> (&'a str, &'a str) {
        let username = self.peers.get(id).map(|p| p.username.as_str()).unwrap_or("");
        (username, id)
    }

    fn higher_ranked_peers(&self) -> Vec<String> {
        let self_rank = self.self_rank();
        self.peers
            .keys()
            .filter(|id| self.peer_rank(id) > self_rank)
            .cloned()
            .collect()
    }

    /// Deadline for the election timer while campaigning; `None` otherwise.
    pub fn election_deadline(&self) -> Option<Instant> {
        self.campaign_started_at.map(|t| t + self.election_timeout)
    }

    /// Deadline for the coordinator timer while waiting; `None` otherwise.
    pub fn coordinator_deadline(&self) -> Option<Instant> {
        self.waiting_started_at.map(|t| t + self.election_timeout)
    }

    /// Deadline past which a listener with no heartbeat starts a new
    /// election; `None` if we are the host or have never had a leader.
    pub fn host_timeout_deadline(&self) -> Option<Instant> {
        if self.role() == Role::Host {
            return None;
        }
        self.last_heartbeat_at.map(|t| t + self.host_timeout)
    }

    fn start_campaign(&mut self, now: Instant) -> Vec<ElectionAction> {
        self.phase = ElectionPhase::Campaigning;
        self.campaign_started_at = Some(now);
        self.waiting_started_at = None;
        vec![ElectionAction::SendElection {
            to: self.higher_ranked_peers(),
            uptime: self.uptime(now),
        }]
    }

    /// Called on every tick while idle with no known leader; only starts a
    /// campaign once `discovery_grace` has actually elapsed since startup,
    /// so a freshly-started node gets a chance to discover and connect to
    /// existing peers before declaring itself Host unopposed (S1).
    pub fn on_startup_grace_elapsed(&mut self, now: Instant) -> Vec<ElectionAction> {
        if self.leader_id.is_none()
            && self.phase == ElectionPhase::Idle
            && now.saturating_duration_since(self.started_at) >= self.discovery_grace
        {
            self.start_campaign(now)
        } else {
            Vec::new()
        }
    }

    /// A peer connected. If we are mid-campaign and the new peer outranks
    /// us, it was not part of the snapshot `start_campaign` addressed, so
    /// send it `ELECTION` directly rather than silently skipping it.
    pub fn on_peer_connected(&mut self, id: String, username: String, now: Instant) -> Vec<ElectionAction> {
        let rank = (username.clone(), id.clone());
        self.peers.insert(id.clone(), PeerRank { username });

        if self.phase == ElectionPhase::Campaigning && rank > self.self_rank_owned() {
            return vec![ElectionAction::SendElection { to: vec![id], uptime: self.uptime(now) }];
        }
        Vec::new()
    }

    /// A peer's connection dropped. If it was the host, begin a new
    /// election; otherwise just drop its rank bookkeeping.
    pub fn on_peer_disconnected(&mut self, id: &str, now: Instant) -> Vec<ElectionAction> {
        self.peers.remove(id);
        if self.leader_id.as_deref() == Some(id) {
            self.leader_id = None;
            self.last_heartbeat_at = None;
            self.phase = ElectionPhase::Idle;
            return self.start_campaign(now);
        }
        Vec::new()
    }

    /// Receipt of `ELECTION {uptime}` from `from` (§4.5 uptime veto and
    /// split-brain handling).
    pub fn on_election_received(
        &mut self,
        from: &str,
        sender_uptime: u64,
        now: Instant,
    ) -> Vec<ElectionAction> {
        let self_rank_owned = self.self_rank_owned();
        let sender_rank_owned = {
            let (u, i) = self.peer_rank(from);
            (u.to_string(), i.to_string())
        };

        let self_uptime = self.uptime(now);
        if sender_uptime > self_uptime + self.uptime_threshold.as_secs() {
            log::info!(
                "election: yielding to {} vetoed (their uptime {} vs ours {} + threshold)",
                from,
                sender_uptime,
                self_uptime
            );
            return Vec::new();
        }

        let mut actions = vec![ElectionAction::SendAnswer { to: from.to_string() }];

        if sender_rank_owned > self_rank_owned {
            // Split-brain protection: a presumed stronger contender is
            // already campaigning; stop competing and wait for its
            // COORDINATOR announcement.
            self.phase = ElectionPhase::WaitingForCoordinator;
            self.waiting_started_at = Some(now);
            self.campaign_started_at = None;
        } else if self.phase != ElectionPhase::Campaigning {
            actions.extend(self.start_campaign(now));
        }

        actions
    }

    pub fn on_answer_received(&mut self, now: Instant) -> Vec<ElectionAction> {
        if self.phase == ElectionPhase::Campaigning {
            self.phase = ElectionPhase::WaitingForCoordinator;
            self.waiting_started_at = Some(now);
            self.campaign_started_at = None;
        }
        Vec::new()
    }

    pub fn on_coordinator_received(&mut self, leader_id: String, now: Instant) -> Vec<ElectionAction> {
        self.phase = ElectionPhase::Idle;
        self.leader_id = Some(leader_id);
        self.last_heartbeat_at = Some(now);
        self.campaign_started_at = None;
        self.waiting_started_at = None;
        Vec::new()
    }

    pub fn on_heartbeat_received(&mut self, from: &str, now: Instant) {
        if self.leader_id.as_deref() == Some(from) {
            self.last_heartbeat_at = Some(now);
        }
    }

    /// The election timer fired with no ANSWER: we win (§4.5 table, row 3).
    pub fn on_election_timer_expired(&mut self, now: Instant) -> Vec<ElectionAction> {
        if self.phase != ElectionPhase::Campaigning {
            return Vec::new();
        }
        self.phase = ElectionPhase::Idle;
        self.leader_id = Some(self.self_id.clone());
        self.campaign_started_at = None;
        self.last_heartbeat_at = Some(now);
        vec![
            ElectionAction::BroadcastCoordinator { leader_id: self.self_id.clone() },
            ElectionAction::StartHeartbeatLoop,
        ]
    }

    /// The coordinator timer fired with no COORDINATOR: restart campaign.
    pub fn on_coordinator_timer_expired(&mut self, now: Instant) -> Vec<ElectionAction> {
        if self.phase != ElectionPhase::WaitingForCoordinator {
            return Vec::new();
        }
        self.start_campaign(now)
    }

    /// Host heartbeat went stale: start a new election.
    pub fn check_host_timeout(&mut self, now: Instant) -> Vec<ElectionAction> {
        match self.host_timeout_deadline() {
            Some(deadline) if now >= deadline => {
                self.phase = ElectionPhase::Idle;
                self.leader_id = None;
                self.start_campaign(now)
            }
            _ => Vec::new(),
        }
    }
}
