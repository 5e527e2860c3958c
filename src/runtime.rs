//! The orchestrator: owns the single core task that multiplexes every
//! event through [`CoreEvent`] and mutates [`StateStore`] — the
//! concurrency model chosen in the design notes over fine-grained
//! locking (§5, §9).
//!
//! Shutdown follows the reference client's `LanTasks { cancel, handles }`
//! pattern (`lan/mod.rs`): a single `CancellationToken` and a `Vec` of
//! `JoinHandle`s, cancelled and awaited together, idempotently.

use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::controller::{self, Intent};
use crate::election::{ElectionAction, ElectionEngine, Role};
use crate::event::CoreEvent;
use crate::net::connection::ConnectionManager;
use crate::net::discovery;
use crate::playback::sink::AudioSink;
use crate::playback::{PlaybackAction, PlaybackCoordinator};
use crate::protocol::{Envelope, MessageKind};
use crate::store::StateStore;
use crate::view::{View, ViewUpdate};

/// Every background task plus the means to stop them all, mirroring the
/// reference client's shutdown handle (§10.5).
pub struct LanTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl LanTasks {
    /// Cancel every task and wait for them to finish. Calling this twice
    /// is safe: the token is idempotent and an empty handle list is a
    /// no-op join.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

struct Core {
    self_id: String,
    connections: ConnectionManager,
    store: StateStore,
    election: ElectionEngine,
    playback: PlaybackCoordinator,
    view: Box<dyn View>,
}

impl Core {
    fn make_envelope(&self, kind: MessageKind) -> Envelope {
        Envelope {
            sender_id: self.self_id.clone(),
            sender_ip: String::new(),
            clock: self.store.clock().clone(),
            kind,
        }
    }

    async fn broadcast_noncausal(&self, kind: MessageKind) {
        let envelope = self.make_envelope(kind);
        self.connections.broadcast(&envelope).await;
    }

    async fn broadcast_causal(&mut self, kind: MessageKind) {
        let clock = self.store.increment_own_clock();
        let envelope = Envelope {
            sender_id: self.self_id.clone(),
            sender_ip: String::new(),
            clock,
            kind,
        };
        self.connections.broadcast(&envelope).await;
    }

    async fn send_full_state(&self, to: &str) {
        let snapshot = self.store.playback.snapshot(&self.store.playlist);
        let envelope = self.make_envelope(MessageKind::FullState { snapshot });
        if let Err(e) = self.connections.send(to, &envelope).await {
            log::debug!("FULL_STATE send to {} failed: {}", to, e);
        }
    }

    async fn dispatch_election_actions(&mut self, actions: Vec<ElectionAction>) {
        for action in actions {
            match action {
                ElectionAction::SendElection { to, uptime } => {
                    let envelope = self.make_envelope(MessageKind::Election { uptime });
                    for id in to {
                        let _ = self.connections.send(&id, &envelope).await;
                    }
                }
                ElectionAction::SendAnswer { to } => {
                    let envelope = self.make_envelope(MessageKind::Answer);
                    let _ = self.connections.send(&to, &envelope).await;
                }
                ElectionAction::BroadcastCoordinator { leader_id } => {
                    self.broadcast_noncausal(MessageKind::Coordinator { leader_id }).await;
                }
                ElectionAction::StartHeartbeatLoop => {
                    log::info!("became host; heartbeat/playback loop now active");
                }
            }
        }
    }

    async fn dispatch_playback_actions(&mut self, actions: Vec<PlaybackAction>) {
        for action in actions {
            match action {
                PlaybackAction::Heartbeat => self.broadcast_noncausal(MessageKind::Heartbeat).await,
                PlaybackAction::NowPlaying(track) => {
                    self.broadcast_noncausal(MessageKind::NowPlaying { track }).await
                }
                PlaybackAction::QueueRemove(track_id) => {
                    self.broadcast_causal(MessageKind::QueueRemove { track_id }).await
                }
                PlaybackAction::PlaybackSync { position, duration, is_playing } => {
                    self.broadcast_noncausal(MessageKind::PlaybackSync { position, duration, is_playing })
                        .await
                }
                PlaybackAction::PlaybackStatus { is_playing, shuffle, repeat_mode } => {
                    self.broadcast_noncausal(MessageKind::PlaybackStatus { is_playing, shuffle, repeat_mode })
                        .await
                }
                PlaybackAction::MissingFile(track) => {
                    self.render(Some(format!("missing media file: {}", track.file_path)));
                }
            }
        }
    }

    fn render(&mut self, log_line: Option<String>) {
        let update = ViewUpdate {
            role: self.election.role(),
            leader_id: self.election.leader_id().map(|s| s.to_string()),
            playlist: self.store.playlist.clone(),
            current_track: self.store.playback.current_track.clone(),
            position_seconds: self.store.playback.position_seconds,
            duration_seconds: self.store.playback.duration_seconds,
            is_playing: self.store.playback.is_playing,
            shuffle: self.store.playback.shuffle,
            repeat_mode: self.store.playback.repeat_mode,
            log_line,
        };
        self.view.render(&update);
    }

    async fn handle_event(&mut self, event: CoreEvent, core_tx: &mpsc::Sender<CoreEvent>, config: &Config) {
        match event {
            CoreEvent::PeerObserved(observed) => {
                if observed.node_id == self.self_id || self.connections.is_connected(&observed.node_id) {
                    return;
                }
                let connections = self.connections.clone();
                let tx = core_tx.clone();
                let own_tcp_port = config.tcp_port;
                let cancel = CancellationToken::new();
                tokio::spawn(async move {
                    if let Err(e) = connections
                        .connect(observed.node_id.clone(), observed.ip, observed.tcp_port, own_tcp_port, tx, cancel)
                        .await
                    {
                        log::debug!("outbound connect to {} failed: {}", observed.node_id, e);
                    }
                });
            }

            CoreEvent::PeerConnected { id, ip, tcp_port, username } => {
                log::info!("peer connected: {} ({}:{})", id, ip, tcp_port);
                self.store.upsert_peer(&id, &ip, tcp_port);
                let actions = self.election.on_peer_connected(id.clone(), username, Instant::now());
                self.dispatch_election_actions(actions).await;
                if self.election.role() == Role::Host {
                    let welcome = self.make_envelope(MessageKind::Welcome {
                        leader_id: Some(self.self_id.clone()),
                    });
                    let _ = self.connections.send(&id, &welcome).await;
                    self.send_full_state(&id).await;
                }
                self.render(None);
            }

            CoreEvent::PeerDisconnected { id } => {
                log::info!("peer disconnected: {}", id);
                self.store.mark_dead(&id);
                let actions = self.election.on_peer_disconnected(&id, Instant::now());
                self.dispatch_election_actions(actions).await;
                self.render(None);
            }

            CoreEvent::FrameReceived { from, envelope } => {
                self.handle_frame(from, envelope).await;
            }

            CoreEvent::UserIntent(intent) => {
                self.handle_intent(intent).await;
            }

            CoreEvent::Tick(now) => {
                self.handle_tick(now, config).await;
            }
        }
    }

    async fn handle_frame(&mut self, from: String, envelope: Envelope) {
        let now = Instant::now();
        if envelope.kind.is_causal() {
            let (_, applied) = self.store.try_deliver(envelope);
            if !applied.is_empty() {
                self.render(None);
            }
            return;
        }

        match envelope.kind {
            MessageKind::Welcome { leader_id } => {
                if let Some(leader_id) = leader_id {
                    self.election.on_coordinator_received(leader_id.clone(), now);
                    if leader_id != self.self_id {
                        let request = self.make_envelope(MessageKind::RequestState);
                        let _ = self.connections.send(&leader_id, &request).await;
                    }
                }
            }
            MessageKind::Election { uptime } => {
                let actions = self.election.on_election_received(&from, uptime, now);
                self.dispatch_election_actions(actions).await;
            }
            MessageKind::Answer => {
                let actions = self.election.on_answer_received(now);
                self.dispatch_election_actions(actions).await;
            }
            MessageKind::Coordinator { leader_id } => {
                let actions = self.election.on_coordinator_received(leader_id.clone(), now);
                self.dispatch_election_actions(actions).await;
                if leader_id != self.self_id {
                    let request = self.make_envelope(MessageKind::RequestState);
                    let _ = self.connections.send(&leader_id, &request).await;
                }
                self.render(None);
            }
            MessageKind::Heartbeat => {
                self.election.on_heartbeat_received(&from, now);
            }
            MessageKind::RequestState => {
                if self.election.role() == Role::Host {
                    self.send_full_state(&from).await;
                }
            }
            MessageKind::NowPlaying { track } => {
                self.store.playback.current_track = Some(track);
                self.render(None);
            }
            MessageKind::PlaybackSync { position, duration, is_playing } => {
                self.store.playback.position_seconds = position;
                self.store.playback.duration_seconds = duration;
                self.store.playback.is_playing = is_playing;
                self.render(None);
            }
            MessageKind::PlaybackStatus { is_playing, shuffle, repeat_mode } => {
                self.store.playback.is_playing = is_playing;
                self.store.playback.shuffle = shuffle;
                self.store.playback.repeat_mode = repeat_mode;
                self.render(None);
            }
            MessageKind::Hello { .. } => {
                log::warn!("unexpected HELLO after handshake from {}", from);
            }
            MessageKind::QueueAdd { .. }
            | MessageKind::QueueRemove { .. }
            | MessageKind::QueueClear
            | MessageKind::FullState { .. } => unreachable!("causal kinds handled above"),
        }
    }

    async fn handle_intent(&mut self, intent: Intent) {
        if !controller::is_authorized(&intent, self.election.role()) {
            log::debug!("dropping host-only intent from a non-host node: {:?}", intent);
            return;
        }

        match intent {
            Intent::AddTrack { local_path } => {
                let timestamp = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let track = controller::build_track(local_path, self.self_id.clone(), timestamp);
                self.store.add_track_locally(track.clone());
                self.broadcast_causal(MessageKind::QueueAdd { track }).await;
            }
            Intent::RemoveTrack { id } => {
                self.store.remove_track_locally(id);
                self.broadcast_causal(MessageKind::QueueRemove { track_id: id }).await;
            }
            Intent::ClearQueue => {
                self.store.clear_queue_locally();
                self.broadcast_causal(MessageKind::QueueClear).await;
            }
            Intent::PlayPause => {
                let actions = self.playback.play_pause(&mut self.store);
                self.dispatch_playback_actions(actions).await;
            }
            Intent::SkipNext => {
                let actions = self.playback.skip_next(&mut self.store);
                self.dispatch_playback_actions(actions).await;
            }
            Intent::SkipPrev => {
                let actions = self.playback.skip_prev(&mut self.store);
                self.dispatch_playback_actions(actions).await;
            }
            Intent::Seek { percent } => {
                let actions = self.playback.seek(&mut self.store, percent);
                self.dispatch_playback_actions(actions).await;
            }
            Intent::SetShuffle(shuffle) => {
                let actions = self.playback.set_shuffle(&mut self.store, shuffle);
                self.dispatch_playback_actions(actions).await;
            }
            Intent::SetRepeatMode(mode) => {
                let actions = self.playback.set_repeat_mode(&mut self.store, mode);
                self.dispatch_playback_actions(actions).await;
            }
        }
        self.render(None);
    }

    async fn handle_tick(&mut self, now: Instant, config: &Config) {
        let dropped = self.store.sweep_pending();
        if dropped > 0 {
            log::debug!("pending buffer sweep dropped {} expired entries", dropped);
        }

        if self.election.phase() == crate::election::ElectionPhase::Idle && self.election.leader_id().is_none() {
            let actions = self.election.on_startup_grace_elapsed(now);
            self.dispatch_election_actions(actions).await;
        }
        if let Some(deadline) = self.election.election_deadline() {
            if now >= deadline {
                let actions = self.election.on_election_timer_expired(now);
                self.dispatch_election_actions(actions).await;
            }
        }
        if let Some(deadline) = self.election.coordinator_deadline() {
            if now >= deadline {
                let actions = self.election.on_coordinator_timer_expired(now);
                self.dispatch_election_actions(actions).await;
            }
        }
        let actions = self.election.check_host_timeout(now);
        self.dispatch_election_actions(actions).await;

        if self.election.role() == Role::Host {
            let actions = self.playback.tick(&mut self.store);
            self.dispatch_playback_actions(actions).await;
            self.render(None);
        } else if self.store.playback.is_playing {
            // Listener-side smoothing between PLAYBACK_SYNC frames (§4.7).
            let step = config.heartbeat_interval().as_secs_f64();
            let cap = self.store.playback.duration_seconds;
            self.store.playback.position_seconds = (self.store.playback.position_seconds + step).min(cap);
        }
    }
}

/// Spawn every subsystem task and drive the core event loop until
/// cancelled. Returns once shutdown completes.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    config: Config,
    self_id: String,
    self_username: String,
    sink: Box<dyn AudioSink>,
    rng: Box<dyn rand::RngCore + Send>,
    view: Box<dyn View>,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut handles = Vec::new();
    let (core_tx, mut core_rx) = mpsc::channel::<CoreEvent>(256);

    let connections = ConnectionManager::new(self_id.clone(), self_username.clone(), config.max_frame_bytes);

    if let Some(udp_socket) = discovery::try_bind(config.udp_port) {
        let (observed_tx, mut observed_rx) = mpsc::channel(64);
        let listener_cancel = cancel.child_token();
        handles.push(tokio::spawn(discovery::run_beacon_listener(
            self_id.clone(),
            udp_socket,
            observed_tx,
            listener_cancel,
        )));

        let relay_tx = core_tx.clone();
        let relay_cancel = cancel.child_token();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = relay_cancel.cancelled() => break,
                    observed = observed_rx.recv() => match observed {
                        Some(o) => { if relay_tx.send(CoreEvent::PeerObserved(o)).await.is_err() { break; } }
                        None => break,
                    }
                }
            }
        }));

        let broadcaster_cancel = cancel.child_token();
        handles.push(tokio::spawn(discovery::run_beacon_broadcaster(
            self_id.clone(),
            config.tcp_port,
            config.udp_port,
            config.discovery_interval(),
            broadcaster_cancel,
        )));
    }

    let listener = ConnectionManager::bind_with_fallback(config.tcp_port, config.tcp_port_range).await?;
    let bound_tcp_port = listener.local_addr()?.port();
    let accept_manager = connections.clone();
    let accept_tx = core_tx.clone();
    let accept_cancel = cancel.child_token();
    handles.push(tokio::spawn(async move {
        accept_manager.run_accept_loop(listener, bound_tcp_port, accept_tx, accept_cancel).await;
    }));

    let tick_tx = core_tx.clone();
    let tick_cancel = cancel.child_token();
    let tick_interval = config.heartbeat_interval();
    handles.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = tick_cancel.cancelled() => break,
                _ = interval.tick() => {
                    if tick_tx.send(CoreEvent::Tick(Instant::now())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }));

    let store = StateStore::new(
        self_id.clone(),
        config.history_cap,
        config.pending_buffer_cap,
        config.pending_ttl(),
    );
    let election = ElectionEngine::new(
        self_id.clone(),
        self_username,
        Instant::now(),
        config.discovery_grace(),
        config.election_timeout(),
        config.host_timeout(),
        config.uptime_threshold(),
    );
    let mut core = Core {
        self_id,
        connections,
        store,
        election,
        playback: PlaybackCoordinator::new(sink, rng),
        view,
    };

    let lan_tasks = LanTasks { cancel: cancel.clone(), handles };

    let run_loop = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = core_rx.recv() => {
                    match event {
                        Some(event) => core.handle_event(event, &core_tx, &config).await,
                        None => break,
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = run_loop => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown signal received");
        }
    }

    lan_tasks.shutdown().await;
    Ok(())
}
