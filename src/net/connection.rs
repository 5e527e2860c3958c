//! TCP mesh connection manager (§4.3).
//!
//! Keeps a registry of live outbound/inbound connections keyed by peer
//! id, each with its own write lock so sends never contend with each
//! other across peers (§5: "the connection registry uses its own lock
//! to avoid coupling TCP I/O to state reads"). Every accepted frame is
//! forwarded to the core task as a [`CoreEvent::FrameReceived`]; nothing
//! here touches the state store directly.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::event::CoreEvent;
use crate::protocol::{encode_envelope, read_envelope, Envelope, MessageKind};

struct PeerConnection {
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    cancel: CancellationToken,
}

/// `peer_id -> live TCP connection` (§4.3), plus enough bookkeeping to
/// bind a listener with port fallback and prevent self-connections.
#[derive(Clone)]
pub struct ConnectionManager {
    self_id: String,
    self_username: String,
    max_frame_bytes: u32,
    registry: Arc<SyncMutex<HashMap<String, PeerConnection>>>,
}

impl ConnectionManager {
    pub fn new(self_id: String, self_username: String, max_frame_bytes: u32) -> Self {
        Self {
            self_id,
            self_username,
            max_frame_bytes,
            registry: Arc::new(SyncMutex::new(HashMap::new())),
        }
    }

    /// Bind TCP starting from `start_port`, incrementing until success or
    /// `start_port + range` is exhausted (§4.3 port allocation).
    pub async fn bind_with_fallback(
        start_port: u16,
        range: u16,
    ) -> Result<TcpListener, TransportError> {
        let end = start_port.saturating_add(range);
        let mut port = start_port;
        loop {
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => return Ok(listener),
                Err(e) => {
                    log::debug!("tcp bind on port {} failed: {}", port, e);
                    if port >= end {
                        return Err(TransportError::TcpPortExhausted {
                            start: start_port,
                            end,
                        });
                    }
                    port += 1;
                }
            }
        }
    }

    pub fn connected_peer_ids(&self) -> Vec<String> {
        self.registry.lock().keys().cloned().collect()
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.registry.lock().contains_key(id)
    }

    /// Accept loop: the first frame on every new connection must be
    /// `HELLO` (§4.3); anything else is a protocol violation and the
    /// connection is closed without crashing the listener.
    pub async fn run_accept_loop(
        &self,
        listener: TcpListener,
        own_tcp_port: u16,
        core_tx: mpsc::Sender<CoreEvent>,
        cancel: CancellationToken,
    ) {
        log::info!("tcp mesh listening on {:?}", listener.local_addr());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let this = self.clone();
                            let tx = core_tx.clone();
                            let ct = cancel.child_token();
                            tokio::spawn(async move {
                                if let Err(e) = this
                                    .handle_inbound(stream, peer_addr.ip().to_string(), own_tcp_port, tx, ct)
                                    .await
                                {
                                    log::warn!("inbound session from {} ended: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => log::warn!("tcp accept error: {}", e),
                    }
                }
            }
        }
        log::debug!("tcp accept loop stopped");
    }

    async fn handle_inbound(
        &self,
        stream: TcpStream,
        peer_ip: String,
        own_tcp_port: u16,
        core_tx: mpsc::Sender<CoreEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        let first = read_envelope(&mut reader, self.max_frame_bytes).await?;
        let (peer_id, peer_tcp_port, peer_username) = match first.kind {
            MessageKind::Hello { tcp_port, username } => (first.sender_id, tcp_port, username),
            other => {
                anyhow::bail!("expected HELLO as first frame, got {}", other.name());
            }
        };

        if peer_id == self.self_id {
            log::debug!("dropping inbound HELLO bearing our own id");
            return Ok(());
        }

        let hello_back = Envelope {
            sender_id: self.self_id.clone(),
            sender_ip: String::new(),
            clock: Default::default(),
            kind: MessageKind::Hello {
                tcp_port: own_tcp_port,
                username: self.self_username.clone(),
            },
        };
        writer.write_all(&encode_envelope(&hello_back)).await?;

        self.register(&peer_id, writer, cancel.clone());
        let _ = core_tx
            .send(CoreEvent::PeerConnected {
                id: peer_id.clone(),
                ip: peer_ip,
                tcp_port: peer_tcp_port,
                username: peer_username,
            })
            .await;

        self.run_reader(peer_id, reader, core_tx, cancel).await;
        Ok(())
    }

    /// Open an outbound TCP connection and send our own `HELLO` (§4.3).
    pub async fn connect(
        &self,
        id: String,
        ip: String,
        tcp_port: u16,
        own_tcp_port: u16,
        core_tx: mpsc::Sender<CoreEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        if id == self.self_id {
            return Ok(()); // self-loop prevention
        }
        if self.is_connected(&id) {
            return Ok(());
        }

        let stream = TcpStream::connect((ip.as_str(), tcp_port)).await?;
        let (mut reader, mut writer) = stream.into_split();

        let hello = Envelope {
            sender_id: self.self_id.clone(),
            sender_ip: String::new(),
            clock: Default::default(),
            kind: MessageKind::Hello {
                tcp_port: own_tcp_port,
                username: self.self_username.clone(),
            },
        };
        writer.write_all(&encode_envelope(&hello)).await?;

        let reply = read_envelope(&mut reader, self.max_frame_bytes).await?;
        let peer_username = match reply.kind {
            MessageKind::Hello { username, .. } => username,
            other => anyhow::bail!("expected HELLO reply, got {}", other.name()),
        };

        self.register(&id, writer, cancel.clone());
        let _ = core_tx
            .send(CoreEvent::PeerConnected {
                id: id.clone(),
                ip,
                tcp_port,
                username: peer_username,
            })
            .await;

        self.run_reader(id, reader, core_tx, cancel).await;
        Ok(())
    }

    fn register(&self, id: &str, writer: OwnedWriteHalf, cancel: CancellationToken) {
        let mut registry = self.registry.lock();
        if let Some(old) = registry.insert(
            id.to_string(),
            PeerConnection {
                writer: Arc::new(AsyncMutex::new(writer)),
                cancel: cancel.clone(),
            },
        ) {
            // A newer connection replaces an older one (§4.3).
            old.cancel.cancel();
        }
    }

    async fn run_reader(
        &self,
        id: String,
        mut reader: tokio::net::tcp::OwnedReadHalf,
        core_tx: mpsc::Sender<CoreEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = read_envelope(&mut reader, self.max_frame_bytes) => {
                    match result {
                        Ok(envelope) => {
                            if core_tx
                                .send(CoreEvent::FrameReceived { from: id.clone(), envelope })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => {
                            log::info!("connection to {} closed: {}", id, e);
                            break;
                        }
                    }
                }
            }
        }

        self.registry.lock().remove(&id);
        let _ = core_tx.send(CoreEvent::PeerDisconnected { id }).await;
    }

    /// `send(peer_id, ...)`: single write under the per-connection lock.
    /// Failure removes the connection from the registry (§4.3).
    pub async fn send(&self, peer_id: &str, envelope: &Envelope) -> anyhow::Result<()> {
        let writer = {
            let registry = self.registry.lock();
            registry.get(peer_id).map(|c| c.writer.clone())
        };
        let Some(writer) = writer else {
            anyhow::bail!("no connection to {}", peer_id);
        };

        let bytes = encode_envelope(envelope);
        let mut w = writer.lock().await;
        if let Err(e) = w.write_all(&bytes).await {
            drop(w);
            self.registry.lock().remove(peer_id);
            anyhow::bail!("send to {} failed: {}", peer_id, e);
        }
        Ok(())
    }

    /// Iterate the current registry and attempt a send to each; per-peer
    /// failures are non-fatal to the broadcast (§4.3).
    pub async fn broadcast(&self, envelope: &Envelope) {
        let ids: Vec<String> = self.registry.lock().keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.send(&id, envelope).await {
                log::debug!("broadcast to {} failed: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::clock::VectorClock;

    #[tokio::test]
    async fn handshake_then_frame_forwarded_to_core() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let manager = ConnectionManager::new("host01".into(), "host-user".into(), 1024 * 1024);
        let (core_tx, mut core_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let accept_manager = manager.clone();
        let accept_cancel = cancel.clone();
        let accept_tx = core_tx.clone();
        tokio::spawn(async move {
            accept_manager
                .run_accept_loop(listener, 5001, accept_tx, accept_cancel)
                .await;
        });

        // Minimal client: connect, send HELLO, read HELLO back, send a
        // causal frame, and confirm the manager relays it to the core.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let hello = Envelope {
            sender_id: "client01".into(),
            sender_ip: String::new(),
            clock: VectorClock::new(),
            kind: MessageKind::Hello { tcp_port: 5002, username: "client-user".into() },
        };
        stream.write_all(&encode_envelope(&hello)).await.unwrap();

        let mut len_buf = [0u8; 4];
        use tokio::io::AsyncReadExt;
        stream.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();

        let heartbeat = Envelope {
            sender_id: "client01".into(),
            sender_ip: String::new(),
            clock: VectorClock::new(),
            kind: MessageKind::Heartbeat,
        };
        stream.write_all(&encode_envelope(&heartbeat)).await.unwrap();

        let connected = tokio::time::timeout(std::time::Duration::from_secs(2), core_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(connected, CoreEvent::PeerConnected { id, .. } if id == "client01"));

        let framed = tokio::time::timeout(std::time::Duration::from_secs(2), core_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match framed {
            CoreEvent::FrameReceived { from, envelope } => {
                assert_eq!(from, "client01");
                assert!(matches!(envelope.kind, MessageKind::Heartbeat));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        cancel.cancel();
    }

    #[tokio::test]
    async fn self_hello_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let manager = ConnectionManager::new("same-id".into(), "same-user".into(), 1024 * 1024);
        let (core_tx, mut core_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let accept_manager = manager.clone();
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            accept_manager.run_accept_loop(listener, 5001, core_tx, accept_cancel).await;
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let hello = Envelope {
            sender_id: "same-id".into(),
            sender_ip: String::new(),
            clock: VectorClock::new(),
            kind: MessageKind::Hello { tcp_port: 5002, username: "same-user".into() },
        };
        stream.write_all(&encode_envelope(&hello)).await.unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_millis(300), core_rx.recv()).await;
        assert!(result.is_err(), "self HELLO should not produce a PeerConnected event");
        cancel.cancel();
    }
}
