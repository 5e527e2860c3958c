//! UDP broadcast discovery (§4.2).
//!
//! Two async tasks: a beacon broadcaster and a beacon listener. Discovered
//! peers are reported as a channel of `PeerObserved` events rather than a
//! callback, per the design notes — the connection manager / core task
//! consumes the channel instead of being invoked from inside this module.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use crate::protocol::{decode_beacon, encode_beacon, DiscoveryBeacon};

/// A peer observed via a discovery beacon: `(peer_id, ip, tcp_port)` (§2).
#[derive(Debug, Clone)]
pub struct PeerObserved {
    pub node_id: String,
    pub ip: String,
    pub tcp_port: u16,
}

/// Bind a UDP socket with `SO_REUSEADDR` (and `SO_REUSEPORT` where
/// available) so multiple instances can share the discovery port on one
/// host during development (§4.2 constraint).
fn bind_reusable_udp(port: u16) -> std::io::Result<std::net::UdpSocket> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket2::SockAddr::from(addr))?;
    Ok(socket.into())
}

/// Attempt to bind the discovery UDP port. Per §7, a bind failure
/// disables discovery but is not fatal to the process; the caller logs
/// and continues without spawning the discovery tasks.
pub fn try_bind(port: u16) -> Option<UdpSocket> {
    match bind_reusable_udp(port) {
        Ok(std_socket) => match UdpSocket::from_std(std_socket) {
            Ok(s) => Some(s),
            Err(e) => {
                log::error!("discovery: failed to adopt UDP socket into tokio: {}", e);
                None
            }
        },
        Err(e) => {
            log::warn!("discovery: bind failed on UDP port {}: {} (discovery disabled)", port, e);
            None
        }
    }
}

/// Periodically broadcasts a `HELLO` beacon to the subnet broadcast
/// address and to loopback (§4.2).
pub async fn run_beacon_broadcaster(
    node_id: String,
    tcp_port: u16,
    discovery_port: u16,
    interval_period: Duration,
    cancel: CancellationToken,
) {
    let socket = match UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(s) => s,
        Err(e) => {
            log::error!("discovery broadcaster: bind failed: {}", e);
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        log::error!("discovery broadcaster: set_broadcast failed: {}", e);
        return;
    }

    let targets = [
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, discovery_port)),
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, discovery_port)),
    ];

    log::info!("discovery broadcaster started (port={}, tcp_port={})", discovery_port, tcp_port);

    let beacon = DiscoveryBeacon {
        node_id: node_id.clone(),
        local_ip: local_ip_guess(),
        tcp_port,
    };
    let packet = encode_beacon(&beacon);

    let mut tick = interval(interval_period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                for target in targets {
                    if let Err(e) = socket.send_to(&packet, target).await {
                        log::warn!("discovery beacon send to {} failed: {}", target, e);
                    }
                }
            }
        }
    }
    log::debug!("discovery broadcaster stopped");
}

/// Listens for beacons from other peers and reports them on `observed_tx`.
/// Beacons bearing our own `node_id` are dropped (self-loop prevention).
pub async fn run_beacon_listener(
    own_node_id: String,
    socket: UdpSocket,
    observed_tx: mpsc::Sender<PeerObserved>,
    cancel: CancellationToken,
) {
    log::info!("discovery listener started");
    let mut buf = [0u8; 2048];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, src_addr)) => {
                        if let Some(beacon) = decode_beacon(&buf[..len]) {
                            if beacon.node_id == own_node_id {
                                continue;
                            }
                            let observed = PeerObserved {
                                node_id: beacon.node_id,
                                ip: src_addr.ip().to_string(),
                                tcp_port: beacon.tcp_port,
                            };
                            if observed_tx.send(observed).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("discovery recv error: {}", e);
                    }
                }
            }
        }
    }
    log::debug!("discovery listener stopped");
}

/// Best-effort local IPv4 address for the beacon body; the listener only
/// relies on the UDP source address, so a wrong guess here is cosmetic.
fn local_ip_guess() -> String {
    match std::net::UdpSocket::bind("0.0.0.0:0").and_then(|s| {
        s.connect("8.8.8.8:80")?;
        s.local_addr()
    }) {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => "0.0.0.0".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_listener_ignores_self_beacons_and_reports_others() {
        let listener_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let listener_addr = listener_socket.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(run_beacon_listener(
            "self01".into(),
            listener_socket,
            tx,
            cancel_clone,
        ));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Self beacon: must be ignored.
        let self_beacon = encode_beacon(&DiscoveryBeacon {
            node_id: "self01".into(),
            local_ip: "127.0.0.1".into(),
            tcp_port: 5001,
        });
        sender.send_to(&self_beacon, listener_addr).await.unwrap();

        // Other beacon: must be reported.
        let other_beacon = encode_beacon(&DiscoveryBeacon {
            node_id: "other01".into(),
            local_ip: "127.0.0.1".into(),
            tcp_port: 5002,
        });
        sender.send_to(&other_beacon, listener_addr).await.unwrap();

        let observed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for observation")
            .expect("channel closed");
        assert_eq!(observed.node_id, "other01");
        assert_eq!(observed.tcp_port, 5002);

        cancel.cancel();
        let _ = handle.await;
    }
}
