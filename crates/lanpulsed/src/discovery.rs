//! Announcement intake — master election on the shared UDP port and
//! the master's receive loop.
//!
//! Exactly one process per host can bind the announcement port; the
//! bind itself is the election (deliberately no SO_REUSEADDR). The
//! winner receives for the whole host and re-emits every datagram,
//! verbatim and before parsing it, to the TCP sessions of its local
//! siblings — losers never touch the UDP socket at all.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use uuid::Uuid;

use lanpulse_core::{wire, Message, FRAME_LEN};
use lanpulse_services::UpsertOutcome;

use crate::node::NodeState;
use crate::session;

/// Contend for the announcement port. `Ok(Some)` means this node is the
/// host's master; `Ok(None)` means another local node already holds the
/// port and we will see announcements over its TCP forward instead.
pub fn bind_election(listen_port: u16) -> io::Result<Option<std::net::UdpSocket>> {
    match std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, listen_port)) {
        Ok(socket) => {
            socket.set_nonblocking(true)?;
            Ok(Some(socket))
        }
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Ok(None),
        Err(e) => Err(e),
    }
}

/// The master's receive loop. One instance per host, spawned only when
/// the election bind succeeded.
pub struct BroadcastListener {
    socket: Arc<tokio::net::UdpSocket>,
    state: Arc<NodeState>,
    shutdown: broadcast::Receiver<()>,
}

impl BroadcastListener {
    pub fn new(
        socket: Arc<tokio::net::UdpSocket>,
        state: Arc<NodeState>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            state,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        tracing::info!(port = self.state.listen_port, "broadcast listener starting");

        loop {
            if !self.state.is_running() {
                return Ok(());
            }

            // Fresh buffer per datagram: the previous frame may still be
            // queued toward sibling sessions when the next recv lands.
            let mut buf = [0u8; FRAME_LEN];

            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("broadcast listener shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, src) = result.context("recv_from failed on announcement port")?;
                    let src_ip = match src {
                        SocketAddr::V4(v4) => *v4.ip(),
                        SocketAddr::V6(_) => {
                            tracing::warn!("ignoring IPv6 datagram on announcement port");
                            continue;
                        }
                    };
                    process_datagram(&self.state, &buf[..len], src_ip);
                }
            }
        }
    }
}

/// Handle one received announcement datagram: first hand the raw bytes
/// to every local sibling, then parse and act. The forward must come
/// first — siblings always see the original payload, even one the
/// master itself rejects.
pub fn process_datagram(state: &Arc<NodeState>, raw: &[u8], src_ip: Ipv4Addr) {
    forward_to_siblings(state, raw);

    let text = wire::frame_text(raw);
    match Message::parse(&text) {
        Ok(Message::Add { id, tcp_port }) => note_peer(state, id, src_ip, tcp_port),
        Ok(other) => {
            tracing::warn!(verb = %other, addr = %src_ip, "unexpected verb on announcement port, dropping");
        }
        Err(e) => {
            tracing::warn!(error = %e, payload = %text, addr = %src_ip, "malformed announcement, dropping");
        }
    }
}

/// Record an announced peer, starting the outbound session when the
/// peer is new. Shared by the UDP path and the TCP `add` path; both
/// filter our own announcements here.
pub fn note_peer(state: &Arc<NodeState>, id: Uuid, ip: Ipv4Addr, tcp_port: u16) {
    if id == state.id {
        tracing::trace!("ignoring own announcement");
        return;
    }

    if state.table.upsert(id, ip, tcp_port, None) == UpsertOutcome::Inserted {
        tracing::info!(peer = %id, addr = %ip, tcp_port, "peer discovered");
        session::connect_to_peer(state.clone(), id, ip, tcp_port);
    }
}

fn forward_to_siblings(state: &Arc<NodeState>, raw: &[u8]) {
    let text = wire::frame_text(raw);
    for sibling in state.table.local_snapshot() {
        let Some(session) = sibling.session else {
            continue;
        };
        if state.queue.set(session.id, text.clone()) {
            tracing::trace!(peer = %sibling.id, "datagram forwarded to sibling");
        } else {
            tracing::debug!(peer = %sibling.id, "sibling slot gone, forward skipped");
        }
    }
}
