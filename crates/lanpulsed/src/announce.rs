//! Presence announcer — one broadcast datagram per heartbeat.
//!
//! Every node announces `add <id> <tcp_port>` to the LAN broadcast
//! address on the shared listen port, whether or not it won the master
//! election. A failed send is worth a warning and nothing more; the
//! next heartbeat repeats the announcement anyway.

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use uuid::Uuid;

use lanpulse_core::Message;

pub struct Announcer {
    socket: UdpSocket,
    dest: SocketAddrV4,
}

impl Announcer {
    /// Create the broadcast socket. Destination is the LAN broadcast
    /// address on the shared announcement port.
    pub async fn bind(broadcast_addr: Ipv4Addr, listen_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .context("failed to bind announcement socket")?;
        socket.set_broadcast(true).context("SO_BROADCAST")?;

        Ok(Self {
            socket,
            dest: SocketAddrV4::new(broadcast_addr, listen_port),
        })
    }

    /// Send one announcement frame.
    pub async fn announce(&self, id: Uuid, tcp_port: u16) {
        let frame = Message::Add { id, tcp_port }.to_frame();
        match self.socket.send_to(&frame, self.dest).await {
            Ok(n) => tracing::trace!(bytes = n, dest = %self.dest, "announcement sent"),
            Err(e) => tracing::warn!(error = %e, dest = %self.dest, "announcement send failed"),
        }
    }
}
