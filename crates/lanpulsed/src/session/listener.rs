//! Inbound session listener.
//!
//! The TCP port is kernel-assigned and published in every announcement
//! frame; each accepted connection becomes one session task.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::node::NodeState;
use crate::session::handler;

/// Backlog for the session listener.
const LISTEN_BACKLOG: i32 = 10;

/// Create the session listener on an OS-assigned port. Returns the
/// listener and the port peers must be told about.
pub fn bind_listener() -> Result<(TcpListener, u16)> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())
        .context("bind()")?;
    socket.listen(LISTEN_BACKLOG).context("listen()")?;

    let listener = TcpListener::from_std(socket.into()).context("listener registration")?;
    let port = listener.local_addr().context("local_addr()")?.port();
    Ok((listener, port))
}

/// The accept loop. Spawns one inbound session per connection.
pub struct TcpAcceptor {
    listener: TcpListener,
    state: Arc<NodeState>,
    shutdown: broadcast::Receiver<()>,
}

impl TcpAcceptor {
    pub fn new(
        listener: TcpListener,
        state: Arc<NodeState>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            state,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        tracing::info!(port = self.state.tcp_port, "session listener starting");

        loop {
            if !self.state.is_running() {
                return Ok(());
            }

            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("session listener shutting down");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            tracing::debug!(%peer_addr, "inbound session accepted");
                            handler::spawn_inbound(self.state.clone(), stream, peer_addr);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                        Err(e) => {
                            return Err(e).context("accept failed");
                        }
                    }
                }
            }
        }
    }
}
