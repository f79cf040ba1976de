//! The node controller — composes the announcer, the listeners, and the
//! shared state, and owns the start/update/stop lifecycle.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use lanpulse_core::LanpulseConfig;
use lanpulse_services::{NeighborTable, TransferQueue};

use crate::announce::Announcer;
use crate::discovery::{self, BroadcastListener};
use crate::session::{bind_listener, TcpAcceptor};
use crate::{iface, metrics, status};

/// State shared by every task the node runs. Sessions hold an `Arc` of
/// this — the node owns the tasks, the tasks never own the node.
pub struct NodeState {
    pub id: Uuid,
    /// The shared announcement port.
    pub listen_port: u16,
    /// Kernel-assigned port our session listener accepts on.
    pub tcp_port: u16,
    /// True when this node won the election bind and runs the UDP
    /// receive loop for the whole host.
    pub is_listening: bool,
    pub table: NeighborTable,
    pub queue: TransferQueue,
    running: AtomicBool,
    shutdown: broadcast::Sender<()>,
}

impl NodeState {
    pub fn new(
        id: Uuid,
        listen_port: u16,
        tcp_port: u16,
        is_listening: bool,
        local_addrs: HashSet<Ipv4Addr>,
    ) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(4);
        Arc::new(Self {
            id,
            listen_port,
            tcp_port,
            is_listening,
            table: NeighborTable::new(local_addrs),
            queue: TransferQueue::new(),
            running: AtomicBool::new(false),
            shutdown,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// A fresh shutdown receiver for a task about to start.
    pub fn shutdown_rx(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    fn signal_shutdown(&self) {
        // No receivers is fine — nothing started yet.
        let _ = self.shutdown.send(());
    }
}

pub struct Node {
    state: Arc<NodeState>,
    announcer: Announcer,
    udp_socket: Option<Arc<tokio::net::UdpSocket>>,
    tcp_listener: Option<tokio::net::TcpListener>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Build the node's sockets and shared state. Order matters: the
    /// election bind decides our role, and the session listener must
    /// exist (so its port is known) before the first announcement can
    /// be sent.
    pub async fn init(config: &LanpulseConfig, id: Uuid) -> Result<Self> {
        let listen_port = config.network.listen_port;

        let broadcast_addr = iface::broadcast_ipv4().context("no usable broadcast interface")?;
        let local_addrs = iface::local_ipv4_set().context("interface enumeration failed")?;

        let udp_socket = discovery::bind_election(listen_port)
            .context("announcement port bind failed")?;
        let is_listening = udp_socket.is_some();
        if is_listening {
            tracing::info!(port = listen_port, "announcement port bound, this node is the host master");
        } else {
            tracing::info!(
                port = listen_port,
                "announcement port already held, relying on the master's forward"
            );
        }

        let announcer = Announcer::bind(broadcast_addr, listen_port).await?;

        let (tcp_listener, tcp_port) = bind_listener().context("session listener bind failed")?;

        let udp_socket = udp_socket
            .map(tokio::net::UdpSocket::from_std)
            .transpose()
            .context("announcement socket registration")?
            .map(Arc::new);

        let state = NodeState::new(id, listen_port, tcp_port, is_listening, local_addrs);
        tracing::info!(node = %id, tcp_port, "node initialized");

        Ok(Self {
            state,
            announcer,
            udp_socket,
            tcp_listener: Some(tcp_listener),
            tasks: Vec::new(),
        })
    }

    /// Spawn the receive loops. Master nodes run the broadcast listener;
    /// everyone runs the session accept loop.
    pub fn start(&mut self) {
        self.state.set_running(true);

        if let Some(socket) = self.udp_socket.take() {
            let listener =
                BroadcastListener::new(socket, self.state.clone(), self.state.shutdown_rx());
            self.tasks.push(tokio::spawn(async move {
                if let Err(e) = listener.run().await {
                    tracing::error!(error = ?e, "broadcast listener exited");
                }
            }));
        }

        if let Some(listener) = self.tcp_listener.take() {
            let acceptor = TcpAcceptor::new(listener, self.state.clone(), self.state.shutdown_rx());
            self.tasks.push(tokio::spawn(async move {
                if let Err(e) = acceptor.run().await {
                    tracing::error!(error = ?e, "session listener exited");
                }
            }));
        }
    }

    /// One heartbeat: announce, queue probes, dump the table.
    pub async fn update(&self) {
        self.announcer.announce(self.state.id, self.state.tcp_port).await;
        metrics::tick(&self.state);
        status::log_neighbors(&self.state.table);
    }

    /// Stop every loop and session, then drop all shared state. The
    /// running flag handles loops at their next boundary; the shutdown
    /// signal and the dropped queue slots interrupt the blocked ones.
    pub async fn stop(&mut self) {
        self.state.set_running(false);
        self.state.signal_shutdown();

        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        // Dropping the slots wakes every session still parked on one.
        self.state.queue.clear();
        self.state.table.clear();
        tracing::info!(node = %self.state.id, "node stopped");
    }

    pub fn is_listening(&self) -> bool {
        self.state.is_listening
    }

    pub fn tcp_port(&self) -> u16 {
        self.state.tcp_port
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }
}
