//! Neighbor table — every node known on the LAN, keyed by node id.
//!
//! Shared between the broadcast listener (inserts from announcements),
//! per-peer sessions (late session binding, metric updates), and the
//! metrics scheduler (snapshot iteration). All mutation goes through a
//! single lock; the membership decision in [`NeighborTable::upsert`] is
//! therefore the one place a new outbound connection can originate, so
//! two announcement paths can never race a duplicate connect toward the
//! same peer.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};

use parking_lot::Mutex;
use uuid::Uuid;

use lanpulse_core::FRAME_LEN;

/// Identifies one live session task. Unique for the process lifetime.
pub type SessionId = u64;

/// Cheap, copyable reference to the session task that owns a peer socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: SessionId,
    /// Remote address of the owned socket.
    pub peer_addr: SocketAddr,
}

/// One record per known peer.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: Uuid,
    pub ip: Ipv4Addr,
    pub tcp_port: u16,
    /// The owning session, or `None` while a connect is pending.
    pub session: Option<SessionHandle>,
    /// Last measured round trip. 0 until the first pong arrives.
    pub latency_ms: u64,
    /// Frame bytes per millisecond, derived from `latency_ms`.
    pub bandwidth: f64,
    /// True iff `ip` is one of this host's own interface addresses.
    pub is_local: bool,
}

impl Neighbor {
    fn new(
        id: Uuid,
        ip: Ipv4Addr,
        tcp_port: u16,
        is_local: bool,
        session: Option<SessionHandle>,
    ) -> Self {
        Self {
            id,
            ip,
            tcp_port,
            session,
            latency_ms: 0,
            bandwidth: 0.0,
            is_local,
        }
    }
}

/// What an [`NeighborTable::upsert`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New neighbor created. The caller that sees this (and supplied no
    /// session) is the one that initiates the outbound connect.
    Inserted,
    /// Already known; entry untouched.
    Existed,
    /// Already known and sessionless; the offered session was bound.
    SessionBound,
    /// Already known with a live session; the offered session is
    /// redundant and must be closed by its caller.
    SessionRefused,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// A metric update arrived for a session no neighbor owns. Happens
    /// when a pong races session teardown; never fatal.
    #[error("no neighbor owns session {0}")]
    UnknownSession(SessionId),
}

/// The table. Construct once per node with the host's own interface
/// addresses; entries live until [`NeighborTable::clear`] at shutdown.
pub struct NeighborTable {
    neighbors: Mutex<HashMap<Uuid, Neighbor>>,
    local_addrs: HashSet<Ipv4Addr>,
}

impl NeighborTable {
    pub fn new(local_addrs: HashSet<Ipv4Addr>) -> Self {
        Self {
            neighbors: Mutex::new(HashMap::new()),
            local_addrs,
        }
    }

    /// Insert a newly observed peer, or late-bind a session to a known
    /// one. First observation wins: a repeat `add` never rewrites the
    /// recorded ip or port.
    pub fn upsert(
        &self,
        id: Uuid,
        ip: Ipv4Addr,
        tcp_port: u16,
        session: Option<SessionHandle>,
    ) -> UpsertOutcome {
        let mut neighbors = self.neighbors.lock();
        match neighbors.entry(id) {
            Entry::Vacant(slot) => {
                let is_local = self.local_addrs.contains(&ip);
                slot.insert(Neighbor::new(id, ip, tcp_port, is_local, session));
                UpsertOutcome::Inserted
            }
            Entry::Occupied(mut slot) => match (session, slot.get().session) {
                (Some(offered), None) => {
                    slot.get_mut().session = Some(offered);
                    UpsertOutcome::SessionBound
                }
                (Some(offered), Some(bound)) if offered.id == bound.id => UpsertOutcome::Existed,
                (Some(_), Some(_)) => UpsertOutcome::SessionRefused,
                (None, _) => UpsertOutcome::Existed,
            },
        }
    }

    /// Record a round-trip sample against whichever neighbor owns the
    /// session, recomputing bandwidth.
    pub fn update_metrics(&self, session: SessionId, latency_ms: u64) -> Result<(), TableError> {
        let mut neighbors = self.neighbors.lock();
        let neighbor = neighbors
            .values_mut()
            .find(|n| n.session.map(|s| s.id) == Some(session))
            .ok_or(TableError::UnknownSession(session))?;
        neighbor.latency_ms = latency_ms;
        neighbor.bandwidth = if latency_ms > 0 {
            FRAME_LEN as f64 / latency_ms as f64
        } else {
            0.0
        };
        Ok(())
    }

    /// Consistent copy of every entry, taken under the lock.
    pub fn snapshot(&self) -> Vec<Neighbor> {
        self.neighbors.lock().values().cloned().collect()
    }

    /// Consistent copy of the local-sibling sub-view.
    pub fn local_snapshot(&self) -> Vec<Neighbor> {
        self.neighbors
            .lock()
            .values()
            .filter(|n| n.is_local)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &Uuid) -> Option<Neighbor> {
        self.neighbors.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.neighbors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.lock().is_empty()
    }

    /// Shutdown only. Entries are never removed individually.
    pub fn clear(&self) {
        self.neighbors.lock().clear();
    }
}
