//! Per-peer TCP sessions — the shared accept loop and the session task
//! that owns one socket and speaks the frame protocol on it.

pub mod handler;
pub mod listener;

pub use handler::{connect_to_peer, react, spawn_inbound, Reaction};
pub use listener::{bind_listener, TcpAcceptor};

use std::sync::atomic::{AtomicU64, Ordering};

use lanpulse_services::SessionId;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique session id.
fn next_session_id() -> SessionId {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}
