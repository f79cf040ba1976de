//! Heartbeat metrics pass.
//!
//! Each tick queues one `ping <now_ms>` on every live session. The
//! scheduler keeps no state between ticks — the echoed timestamp is the
//! whole correlation, and the session handler does the subtraction when
//! the pong comes back.

use std::time::{SystemTime, UNIX_EPOCH};

use lanpulse_core::Message;

use crate::node::NodeState;

/// Queue a latency probe on every sessioned neighbor.
pub fn tick(state: &NodeState) {
    let probe = Message::Ping(now_ms()).to_string();
    for neighbor in state.table.snapshot() {
        let Some(session) = neighbor.session else {
            continue;
        };
        if !state.queue.set(session.id, probe.clone()) {
            tracing::debug!(peer = %neighbor.id, "probe skipped, session slot gone");
        }
    }
}

/// Milliseconds since the epoch — the timestamp carried in probes.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
