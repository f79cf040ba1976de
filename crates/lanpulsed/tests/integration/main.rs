//! lanpulsed integration harness.
//!
//! Tests drive the engine in-process over loopback sockets: announcement
//! frames are injected straight into the datagram path and sessions run
//! on real TCP connections to 127.0.0.1. Nothing here needs a
//! broadcast-capable network, so the suite runs unprivileged.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use lanpulse_core::{wire, FRAME_LEN};
use lanpulsed::node::NodeState;

mod lifecycle;
mod metrics;
mod sessions;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const NODE_A: &str = "11111111-1111-1111-1111-111111111111";
pub const NODE_B: &str = "22222222-2222-2222-2222-222222222222";
pub const NODE_C: &str = "33333333-3333-3333-3333-333333333333";

pub fn node_id(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap()
}

/// A ready-to-run node state with no real sockets behind it. `locals`
/// is the set of addresses treated as this host's own.
pub fn test_state(own: &str, locals: &[&str]) -> Arc<NodeState> {
    let locals: HashSet<Ipv4Addr> = locals.iter().map(|a| a.parse().unwrap()).collect();
    let state = NodeState::new(node_id(own), 8000, 40123, true, locals);
    state.set_running(true);
    state
}

/// Null-padded frame bytes for arbitrary payload text.
pub fn raw_frame(text: &str) -> [u8; FRAME_LEN] {
    wire::pad_frame(text).unwrap()
}

/// Poll until `cond` holds or two seconds pass.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
