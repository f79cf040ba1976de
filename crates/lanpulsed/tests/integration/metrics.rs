use crate::*;

use std::sync::Arc;

use lanpulse_core::{Message, FRAME_LEN};
use lanpulse_services::SessionHandle;
use lanpulsed::metrics;
use lanpulsed::node::NodeState;
use lanpulsed::session::{react, Reaction};

fn bound_handle(state: &Arc<NodeState>, peer: &str, session: u64) -> SessionHandle {
    let handle = SessionHandle {
        id: session,
        peer_addr: "127.0.0.2:4001".parse().unwrap(),
    };
    state
        .table
        .upsert(node_id(peer), "127.0.0.2".parse().unwrap(), 4001, Some(handle));
    handle
}

/// The latency arithmetic: a pong echoing T observed at now yields
/// `now − T` milliseconds and the derived frame-bytes-per-ms bandwidth.
#[tokio::test]
async fn pong_updates_latency_and_bandwidth() {
    let state = test_state(NODE_A, &[]);
    let handle = bound_handle(&state, NODE_B, 5);

    assert_eq!(react(&state, handle, "pong 1000", 1025), Reaction::None);

    let b = state.table.get(&node_id(NODE_B)).unwrap();
    assert_eq!(b.latency_ms, 25);
    assert_eq!(b.bandwidth, FRAME_LEN as f64 / 25.0);
}

/// A pong for a session nobody owns is dropped without side effects.
#[tokio::test]
async fn orphan_pong_is_nonfatal() {
    let state = test_state(NODE_A, &[]);
    let orphan = SessionHandle {
        id: 99,
        peer_addr: "127.0.0.2:4001".parse().unwrap(),
    };

    assert_eq!(react(&state, orphan, "pong 1000", 1025), Reaction::None);
    assert!(state.table.is_empty());
}

/// Pings are answered with the timestamp echoed untouched.
#[tokio::test]
async fn ping_reaction_echoes_the_timestamp() {
    let state = test_state(NODE_A, &[]);
    let handle = bound_handle(&state, NODE_B, 5);

    assert_eq!(
        react(&state, handle, "ping 777", 9999),
        Reaction::Reply(Message::Pong(777))
    );
}

/// A tick queues one probe per sessioned neighbor and skips the rest;
/// a second tick overwrites an unconsumed probe instead of queueing two.
#[tokio::test]
async fn tick_queues_probes_on_sessioned_neighbors_only() {
    let state = test_state(NODE_A, &[]);
    let mut slot = state.queue.register(5);
    bound_handle(&state, NODE_B, 5);
    // C is known but has no session yet.
    state
        .table
        .upsert(node_id(NODE_C), "127.0.0.3".parse().unwrap(), 4002, None);

    metrics::tick(&state);
    metrics::tick(&state);

    assert!(slot.has_changed().unwrap());
    let probe = slot.borrow_and_update().clone();
    assert!(probe.starts_with("ping "), "unexpected probe: {probe}");
    // Overwritten, not accumulated: nothing further pending.
    assert!(!slot.has_changed().unwrap());
}
