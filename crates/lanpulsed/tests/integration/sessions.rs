use crate::*;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use lanpulse_core::{wire, Message, FRAME_LEN};
use lanpulsed::discovery::process_datagram;
use lanpulsed::node::NodeState;
use lanpulsed::session::{bind_listener, TcpAcceptor};

/// Spawn the accept loop for a state; returns the real listening port.
async fn start_accepting(state: &Arc<NodeState>) -> u16 {
    let (listener, port) = bind_listener().unwrap();
    let acceptor = TcpAcceptor::new(listener, state.clone(), state.shutdown_rx());
    tokio::spawn(async move {
        let _ = acceptor.run().await;
    });
    port
}

async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("connect to session listener")
}

async fn read_frame_text(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; FRAME_LEN];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for a frame")
        .expect("read frame");
    wire::frame_text(&buf)
}

/// Every inbound session opens with `get uuid`, and answers the same
/// request with its own id.
#[tokio::test]
async fn inbound_session_greets_and_identifies() {
    let state = test_state(NODE_A, &[]);
    let port = start_accepting(&state).await;

    let mut peer = connect(port).await;
    assert_eq!(read_frame_text(&mut peer).await, "get uuid");

    peer.write_all(&raw_frame("get uuid")).await.unwrap();
    assert_eq!(read_frame_text(&mut peer).await, format!("uuid {NODE_A}"));
}

/// A `uuid` reply late-binds the session: afterwards the table entry's
/// handle points at exactly this connection.
#[tokio::test]
async fn uuid_reply_binds_the_session() {
    let state = test_state(NODE_A, &[]);
    let port = start_accepting(&state).await;

    let mut peer = connect(port).await;
    let peer_port = peer.local_addr().unwrap().port();
    assert_eq!(read_frame_text(&mut peer).await, "get uuid");

    peer.write_all(&raw_frame(&format!("uuid {NODE_B}"))).await.unwrap();

    let table = state.clone();
    wait_for("session binding", move || {
        table
            .table
            .get(&node_id(NODE_B))
            .and_then(|n| n.session)
            .is_some()
    })
    .await;

    let b = state.table.get(&node_id(NODE_B)).unwrap();
    let session = b.session.unwrap();
    assert_eq!(session.peer_addr.port(), peer_port);
    assert_eq!(b.tcp_port, peer_port);
}

/// Probes are echoed with the timestamp untouched.
#[tokio::test]
async fn ping_is_echoed_verbatim() {
    let state = test_state(NODE_A, &[]);
    let port = start_accepting(&state).await;

    let mut peer = connect(port).await;
    assert_eq!(read_frame_text(&mut peer).await, "get uuid");

    peer.write_all(&raw_frame("ping 1700000000123")).await.unwrap();
    assert_eq!(read_frame_text(&mut peer).await, "pong 1700000000123");
}

/// A clean hang-up ends only that session; the node keeps running and
/// the session's queue slot is released.
#[tokio::test]
async fn hangup_ends_the_session_only() {
    let state = test_state(NODE_A, &[]);
    let port = start_accepting(&state).await;

    let mut peer = connect(port).await;
    assert_eq!(read_frame_text(&mut peer).await, "get uuid");
    let queue = state.clone();
    wait_for("slot registration", move || queue.queue.len() == 1).await;

    drop(peer);

    let queue = state.clone();
    wait_for("slot release", move || queue.queue.is_empty()).await;
    assert!(state.is_running());
}

/// Two sessions for one peer cannot coexist: the second `uuid` binding
/// is refused and that session is closed by the node.
#[tokio::test]
async fn duplicate_session_is_refused_and_closed() {
    let state = test_state(NODE_A, &[]);
    let port = start_accepting(&state).await;

    let mut first = connect(port).await;
    assert_eq!(read_frame_text(&mut first).await, "get uuid");
    first
        .write_all(&raw_frame(&format!("uuid {NODE_B}")))
        .await
        .unwrap();

    let table = state.clone();
    wait_for("first binding", move || {
        table
            .table
            .get(&node_id(NODE_B))
            .and_then(|n| n.session)
            .is_some()
    })
    .await;
    let bound = state.table.get(&node_id(NODE_B)).unwrap().session.unwrap();

    let mut second = connect(port).await;
    assert_eq!(read_frame_text(&mut second).await, "get uuid");
    second
        .write_all(&raw_frame(&format!("uuid {NODE_B}")))
        .await
        .unwrap();

    // The node closes the duplicate; our read observes the EOF.
    let mut buf = [0u8; FRAME_LEN];
    let eof = tokio::time::timeout(Duration::from_secs(2), second.read_exact(&mut buf))
        .await
        .expect("timed out waiting for the duplicate to close");
    assert!(eof.is_err(), "duplicate session should be closed");

    // The original binding survives.
    assert_eq!(
        state.table.get(&node_id(NODE_B)).unwrap().session,
        Some(bound)
    );
}

/// A UDP announcement drives an outbound connect, and the resulting
/// session speaks for the node when the remote side asks who it is.
#[tokio::test]
async fn announcement_drives_the_outbound_session() {
    let state = test_state(NODE_A, &[]);

    // The test plays the announced peer B: it owns the listening socket
    // the announcement points at.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let frame = Message::Add {
        id: node_id(NODE_B),
        tcp_port: port,
    }
    .to_frame();
    process_datagram(&state, &frame, "127.0.0.1".parse().unwrap());

    let (mut peer_side, _) = tokio::time::timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("node never dialed the announced port")
        .unwrap();

    // Accepting side asks for the id; the node's outbound session answers.
    peer_side.write_all(&raw_frame("get uuid")).await.unwrap();
    let mut buf = [0u8; FRAME_LEN];
    tokio::time::timeout(Duration::from_secs(2), peer_side.read_exact(&mut buf))
        .await
        .expect("timed out waiting for uuid reply")
        .unwrap();
    assert_eq!(wire::frame_text(&buf), format!("uuid {NODE_A}"));

    // The connect bound the session under the same upsert that created it.
    let b = state.table.get(&node_id(NODE_B)).unwrap();
    assert!(b.session.is_some());
    assert_eq!(b.tcp_port, port);
}

/// Frames queued through the transfer queue are written to the peer —
/// the path the metrics scheduler uses to inject probes.
#[tokio::test]
async fn queued_frame_reaches_the_peer() {
    let state = test_state(NODE_A, &[]);
    let port = start_accepting(&state).await;

    let mut peer = connect(port).await;
    assert_eq!(read_frame_text(&mut peer).await, "get uuid");
    peer.write_all(&raw_frame(&format!("uuid {NODE_B}"))).await.unwrap();

    let table = state.clone();
    wait_for("session binding", move || {
        table
            .table
            .get(&node_id(NODE_B))
            .and_then(|n| n.session)
            .is_some()
    })
    .await;
    let session = state.table.get(&node_id(NODE_B)).unwrap().session.unwrap();

    assert!(state.queue.set(session.id, "ping 424242".to_string()));
    assert_eq!(read_frame_text(&mut peer).await, "ping 424242");
}
