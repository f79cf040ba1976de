use lanpulse_core::LanpulseConfig;
use lanpulsed::node::Node;
use uuid::Uuid;

/// Whole-node smoke test: init on a free port, heartbeat once, stop.
///
/// Hosts without a broadcast-capable interface (bare containers) skip —
/// the same environments the daemon itself refuses to start on.
#[tokio::test]
async fn node_lifecycle_smoke() {
    let mut config = LanpulseConfig::default();
    config.network.listen_port = 0; // OS-assigned: the election is always won

    let mut node = match Node::init(&config, Uuid::new_v4()).await {
        Ok(node) => node,
        Err(e) => {
            eprintln!("SKIP: no usable network environment: {e:#}");
            return;
        }
    };

    assert!(node.is_listening(), "a port-0 bind always wins the election");
    assert_ne!(node.tcp_port(), 0, "session listener port must be assigned");

    node.start();
    assert!(node.state().is_running());

    // One heartbeat: announce + metrics pass + status dump.
    node.update().await;

    node.stop().await;
    assert!(!node.state().is_running());
    assert!(node.state().table.is_empty());
    assert!(node.state().queue.is_empty());
}

/// Losing the election bind demotes the node to non-master mode
/// instead of failing init.
#[tokio::test]
async fn second_node_on_the_port_is_not_master() {
    // Hold the port the way a running master would.
    let holder = match std::net::UdpSocket::bind(("0.0.0.0", 0)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("SKIP: cannot bind a UDP socket: {e}");
            return;
        }
    };
    let port = holder.local_addr().unwrap().port();

    let mut config = LanpulseConfig::default();
    config.network.listen_port = port;

    let mut node = match Node::init(&config, Uuid::new_v4()).await {
        Ok(node) => node,
        Err(e) => {
            eprintln!("SKIP: no usable network environment: {e:#}");
            return;
        }
    };

    assert!(!node.is_listening(), "contended bind must demote, not fail");

    node.start();
    node.stop().await;
}
