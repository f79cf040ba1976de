//! Periodic neighbor dump — one table snapshot per heartbeat, written
//! to the log.

use lanpulse_services::NeighborTable;

pub fn log_neighbors(table: &NeighborTable) {
    let neighbors = table.snapshot();
    tracing::info!(count = neighbors.len(), "neighbor table snapshot");
    for n in neighbors {
        let addr = format!("{}:{}", n.ip, n.tcp_port);
        tracing::info!(
            id = %n.id,
            addr = %addr,
            latency_ms = n.latency_ms,
            bandwidth = n.bandwidth,
            local = n.is_local,
            connected = n.session.is_some(),
            "  neighbor"
        );
    }
}
