//! The per-peer session task.
//!
//! A session owns exactly one TCP socket — accepted inbound or
//! connected outbound — and runs the frame protocol on it until the
//! peer hangs up, an I/O error lands, or the node stops. Outbound
//! traffic from other tasks (latency probes, forwarded announcements)
//! arrives through the session's transfer-queue slot; the socket itself
//! is never shared.
//!
//! Protocol, one frame in → at most one frame out:
//!
//! | received    | response                                   |
//! |-------------|--------------------------------------------|
//! | `ping T`    | `pong T`, timestamp echoed verbatim        |
//! | `pong T`    | none; record `now − T` as the peer latency |
//! | `get uuid`  | `uuid <own id>`                            |
//! | `uuid X`    | none; bind this session to neighbor X      |
//! | `add X P`   | none; same handling as a UDP announcement  |
//! | otherwise   | none; logged at debug                      |

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

use lanpulse_core::{wire, Message, FRAME_LEN};
use lanpulse_services::{SessionHandle, TransferSlot, UpsertOutcome};

use crate::discovery;
use crate::metrics::now_ms;
use crate::node::NodeState;
use crate::session::next_session_id;

/// Start a session for an accepted connection. The inbound side opens
/// the exchange by asking for the peer's id; the `uuid` reply performs
/// the late table binding.
pub fn spawn_inbound(state: Arc<NodeState>, stream: TcpStream, peer_addr: SocketAddr) {
    let id = next_session_id();
    let handle = SessionHandle { id, peer_addr };
    let slot = state.queue.register(id);
    tokio::spawn(run_session(state, handle, stream, slot, true));
}

/// Dial a freshly discovered peer and run the session. Called only by
/// the one caller that observed `Inserted` for this peer, so two
/// announcement paths can never produce two outbound sockets.
pub fn connect_to_peer(state: Arc<NodeState>, peer_id: Uuid, ip: Ipv4Addr, tcp_port: u16) {
    tokio::spawn(async move {
        let addr = SocketAddr::from((ip, tcp_port));
        let stream = match TcpStream::connect(addr).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(peer = %peer_id, %addr, error = %e,
                    "outbound connect failed, peer stays sessionless");
                return;
            }
        };

        let id = next_session_id();
        let handle = SessionHandle {
            id,
            peer_addr: addr,
        };
        let slot = state.queue.register(id);

        // An inbound session may have bound itself while we were dialing;
        // the table arbitrates and the loser goes away.
        if state.table.upsert(peer_id, ip, tcp_port, Some(handle)) == UpsertOutcome::SessionRefused {
            tracing::debug!(peer = %peer_id, "peer already owns a session, dropping outbound connect");
            state.queue.deregister(id);
            return;
        }

        tracing::debug!(peer = %peer_id, %addr, session = id, "outbound session connected");
        run_session(state, handle, stream, slot, false).await;
    });
}

async fn run_session(
    state: Arc<NodeState>,
    handle: SessionHandle,
    stream: TcpStream,
    mut slot: TransferSlot,
    inbound: bool,
) {
    let peer = handle.peer_addr;
    let mut shutdown = state.shutdown_rx();
    let (mut rd, mut wr) = stream.into_split();
    let mut frames = FrameReader::new();

    let outcome: Result<()> = async {
        if inbound {
            wr.write_all(&Message::GetUuid.to_frame())
                .await
                .context("greeting write failed")?;
        }

        loop {
            if !state.is_running() {
                return Ok(());
            }

            tokio::select! {
                _ = shutdown.recv() => return Ok(()),

                changed = slot.changed() => {
                    if changed.is_err() {
                        // Slot dropped — the node is shutting down.
                        return Ok(());
                    }
                    flush_slot(&mut wr, &mut slot).await?;
                }

                frame = frames.next(&mut rd) => match frame.context("read failed")? {
                    Some(text) => {
                        match react(&state, handle, &text, now_ms()) {
                            Reaction::Reply(reply) => {
                                wr.write_all(&reply.to_frame())
                                    .await
                                    .context("reply write failed")?;
                            }
                            Reaction::None => {}
                            Reaction::Close => return Ok(()),
                        }
                        // A probe queued while we were busy goes out now.
                        if slot.has_changed().unwrap_or(false) {
                            flush_slot(&mut wr, &mut slot).await?;
                        }
                    }
                    None => {
                        tracing::info!(%peer, "peer hung up");
                        return Ok(());
                    }
                },
            }
        }
    }
    .await;

    if let Err(e) = outcome {
        tracing::warn!(%peer, error = ?e, "session ended with error");
    }
    // The socket closes with the halves; the neighbor entry stays —
    // peers are sticky until node shutdown.
    state.queue.deregister(handle.id);
    tracing::debug!(%peer, session = handle.id, "session closed");
}

/// Write out whatever is pending in the slot, consuming it.
async fn flush_slot(wr: &mut (impl AsyncWrite + Unpin), slot: &mut TransferSlot) -> Result<()> {
    let text = slot.borrow_and_update().clone();
    if text.is_empty() {
        return Ok(());
    }
    match wire::pad_frame(&text) {
        Ok(frame) => wr.write_all(&frame).await.context("queued write failed"),
        Err(e) => {
            tracing::warn!(error = %e, "dropping unframeable queued payload");
            Ok(())
        }
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// What the session loop should do with one received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Write this reply frame.
    Reply(Message),
    /// Nothing to send back.
    None,
    /// Tear this session down.
    Close,
}

/// Frame dispatch. Pure protocol logic plus table access; the caller
/// owns all socket I/O, and `now_ms` is a parameter so the latency
/// arithmetic is checkable without a clock.
pub fn react(state: &Arc<NodeState>, handle: SessionHandle, text: &str, now_ms: u64) -> Reaction {
    let msg = match Message::parse(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, payload = %text, "unhandled frame");
            return Reaction::None;
        }
    };

    match msg {
        Message::Ping(sent_ms) => Reaction::Reply(Message::Pong(sent_ms)),

        Message::Pong(sent_ms) => {
            let latency_ms = now_ms.saturating_sub(sent_ms);
            if let Err(e) = state.table.update_metrics(handle.id, latency_ms) {
                // Races session teardown; the sample is simply lost.
                tracing::warn!(error = %e, "latency sample dropped");
            }
            Reaction::None
        }

        Message::GetUuid => Reaction::Reply(Message::Uuid(state.id)),

        Message::Uuid(peer_id) => {
            if peer_id == state.id {
                tracing::debug!("peer presented our own id, ignoring");
                return Reaction::None;
            }
            let ip = peer_ipv4(handle.peer_addr);
            match state
                .table
                .upsert(peer_id, ip, handle.peer_addr.port(), Some(handle))
            {
                UpsertOutcome::SessionRefused => {
                    tracing::debug!(peer = %peer_id, "peer already owns a session, closing this one");
                    Reaction::Close
                }
                outcome => {
                    tracing::debug!(peer = %peer_id, ?outcome, session = handle.id, "peer identified");
                    Reaction::None
                }
            }
        }

        Message::Add { id, tcp_port } => {
            // Same semantics as a UDP announcement, with the frame's TCP
            // source address standing in for the datagram source.
            discovery::note_peer(state, id, peer_ipv4(handle.peer_addr), tcp_port);
            Reaction::None
        }
    }
}

fn peer_ipv4(addr: SocketAddr) -> Ipv4Addr {
    match addr {
        SocketAddr::V4(v4) => *v4.ip(),
        SocketAddr::V6(v6) => v6.ip().to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
    }
}

// ── Framing ──────────────────────────────────────────────────────────────────

/// Incremental frame reader. Keeps partial progress across await
/// points, so it is safe to poll inside `select!`: a lost race never
/// drops bytes already read.
struct FrameReader {
    buf: [u8; FRAME_LEN],
    filled: usize,
}

impl FrameReader {
    fn new() -> Self {
        Self {
            buf: [0u8; FRAME_LEN],
            filled: 0,
        }
    }

    /// Next complete frame as trimmed text, or `None` on clean hang-up.
    async fn next(&mut self, rd: &mut (impl AsyncRead + Unpin)) -> io::Result<Option<String>> {
        loop {
            if self.filled == FRAME_LEN {
                self.filled = 0;
                return Ok(Some(wire::frame_text(&self.buf)));
            }
            let n = rd.read(&mut self.buf[self.filled..]).await?;
            if n == 0 {
                return Ok(None);
            }
            self.filled += n;
        }
    }
}
