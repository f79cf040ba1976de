//! Transfer queue — hands outbound frames to sessions without sharing
//! sockets.
//!
//! Each live session registers one slot. Writers (the metrics scheduler,
//! the master's sibling forwarder) overwrite the slot; the owning session
//! consumes the latest value exactly once. A `tokio::sync::watch` channel
//! per slot carries exactly those semantics: `send` replaces any pending
//! value, `changed`/`borrow_and_update` consume it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::neighbor::SessionId;

/// Receiving end of one session's slot, held by the session task.
pub type TransferSlot = watch::Receiver<String>;

#[derive(Default)]
pub struct TransferQueue {
    slots: Mutex<HashMap<SessionId, watch::Sender<String>>>,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a slot for a session. The initial empty value is never
    /// reported as a change, so a fresh slot is quiet until written.
    pub fn register(&self, session: SessionId) -> TransferSlot {
        let (tx, rx) = watch::channel(String::new());
        self.slots.lock().insert(session, tx);
        rx
    }

    /// Drop a session's slot. Called by the session task on exit.
    pub fn deregister(&self, session: SessionId) {
        self.slots.lock().remove(&session);
    }

    /// Queue `text` for a session, replacing anything still pending.
    /// Returns false when the session is gone — callers treat that as a
    /// skip, not an error.
    pub fn set(&self, session: SessionId, text: String) -> bool {
        match self.slots.lock().get(&session) {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Shutdown only: drop every slot, waking the owning sessions.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}
