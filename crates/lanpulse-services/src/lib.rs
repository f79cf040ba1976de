//! lanpulse-services — shared mutable state for the daemon's tasks:
//! the neighbor table and the per-session transfer queue.

pub mod neighbor;
pub mod transfer;

pub use neighbor::{
    Neighbor, NeighborTable, SessionHandle, SessionId, TableError, UpsertOutcome,
};
pub use transfer::{TransferQueue, TransferSlot};
