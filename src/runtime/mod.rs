//! Reconciliation orchestrator: the full refresh and the session that wires
//! the adapter, the change dispatcher and the polling scheduler together.

pub mod reconciler;
pub mod session;


pub use reconciler::{Reconciler, RefreshReport};
pub use session::{StoreProbe, SyncSession};
