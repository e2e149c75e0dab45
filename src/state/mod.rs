//! Owned state container shared by the reconciler, dispatcher and scheduler.

pub mod observers;
pub mod working_set;
pub mod write_gate;

#[cfg(test)]
mod tests;

pub use observers::{surfaces_for, ObserverRegistry, SyncNotice, UiSurface};
pub use working_set::{StateHandle, WorkingSet};
pub use write_gate::{GatePhase, SendTicket, WriteGate};
