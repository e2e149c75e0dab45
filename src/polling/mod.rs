//! Timer-driven change detection, the fallback (and safety net) for push.

pub mod policy;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use policy::{decide_fast, decide_slow, is_newer, PollDecision, TimerKind};
pub use scheduler::{ActivityProbe, PollStats, PollingScheduler, ReloadTarget};
