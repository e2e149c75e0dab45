use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Phase of the self-write suppression window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    /// No local write in flight.
    Idle,
    /// At least one optimistic write is being sent.
    Sending,
    /// All writes finished; reloads stay suppressed until the window expires.
    Settling,
}

#[derive(Debug, Default)]
struct GateState {
    in_flight: u32,
    settle_until: Option<Instant>,
}

/// Suppresses reloads while a self-authored write is in flight, and for a
/// short settle window after, so the poller noticing that same write does not
/// overwrite the optimistic state.
#[derive(Debug, Clone)]
pub struct WriteGate {
    inner: Arc<Mutex<GateState>>,
    settle: Duration,
}

impl WriteGate {
    pub fn new(settle: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GateState::default())),
            settle,
        }
    }

    /// Enters `Sending`. The window closes when the ticket drops.
    pub fn begin(&self) -> SendTicket {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.in_flight += 1;
        s.settle_until = None;
        SendTicket { gate: self.clone() }
    }

    pub fn phase(&self) -> GatePhase {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if s.in_flight > 0 {
            return GatePhase::Sending;
        }
        match s.settle_until {
            Some(until) if Instant::now() < until => GatePhase::Settling,
            Some(_) => {
                s.settle_until = None;
                GatePhase::Idle
            }
            None => GatePhase::Idle,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.phase() != GatePhase::Idle
    }

    fn release(&self) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.in_flight = s.in_flight.saturating_sub(1);
        if s.in_flight == 0 {
            s.settle_until = Some(Instant::now() + self.settle);
        }
    }
}

/// Held for the duration of one optimistic write.
#[derive(Debug)]
pub struct SendTicket {
    gate: WriteGate,
}

impl Drop for SendTicket {
    fn drop(&mut self) {
        self.gate.release();
    }
}
