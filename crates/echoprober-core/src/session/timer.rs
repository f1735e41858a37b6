//! Auto-stop timer for offline sessions
//!
//! At most one task is armed at a time. Each arming gets a fresh generation
//! number; the fire callback carries it back, and only a fire whose
//! generation is still the armed one may be [`AutoStopTimer::claim`]ed. That
//! makes a fire racing a manual stop harmless: whichever reaches the
//! controller first wins and the other is a no-op.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Session-name prefix that bounds an offline session's length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoStopRule {
    pub prefix: String,
    pub seconds: u64,
}

impl AutoStopRule {
    pub fn new(prefix: impl Into<String>, seconds: u64) -> Self {
        Self {
            prefix: prefix.into(),
            seconds,
        }
    }
}

/// Deadline for a session name: the first rule whose prefix matches
pub fn auto_stop_after(name: &str, rules: &[AutoStopRule]) -> Option<Duration> {
    rules
        .iter()
        .find(|r| name.starts_with(&r.prefix))
        .map(|r| Duration::from_secs(r.seconds))
}

struct PendingTimer {
    generation: u64,
    deadline: Instant,
    cancel_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Single-slot, cancellable one-shot timer
#[derive(Default)]
pub struct AutoStopTimer {
    pending: Option<PendingTimer>,
    next_generation: u64,
}

impl AutoStopTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a task that calls `on_fire(generation)` after `after`
    ///
    /// Any task still pending is cancelled first.
    pub fn arm<F>(&mut self, after: Duration, on_fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();

        self.next_generation += 1;
        let generation = self.next_generation;
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("auto-stop-timer".into())
            .spawn(move || {
                crossbeam_channel::select! {
                    recv(cancel_rx) -> _ => {
                        tracing::debug!(generation, "Auto-stop timer cancelled");
                    }
                    recv(crossbeam_channel::after(after)) -> _ => {
                        tracing::debug!(generation, "Auto-stop timer elapsed");
                        on_fire(generation);
                    }
                }
            })
            .expect("Failed to spawn auto-stop timer thread");

        self.pending = Some(PendingTimer {
            generation,
            deadline: Instant::now() + after,
            cancel_tx,
            handle,
        });
        generation
    }

    /// Cancel the armed task; returns whether one was armed
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                let _ = pending.cancel_tx.send(());
                let _ = pending.handle.join();
                true
            }
            None => false,
        }
    }

    /// Accept a fire from `generation`, disarming the timer
    ///
    /// Returns false for fires of cancelled or superseded tasks.
    pub fn claim(&mut self, generation: u64) -> bool {
        match &self.pending {
            Some(p) if p.generation == generation => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of armed tasks (0 or 1)
    pub fn pending_count(&self) -> usize {
        usize::from(self.pending.is_some())
    }

    pub fn armed_generation(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.generation)
    }

    /// Time left before the armed task fires
    pub fn remaining(&self) -> Option<Duration> {
        self.pending
            .as_ref()
            .map(|p| p.deadline.saturating_duration_since(Instant::now()))
    }
}

impl Drop for AutoStopTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
