//! Progress callback for duplicate-resolution runs.
//!
//! Implementations receive phase transitions and per-item progress updates.
//! Route evaluation reports from parallel worker threads, so implementations
//! must be `Send + Sync`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Run phases, ordered by execution sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Clearing obsolete flags for the scope
    Resetting,
    /// Reading records from the store
    Loading,
    /// Evaluating candidate pairs, one item per route
    Evaluating,
    /// Writing obsolete flags, one item per batch
    Persisting,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Resetting => "resetting",
            RunPhase::Loading => "loading",
            RunPhase::Evaluating => "evaluating",
            RunPhase::Persisting => "persisting",
        }
    }
}

/// Trait for receiving progress updates during a run.
pub trait RunProgress: Send + Sync {
    /// Called when entering a new phase. `total` is the number of items in this phase.
    fn on_phase(&self, phase: RunPhase, total: u32);
    /// Called after completing one item in the current phase.
    fn on_progress(&self);
}

/// Discards all updates.
pub struct NoopProgress;

impl RunProgress for NoopProgress {
    fn on_phase(&self, _phase: RunPhase, _total: u32) {}
    fn on_progress(&self) {}
}

/// Atomic progress tracker that can be polled from another thread.
pub struct AtomicProgressTracker {
    pub phase: Mutex<String>,
    pub completed: AtomicU32,
    pub total: AtomicU32,
}

impl Default for AtomicProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicProgressTracker {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(String::new()),
            completed: AtomicU32::new(0),
            total: AtomicU32::new(0),
        }
    }

    /// Current phase name, empty before the first phase.
    pub fn phase(&self) -> String {
        self.phase
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// `(completed, total)` for the current phase.
    pub fn counts(&self) -> (u32, u32) {
        (
            self.completed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }
}

impl RunProgress for AtomicProgressTracker {
    fn on_phase(&self, phase: RunPhase, total: u32) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase.as_str().to_string();
        }
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    fn on_progress(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}
