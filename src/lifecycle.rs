//! Worker lifecycle state machine.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

use crate::error::{Error, Result};

/// Lifecycle states of one worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Constructed, no lifecycle event seen yet.
    Parsed,
    /// Precaching is in progress.
    Installing,
    /// Precache succeeded; waiting to activate.
    Installed,
    /// Stale caches are being evicted.
    Activating,
    /// Serving fetches.
    Activated,
    /// Install failed or a newer version replaced this one.
    Redundant,
}

impl WorkerState {
    /// Returns true if fetches should be routed to this worker.
    #[must_use]
    pub const fn can_intercept_fetch(self) -> bool {
        matches!(self, Self::Activated)
    }

    /// Returns true once the worker can never serve or store again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Redundant)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

/// Guards the allowed transitions between [`WorkerState`]s.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<WorkerState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::Parsed),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Moves to `Installing`. Only a freshly parsed worker may install.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] from any other state.
    pub fn begin_install(&self) -> Result<()> {
        self.transition("parsed", WorkerState::Installing, |s| s == WorkerState::Parsed)
    }

    /// Moves straight to `Installed` for a version whose bucket survived
    /// from an earlier run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the worker is freshly parsed.
    pub fn restore(&self) -> Result<()> {
        self.transition("parsed", WorkerState::Installed, |s| s == WorkerState::Parsed)
    }

    /// Moves to `Activating`. Allowed after install and again after a
    /// completed activation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] from any other state.
    pub fn begin_activate(&self) -> Result<()> {
        self.transition("installed or activated", WorkerState::Activating, |s| {
            matches!(s, WorkerState::Installed | WorkerState::Activated)
        })
    }

    /// Records the end of an in-progress step.
    pub fn finish(&self, next: WorkerState) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        log::debug!("Worker state {} -> {}", *state, next);
        *state = next;
    }

    fn transition(
        &self,
        expected: &'static str,
        next: WorkerState,
        allowed: impl Fn(WorkerState) -> bool,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !allowed(*state) {
            return Err(Error::InvalidState {
                expected,
                actual: *state,
            });
        }
        log::debug!("Worker state {} -> {}", *state, next);
        *state = next;
        Ok(())
    }
}
