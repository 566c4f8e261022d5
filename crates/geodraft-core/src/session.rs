//! Edit session state machine.
//!
//! ```text
//! Viewing --begin_edit--> Editing --begin_save--> Saving --ok--> Viewing
//!                            ^                      |
//!                            +-------- error -------+
//! Editing/Saving --cancel--> Cancelling --> Viewing
//! ```
//!
//! The session owns the last confirmed value and, while editing, a working
//! copy. Every session start and cancel bumps the [`Epoch`]; a save response
//! tagged with an older epoch is discarded on arrival.

use std::fmt;

use log::debug;
use thiserror::Error;

use crate::sync::SyncError;

/// Lifecycle state of an edit session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Read-only; only server-confirmed data is shown.
    Viewing,
    /// Mutations apply to the working copy.
    Editing,
    /// The working copy has been handed to the synchronizer.
    Saving,
    /// The working copy is being discarded.
    Cancelling,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Viewing => "viewing",
            SessionState::Editing => "editing",
            SessionState::Saving => "saving",
            SessionState::Cancelling => "cancelling",
        };
        f.write_str(name)
    }
}

/// Monotonic session counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(u64);

impl Epoch {
    pub fn value(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch {}", self.0)
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },
}

/// A snapshot handed to the synchronizer by [`EditSession::begin_save`].
#[derive(Debug, Clone, PartialEq)]
pub struct SaveTicket<T> {
    pub epoch: Epoch,
    pub value: T,
}

/// Result of delivering a save response to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The submitted copy is now the confirmed state.
    Committed,
    /// The save failed; the session is back in `Editing` with its working copy.
    Failed(SyncError),
    /// The response belonged to a cancelled or finished session and was dropped.
    Discarded,
}

impl SaveOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, SaveOutcome::Committed)
    }
}

/// Edit session over a confirmed value of type `T`.
#[derive(Debug, Clone)]
pub struct EditSession<T> {
    state: SessionState,
    epoch: Epoch,
    confirmed: T,
    working: Option<T>,
    last_error: Option<SyncError>,
}

impl<T: Clone + PartialEq> EditSession<T> {
    /// Start in `Viewing` over a confirmed value.
    pub fn new(confirmed: T) -> Self {
        Self {
            state: SessionState::Viewing,
            epoch: Epoch::default(),
            confirmed,
            working: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn confirmed(&self) -> &T {
        &self.confirmed
    }

    pub fn working(&self) -> Option<&T> {
        self.working.as_ref()
    }

    /// What a view should render: the working copy if any, else confirmed.
    pub fn current(&self) -> &T {
        self.working.as_ref().unwrap_or(&self.confirmed)
    }

    /// Error of the last failed save, cleared on the next transition.
    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    /// True if the working copy differs from the confirmed state.
    pub fn is_dirty(&self) -> bool {
        self.working.as_ref().is_some_and(|w| *w != self.confirmed)
    }

    fn transition(&mut self, to: SessionState) {
        debug!("session {}: {} -> {}", self.epoch, self.state, to);
        self.state = to;
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            state: self.state,
            action,
        }
    }

    /// Enter `Editing` with a snapshot of the confirmed state.
    ///
    /// Calling this while already editing keeps the current working copy.
    pub fn begin_edit(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Viewing => {
                self.epoch = self.epoch.next();
                self.working = Some(self.confirmed.clone());
                self.last_error = None;
                self.transition(SessionState::Editing);
                Ok(())
            }
            SessionState::Editing => Ok(()),
            SessionState::Saving | SessionState::Cancelling => Err(self.invalid("start editing")),
        }
    }

    /// Mutable access to the working copy.
    pub fn working_mut(&mut self) -> Result<&mut T, SessionError> {
        if self.state != SessionState::Editing {
            return Err(self.invalid("modify the working copy"));
        }
        let state = self.state;
        self.working.as_mut().ok_or(SessionError::InvalidTransition {
            state,
            action: "modify the working copy",
        })
    }

    /// Enter `Saving`, handing out a copy of the working state.
    ///
    /// The working copy stays in the session so a failed save can be retried.
    pub fn begin_save(&mut self) -> Result<SaveTicket<T>, SessionError> {
        if self.state != SessionState::Editing {
            return Err(self.invalid("save"));
        }
        let value = self.working.clone().ok_or_else(|| self.invalid("save"))?;
        self.last_error = None;
        self.transition(SessionState::Saving);
        Ok(SaveTicket {
            epoch: self.epoch,
            value,
        })
    }

    /// Deliver a save response.
    ///
    /// `Ok(value)` becomes the confirmed state; an error returns the session to
    /// `Editing` with the working copy intact. Responses from another epoch,
    /// or arriving when no save is pending, are discarded.
    pub fn finish_save(&mut self, epoch: Epoch, result: Result<T, SyncError>) -> SaveOutcome {
        if epoch != self.epoch || self.state != SessionState::Saving {
            debug!(
                "dropping save response for {epoch}; session is at {} ({})",
                self.epoch, self.state
            );
            return SaveOutcome::Discarded;
        }
        match result {
            Ok(value) => {
                self.confirmed = value;
                self.working = None;
                self.transition(SessionState::Viewing);
                SaveOutcome::Committed
            }
            Err(e) => {
                self.last_error = Some(e.clone());
                self.transition(SessionState::Editing);
                SaveOutcome::Failed(e)
            }
        }
    }

    /// Discard the working copy and return to `Viewing`.
    ///
    /// Works while a save is in flight; its response will be discarded.
    pub fn cancel(&mut self) {
        if self.state == SessionState::Viewing {
            return;
        }
        self.transition(SessionState::Cancelling);
        self.epoch = self.epoch.next();
        self.working = None;
        self.last_error = None;
        self.transition(SessionState::Viewing);
    }

    /// Replace the confirmed state with fresh server data.
    pub fn replace_confirmed(&mut self, value: T) -> Result<(), SessionError> {
        if self.state != SessionState::Viewing {
            return Err(self.invalid("reload"));
        }
        self.confirmed = value;
        Ok(())
    }
}
