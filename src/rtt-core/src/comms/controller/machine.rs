// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Connection state machine.
//!
//! Every transition is guarded on the current phase, and on the attempt
//! tag where the event belongs to one specific connect attempt, so that
//! late completions and timer fires cannot touch a newer or reset state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag of a single connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AttemptId(u64);

impl AttemptId {
    /// Advance `sequence` and tag the next operation with it.
    pub(super) fn next(sequence: &mut u64) -> Self {
        *sequence = sequence.wrapping_add(1);
        Self(*sequence)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Events that can trigger state transitions.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Validated connect request from the user
    ConnectRequested(AttemptId),
    /// Backend accepted `initialize_comms`
    InitializeAccepted(AttemptId),
    /// Backend refused or failed `initialize_comms`
    InitializeRejected { attempt: AttemptId, reason: String },
    /// Local sync timer fired
    SyncDeadlineElapsed(AttemptId),
    /// Backend reported its own sync timeout
    SyncTimeoutSignalled,
    /// Drone answered the sync handshake
    SyncSucceeded,
    /// Fatal error reported before the link came up
    FatalError(String),
    /// Cancel, disconnect, or remote teardown
    Reset,
}

/// Discriminant of [`ConnectionPhase`], as shown to the view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseKind {
    #[default]
    Idle,
    Connecting,
    WaitingForSync,
    Connected,
    Failed,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::WaitingForSync => write!(f, "WaitingForSync"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// The current phase of the connection lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "phase", content = "data")]
pub enum ConnectionPhase {
    /// No link, ready for a new attempt
    #[default]
    Idle,
    /// `initialize_comms` in flight. A backend sync timeout that overtakes
    /// the reply is remembered and applied once the link is accepted.
    Connecting {
        attempt: AttemptId,
        timeout_signalled: bool,
    },
    /// Link up, waiting for the drone's sync answer
    WaitingForSync {
        attempt: AttemptId,
        cancel_available: bool,
    },
    /// Drone synced
    Connected,
    /// Last attempt failed; a new one may start
    Failed { reason: String },
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "Failed({})", reason),
            other => write!(f, "{}", other.kind()),
        }
    }
}

impl ConnectionPhase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Self::Idle => PhaseKind::Idle,
            Self::Connecting { .. } => PhaseKind::Connecting,
            Self::WaitingForSync { .. } => PhaseKind::WaitingForSync,
            Self::Connected => PhaseKind::Connected,
            Self::Failed { .. } => PhaseKind::Failed,
        }
    }

    /// Attempt the phase belongs to, if an attempt is in progress.
    pub fn attempt(&self) -> Option<AttemptId> {
        match self {
            Self::Connecting { attempt, .. } | Self::WaitingForSync { attempt, .. } => {
                Some(*attempt)
            }
            _ => None,
        }
    }

    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed { .. })
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::WaitingForSync { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn cancel_available(&self) -> bool {
        matches!(
            self,
            Self::WaitingForSync {
                cancel_available: true,
                ..
            }
        )
    }
}

/// State machine driving [`ConnectionPhase`].
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionPhase,
    transition_count: u64,
    attempt_sequence: u64,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    /// Create a new state machine in the Idle phase.
    pub fn new() -> Self {
        Self {
            state: ConnectionPhase::Idle,
            transition_count: 0,
            attempt_sequence: 0,
        }
    }

    /// Get the current phase.
    pub fn state(&self) -> &ConnectionPhase {
        &self.state
    }

    /// Get the number of transitions taken so far.
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Allocate the tag for the next connect attempt.
    pub fn next_attempt_id(&mut self) -> AttemptId {
        AttemptId::next(&mut self.attempt_sequence)
    }

    /// Tag of the most recently allocated attempt, `None` before the first.
    pub fn last_attempt_id(&self) -> Option<AttemptId> {
        (self.attempt_sequence > 0).then_some(AttemptId(self.attempt_sequence))
    }

    /// Process an event and potentially transition to a new state.
    /// Returns true if a transition occurred.
    pub fn process_event(&mut self, event: ConnectionEvent) -> bool {
        match self.next_state(event) {
            Some(state) => {
                self.state = state;
                self.transition_count += 1;
                true
            }
            None => false,
        }
    }

    fn next_state(&self, event: ConnectionEvent) -> Option<ConnectionPhase> {
        use ConnectionEvent as E;
        use ConnectionPhase as P;

        match (&self.state, event) {
            // New attempt
            (P::Idle | P::Failed { .. }, E::ConnectRequested(attempt)) => {
                Some(P::Connecting {
                    attempt,
                    timeout_signalled: false,
                })
            }

            // initialize_comms outcome, only for the attempt still in flight
            (
                P::Connecting {
                    attempt,
                    timeout_signalled,
                },
                E::InitializeAccepted(id),
            ) if *attempt == id => Some(P::WaitingForSync {
                attempt: id,
                cancel_available: *timeout_signalled,
            }),
            (P::Connecting { attempt, .. }, E::InitializeRejected { attempt: id, reason })
                if *attempt == id =>
            {
                Some(P::Failed { reason })
            }

            // Either timeout source offers cancel; the first one wins
            (
                P::WaitingForSync {
                    attempt,
                    cancel_available: false,
                },
                E::SyncDeadlineElapsed(id),
            ) if *attempt == id => Some(P::WaitingForSync {
                attempt: id,
                cancel_available: true,
            }),
            (
                P::WaitingForSync {
                    attempt,
                    cancel_available: false,
                },
                E::SyncTimeoutSignalled,
            ) => Some(P::WaitingForSync {
                attempt: *attempt,
                cancel_available: true,
            }),
            (
                P::Connecting {
                    attempt,
                    timeout_signalled: false,
                },
                E::SyncTimeoutSignalled,
            ) => Some(P::Connecting {
                attempt: *attempt,
                timeout_signalled: true,
            }),

            // The first success is authoritative
            (P::Connecting { .. } | P::WaitingForSync { .. }, E::SyncSucceeded) => {
                Some(P::Connected)
            }

            (P::Connecting { .. } | P::WaitingForSync { .. }, E::FatalError(reason)) => {
                Some(P::Failed { reason })
            }

            (P::Idle, E::Reset) => None,
            (_, E::Reset) => Some(P::Idle),

            // Invalid or stale - stay in current state
            _ => None,
        }
    }
}
