// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Config / start / stop request state machine.
//!
//! Only one request is pending at a time. Each carries an [`AttemptId`] so a
//! late send completion or timer fire from an abandoned request is ignored.
//! The mission stage decides which request may be sent next.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::comms::RequestKind;

use super::machine::AttemptId;

/// How far the drone is through a tracking run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissionStage {
    /// No ping finder config accepted yet
    #[default]
    Unconfigured,
    /// Configured, ping finder stopped
    Configured,
    /// Ping finder running
    Running,
}

impl fmt::Display for MissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "Unconfigured"),
            Self::Configured => write!(f, "Configured"),
            Self::Running => write!(f, "Running"),
        }
    }
}

impl MissionStage {
    /// Whether a request of `kind` makes sense in this stage.
    pub fn allows(&self, kind: RequestKind) -> bool {
        match kind {
            RequestKind::Config => !matches!(self, Self::Running),
            RequestKind::Start => matches!(self, Self::Configured),
            RequestKind::Stop => matches!(self, Self::Running),
        }
    }

    fn after_success(self, kind: RequestKind) -> Self {
        match kind {
            RequestKind::Config | RequestKind::Stop => Self::Configured,
            RequestKind::Start => Self::Running,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum RequestPhase {
    #[default]
    Idle,
    /// Sent (or being sent), waiting for the drone's answer
    Waiting {
        kind: RequestKind,
        attempt: AttemptId,
        cancel_available: bool,
    },
}

impl RequestPhase {
    pub fn pending(&self) -> Option<RequestKind> {
        match self {
            Self::Idle => None,
            Self::Waiting { kind, .. } => Some(*kind),
        }
    }

    pub fn attempt(&self) -> Option<AttemptId> {
        match self {
            Self::Idle => None,
            Self::Waiting { attempt, .. } => Some(*attempt),
        }
    }

    pub fn cancel_available(&self) -> bool {
        matches!(
            self,
            Self::Waiting {
                cancel_available: true,
                ..
            }
        )
    }
}

#[derive(Debug, Clone)]
pub enum RequestEvent {
    /// User sent a request
    Sent { kind: RequestKind, attempt: AttemptId },
    /// The backend could not send it
    SendFailed(AttemptId),
    /// Local ack timer fired
    DeadlineElapsed(AttemptId),
    /// Backend gave up waiting for the answer
    TimeoutSignalled(RequestKind),
    /// Drone answered with success
    Succeeded(RequestKind),
    /// Drone answered with failure
    Failed(RequestKind),
    /// User stopped waiting
    Cancelled,
    /// Link went away; forget the run
    Reset,
}

#[derive(Debug, Clone, Default)]
pub struct RequestMachine {
    phase: RequestPhase,
    stage: MissionStage,
    attempt_sequence: u64,
}

impl RequestMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &RequestPhase {
        &self.phase
    }

    pub fn stage(&self) -> MissionStage {
        self.stage
    }

    pub fn next_attempt_id(&mut self) -> AttemptId {
        AttemptId::next(&mut self.attempt_sequence)
    }

    /// Returns true if the phase or stage changed.
    pub fn process_event(&mut self, event: RequestEvent) -> bool {
        use RequestEvent as E;
        use RequestPhase as P;

        match (self.phase, event) {
            (P::Idle, E::Sent { kind, attempt }) if self.stage.allows(kind) => {
                self.phase = P::Waiting {
                    kind,
                    attempt,
                    cancel_available: false,
                };
                true
            }

            (P::Waiting { attempt, .. }, E::SendFailed(id)) if attempt == id => {
                self.phase = P::Idle;
                true
            }

            (
                P::Waiting {
                    kind,
                    attempt,
                    cancel_available: false,
                },
                E::DeadlineElapsed(id),
            ) if attempt == id => {
                self.phase = P::Waiting {
                    kind,
                    attempt,
                    cancel_available: true,
                };
                true
            }
            (
                P::Waiting {
                    kind,
                    attempt,
                    cancel_available: false,
                },
                E::TimeoutSignalled(signalled),
            ) if kind == signalled => {
                self.phase = P::Waiting {
                    kind,
                    attempt,
                    cancel_available: true,
                };
                true
            }

            (P::Waiting { kind, .. }, E::Succeeded(answered)) if kind == answered => {
                self.phase = P::Idle;
                self.stage = self.stage.after_success(kind);
                true
            }
            (P::Waiting { kind, .. }, E::Failed(answered)) if kind == answered => {
                self.phase = P::Idle;
                true
            }

            (P::Waiting { .. }, E::Cancelled) => {
                self.phase = P::Idle;
                true
            }

            (_, E::Reset) => {
                let changed = self.phase != P::Idle || self.stage != MissionStage::Unconfigured;
                self.phase = P::Idle;
                self.stage = MissionStage::Unconfigured;
                changed
            }

            _ => false,
        }
    }
}
