// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

use super::config::ValidationError;
use super::controller::{MissionStage, PhaseKind};
use super::ping_finder::PingFinderError;
use super::RequestKind;

/// Error type returned by controller operations.
///
/// Backend-originated failures never show up here: they land in the
/// published state, where the view picks them up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("cannot start a connection attempt while {0}")]
    AttemptInProgress(PhaseKind),

    #[error("cannot {action} while {phase}")]
    InvalidState {
        action: &'static str,
        phase: PhaseKind,
    },

    #[error(transparent)]
    PingFinder(#[from] PingFinderError),

    #[error("a {0} request is still pending")]
    RequestPending(RequestKind),

    #[error("cannot send a {kind} request while {stage}")]
    RequestNotAllowed {
        kind: RequestKind,
        stage: MissionStage,
    },

    #[error("no request is pending")]
    NoPendingRequest,
}
