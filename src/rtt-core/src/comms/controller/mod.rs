// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Connection controller components.
//!
//! This module contains the connection and request state machines, the
//! signal hub the backend pushes notifications through, and the controller
//! that reconciles them with user actions.

pub mod lifecycle;
pub mod machine;
pub mod request;
pub mod signals;

pub use lifecycle::{ConnectionController, ConnectionState, UserCommand, CONNECT_FAILED_MESSAGE};
pub use machine::{AttemptId, ConnectionEvent, ConnectionMachine, ConnectionPhase, PhaseKind};
pub use request::{MissionStage, RequestEvent, RequestMachine, RequestPhase};
pub use signals::{BackendSignal, SignalHub, Subscription, SubscriptionId};
