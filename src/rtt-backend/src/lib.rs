// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use rtt_core::DynResult;

pub mod simulated;

pub use simulated::{SimulatedBackend, SimulatorSettings};

/// Serial port identifiers the host can open, sorted.
pub fn available_serial_ports() -> DynResult<Vec<String>> {
    let mut ports: Vec<String> = tokio_serial::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .collect();
    ports.sort();
    Ok(ports)
}
