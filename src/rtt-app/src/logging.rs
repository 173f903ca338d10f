// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Parse a configured level name, falling back to INFO when absent or invalid.
pub fn parse_level(log_level: Option<&str>) -> Level {
    log_level
        .and_then(|s| s.trim().parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}

/// Install the global fmt subscriber at the given level.
///
/// Only the first call has an effect.
pub fn init_logging(log_level: Option<&str>) {
    let level = parse_level(log_level);
    let installed = FmtSubscriber::builder()
        .with_target(false)
        .with_max_level(level)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("Logging initialised at {}", level);
    }
}
