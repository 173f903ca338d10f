// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::VecDeque;
use std::time::Duration;

use super::ConnectionQuality;

/// Number of recent pings averaged into the reported ping time.
pub const PING_WINDOW: usize = 10;

/// (ping ratio, loss %) ceilings per grade, best first.
const THRESHOLDS: [(ConnectionQuality, f64, f64); 4] = [
    (ConnectionQuality::Great, 0.2, 5.0),
    (ConnectionQuality::Good, 0.4, 10.0),
    (ConnectionQuality::Ok, 0.6, 20.0),
    (ConnectionQuality::Bad, 0.8, 30.0),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkMetrics {
    pub ping_time_ms: u32,
    pub packet_loss_pct: f64,
    pub quality: ConnectionQuality,
}

/// Tracks packet delivery and grades the link.
#[derive(Debug, Clone)]
pub struct LinkQualityTracker {
    /// Worst acceptable round trip: ack timeout times retries
    max_ping_ms: f64,
    pings: VecDeque<f64>,
    last_packet_id: Option<u64>,
    received: u64,
    missed: u64,
}

impl LinkQualityTracker {
    pub fn new(ack_timeout: Duration, max_retries: u32) -> Self {
        Self {
            max_ping_ms: ack_timeout.as_secs_f64() * 1000.0 * f64::from(max_retries),
            pings: VecDeque::with_capacity(PING_WINDOW),
            last_packet_id: None,
            received: 0,
            missed: 0,
        }
    }

    /// Account for a received packet and return the updated metrics.
    /// Gaps in `packet_id` count as lost packets.
    pub fn record_packet(&mut self, packet_id: u64, ping: Duration) -> LinkMetrics {
        if self.pings.len() == PING_WINDOW {
            self.pings.pop_front();
        }
        self.pings.push_back(ping.as_secs_f64() * 1000.0);

        if let Some(gap) = self
            .last_packet_id
            .and_then(|last| packet_id.checked_sub(last))
            .and_then(|d| d.checked_sub(1))
        {
            self.missed = self.missed.saturating_add(gap);
        }
        self.last_packet_id = Some(packet_id);
        self.received += 1;

        let avg_ping = self.average_ping_ms();
        let loss = self.packet_loss_pct();
        let ratio = if self.max_ping_ms > 0.0 {
            avg_ping / self.max_ping_ms
        } else {
            f64::INFINITY
        };

        LinkMetrics {
            ping_time_ms: avg_ping as u32,
            packet_loss_pct: loss,
            quality: classify(ratio, loss),
        }
    }

    pub fn average_ping_ms(&self) -> f64 {
        if self.pings.is_empty() {
            return 0.0;
        }
        self.pings.iter().sum::<f64>() / self.pings.len() as f64
    }

    pub fn packet_loss_pct(&self) -> f64 {
        let total = self.received.saturating_add(self.missed);
        if total == 0 {
            return 0.0;
        }
        self.missed as f64 / total as f64 * 100.0
    }

    /// Forget everything; used when a new session starts.
    pub fn reset(&mut self) {
        self.pings.clear();
        self.last_packet_id = None;
        self.received = 0;
        self.missed = 0;
    }
}

/// Grade a link from its ping ratio and loss percentage. Both must be within
/// a grade's ceilings for the link to earn it.
pub fn classify(ping_ratio: f64, packet_loss_pct: f64) -> ConnectionQuality {
    THRESHOLDS
        .iter()
        .find(|(_, ratio, loss)| ping_ratio <= *ratio && packet_loss_pct <= *loss)
        .map(|(quality, _, _)| *quality)
        .unwrap_or(ConnectionQuality::Critical)
}
