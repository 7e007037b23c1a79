//! Volumetric flood detection
//!
//! Counts packets per source IP over a short sliding window. Crossing
//! the threshold fires once and clears the window, so a sustained flood
//! alerts once per window refill instead of once per packet.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodConfig {
    /// Window length in seconds
    #[serde(default = "default_window")]
    pub window_secs: f64,
    /// Packets within the window needed to trigger (strictly greater)
    #[serde(default = "default_threshold")]
    pub packet_threshold: usize,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
            packet_threshold: default_threshold(),
        }
    }
}

fn default_window() -> f64 {
    1.0
}

fn default_threshold() -> usize {
    100
}

/// Per-source packet timestamp window
pub struct FloodDetector {
    config: FloodConfig,
    windows: HashMap<IpAddr, VecDeque<Instant>>,
}

impl FloodDetector {
    pub fn new(config: FloodConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    /// Record one packet from `src`. Returns the window size at trigger
    /// time when the threshold is crossed.
    pub fn on_packet(&mut self, src: IpAddr, now: Instant) -> Option<usize> {
        let window = Duration::from_secs_f64(self.config.window_secs);
        let timestamps = self.windows.entry(src).or_default();

        let cutoff = now.checked_sub(window);
        while let Some(front) = timestamps.front() {
            match cutoff {
                Some(cutoff) if *front < cutoff => {
                    timestamps.pop_front();
                }
                _ => break,
            }
        }
        timestamps.push_back(now);

        if timestamps.len() > self.config.packet_threshold {
            let count = timestamps.len();
            timestamps.clear();
            Some(count)
        } else {
            None
        }
    }

    /// Drop windows whose newest entry is older than `max_age`
    pub fn sweep_idle(&mut self, now: Instant, max_age: Duration) {
        self.windows.retain(|_, w| {
            w.back()
                .map(|last| now.saturating_duration_since(*last) <= max_age)
                .unwrap_or(false)
        });
    }

    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }
}
