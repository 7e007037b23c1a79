//! Slow-connection (slowloris-style) detection
//!
//! Tracks half-open connections per source toward well-known web ports.
//! A half-open is a bare SYN with no completing handshake observed; a
//! source accumulating many of them is holding sockets open on purpose.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowConnConfig {
    /// Ports treated as web-server ports
    #[serde(default = "default_web_ports")]
    pub web_ports: Vec<u16>,
    /// Half-open connections needed to trigger
    #[serde(default = "default_threshold")]
    pub half_open_threshold: usize,
}

impl Default for SlowConnConfig {
    fn default() -> Self {
        Self {
            web_ports: default_web_ports(),
            half_open_threshold: default_threshold(),
        }
    }
}

fn default_web_ports() -> Vec<u16> {
    vec![80, 443, 8080]
}

fn default_threshold() -> usize {
    20
}

struct HalfOpenState {
    count: usize,
    last_seen: Instant,
}

/// Per-source half-open connection counter
pub struct SlowConnDetector {
    config: SlowConnConfig,
    sources: HashMap<IpAddr, HalfOpenState>,
}

impl SlowConnDetector {
    pub fn new(config: SlowConnConfig) -> Self {
        Self {
            config,
            sources: HashMap::new(),
        }
    }

    /// Record a bare SYN toward `dst_port`. Returns the half-open count
    /// when the threshold is reached; the counter resets on trigger.
    pub fn on_syn(&mut self, src: IpAddr, dst_port: u16, now: Instant) -> Option<usize> {
        if !self.config.web_ports.contains(&dst_port) {
            return None;
        }

        let state = self.sources.entry(src).or_insert(HalfOpenState {
            count: 0,
            last_seen: now,
        });
        state.count += 1;
        state.last_seen = now;

        if state.count >= self.config.half_open_threshold {
            let count = state.count;
            state.count = 0;
            Some(count)
        } else {
            None
        }
    }

    /// A completed handshake from `src` clears its half-open count
    pub fn on_established(&mut self, src: IpAddr) {
        if let Some(state) = self.sources.get_mut(&src) {
            state.count = 0;
        }
    }

    /// Drop sources idle longer than `max_age`
    pub fn sweep_idle(&mut self, now: Instant, max_age: Duration) {
        self.sources
            .retain(|_, s| now.saturating_duration_since(s.last_seen) <= max_age);
    }

    pub fn tracked_sources(&self) -> usize {
        self.sources.len()
    }
}
