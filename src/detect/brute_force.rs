//! Brute-force detection on authentication ports
//!
//! Counts connection attempts (SYNs) per source against a fixed
//! authentication port inside a short window. The attempt list is
//! length-capped so a pathological source cannot grow it without bound.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BruteForceConfig {
    /// Monitored authentication port
    #[serde(default = "default_port")]
    pub auth_port: u16,
    /// Window length in seconds
    #[serde(default = "default_window")]
    pub window_secs: f64,
    /// Attempts within the window needed to trigger
    #[serde(default = "default_threshold")]
    pub attempt_threshold: usize,
    /// Hard cap on remembered attempts per source
    #[serde(default = "default_max_attempts")]
    pub max_tracked_attempts: usize,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            auth_port: default_port(),
            window_secs: default_window(),
            attempt_threshold: default_threshold(),
            max_tracked_attempts: default_max_attempts(),
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_window() -> f64 {
    10.0
}

fn default_threshold() -> usize {
    10
}

fn default_max_attempts() -> usize {
    128
}

/// Per-source capped attempt window
pub struct BruteForceDetector {
    config: BruteForceConfig,
    attempts: HashMap<IpAddr, VecDeque<Instant>>,
}

impl BruteForceDetector {
    pub fn new(config: BruteForceConfig) -> Self {
        Self {
            config,
            attempts: HashMap::new(),
        }
    }

    /// Record a connection attempt. Only SYN packets aimed at the
    /// configured port count; everything else returns `None` untouched.
    pub fn on_attempt(&mut self, src: IpAddr, dst_port: u16, now: Instant) -> Option<usize> {
        if dst_port != self.config.auth_port {
            return None;
        }

        let window = Duration::from_secs_f64(self.config.window_secs);
        let attempts = self.attempts.entry(src).or_default();

        while let Some(front) = attempts.front() {
            if now.saturating_duration_since(*front) > window {
                attempts.pop_front();
            } else {
                break;
            }
        }
        if attempts.len() >= self.config.max_tracked_attempts {
            attempts.pop_front();
        }
        attempts.push_back(now);

        if attempts.len() >= self.config.attempt_threshold {
            let count = attempts.len();
            attempts.clear();
            Some(count)
        } else {
            None
        }
    }

    /// Drop sources with no attempt newer than `max_age`
    pub fn sweep_idle(&mut self, now: Instant, max_age: Duration) {
        self.attempts.retain(|_, a| {
            a.back()
                .map(|last| now.saturating_duration_since(*last) <= max_age)
                .unwrap_or(false)
        });
    }

    pub fn tracked_sources(&self) -> usize {
        self.attempts.len()
    }
}
