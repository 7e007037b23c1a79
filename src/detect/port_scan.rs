//! Port scan detection
//!
//! Tracks the distinct destination ports each source contacts. Port
//! entries refresh their last-seen time on every hit, so a scanner
//! probing slowly still accumulates as long as it stays inside the
//! refresh window. Repeat probes of one port never accumulate.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortScanConfig {
    /// Seconds a probed port stays counted without a refresh
    #[serde(default = "default_window")]
    pub window_secs: f64,
    /// Distinct ports needed to trigger
    #[serde(default = "default_threshold")]
    pub port_threshold: usize,
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
            port_threshold: default_threshold(),
        }
    }
}

fn default_window() -> f64 {
    60.0
}

fn default_threshold() -> usize {
    10
}

/// Per-source distinct-port window with last-seen refresh
pub struct PortScanDetector {
    config: PortScanConfig,
    ports: HashMap<IpAddr, HashMap<u16, Instant>>,
}

impl PortScanDetector {
    pub fn new(config: PortScanConfig) -> Self {
        Self {
            config,
            ports: HashMap::new(),
        }
    }

    /// Record a probe of `dst_port` by `src`. Returns the distinct port
    /// count when the threshold is reached; the set clears on trigger.
    pub fn on_packet(&mut self, src: IpAddr, dst_port: u16, now: Instant) -> Option<usize> {
        let window = Duration::from_secs_f64(self.config.window_secs);
        let seen = self.ports.entry(src).or_default();

        seen.retain(|_, last| now.saturating_duration_since(*last) <= window);
        seen.insert(dst_port, now);

        if seen.len() >= self.config.port_threshold {
            let count = seen.len();
            seen.clear();
            Some(count)
        } else {
            None
        }
    }

    /// Drop sources with no probe newer than `max_age`
    pub fn sweep_idle(&mut self, now: Instant, max_age: Duration) {
        self.ports.retain(|_, seen| {
            seen.values()
                .max()
                .map(|last| now.saturating_duration_since(*last) <= max_age)
                .unwrap_or(false)
        });
    }

    pub fn tracked_sources(&self) -> usize {
        self.ports.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn src() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(172, 16, 0, 9))
    }

    #[test]
    fn distinct_ports_trigger() {
        let mut det = PortScanDetector::new(PortScanConfig::default());
        let now = Instant::now();

        for port in 1000..1009u16 {
            assert!(det.on_packet(src(), port, now).is_none());
        }
        // Tenth distinct port crosses the threshold
        assert_eq!(det.on_packet(src(), 1009, now), Some(10));
    }

    #[test]
    fn same_port_repeated_never_triggers() {
        let mut det = PortScanDetector::new(PortScanConfig::default());
        let now = Instant::now();

        for _ in 0..50 {
            assert!(det.on_packet(src(), 443, now).is_none());
        }
    }

    #[test]
    fn trigger_clears_the_set() {
        let mut det = PortScanDetector::new(PortScanConfig::default());
        let now = Instant::now();

        for port in 2000..2010u16 {
            det.on_packet(src(), port, now);
        }
        // Set was cleared on trigger; nine more ports stay quiet
        for port in 3000..3009u16 {
            assert!(det.on_packet(src(), port, now).is_none());
        }
    }

    #[test]
    fn old_ports_age_out() {
        let config = PortScanConfig { window_secs: 60.0, port_threshold: 10 };
        let mut det = PortScanDetector::new(config);
        let base = Instant::now();

        for port in 4000..4009u16 {
            det.on_packet(src(), port, base);
        }
        // 90s later those nine ports have aged out; one new probe is
        // just a fresh single-port entry.
        let later = base + Duration::from_secs(90);
        assert!(det.on_packet(src(), 4009, later).is_none());
    }
}
