//! Rule-based detector bank
//!
//! Every captured packet passes through the bank on the ingest thread.
//! Detectors are evaluated in a fixed order and the first trigger wins
//! for that packet; the resulting alert is stamped onto the owning flow
//! and queued for the next classification tick.

pub mod brute_force;
pub mod flood;
pub mod port_scan;
pub mod signatures;
pub mod slow_conn;

use std::net::IpAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::PacketMeta;

pub use brute_force::{BruteForceConfig, BruteForceDetector};
pub use flood::{FloodConfig, FloodDetector};
pub use port_scan::{PortScanConfig, PortScanDetector};
pub use signatures::{SignatureConfig, SignatureKind, SignatureMatcher};
pub use slow_conn::{SlowConnConfig, SlowConnDetector};

/// Which rule fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    Flood,
    PortScan,
    BruteForce,
    SlowConnection,
    SqlInjection,
    ScriptPayload,
}

impl RuleKind {
    /// Attack label reported in alert records
    pub fn label(&self) -> &'static str {
        match self {
            RuleKind::Flood => "DDoS",
            RuleKind::PortScan => "PortScan",
            RuleKind::BruteForce => "SSH-Brute-Force",
            RuleKind::SlowConnection => "Slowloris-DoS",
            RuleKind::SqlInjection => "SQL-Injection",
            RuleKind::ScriptPayload => "XSS-Attack",
        }
    }
}

/// Alert emitted by the bank, consumed by the classification tick
#[derive(Debug, Clone)]
pub struct RuleAlert {
    pub kind: RuleKind,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    /// Observation backing the trigger (packets, ports, attempts...)
    pub count: usize,
    pub ts: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub flood: FloodConfig,
    #[serde(default)]
    pub port_scan: PortScanConfig,
    #[serde(default)]
    pub brute_force: BruteForceConfig,
    #[serde(default)]
    pub slow_conn: SlowConnConfig,
    #[serde(default)]
    pub signatures: SignatureConfig,
    /// How often idle per-source state is pruned (seconds)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_cleanup_interval() -> u64 {
    60
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            flood: FloodConfig::default(),
            port_scan: PortScanConfig::default(),
            brute_force: BruteForceConfig::default(),
            slow_conn: SlowConnConfig::default(),
            signatures: SignatureConfig::default(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// All rule detectors, owned by the ingest thread
pub struct RuleDetectors {
    flood: FloodDetector,
    port_scan: PortScanDetector,
    brute_force: BruteForceDetector,
    slow_conn: SlowConnDetector,
    signatures: SignatureMatcher,
    cleanup_interval: Duration,
    last_cleanup: Instant,
}

impl RuleDetectors {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        Ok(Self {
            signatures: SignatureMatcher::new(&config.signatures)?,
            flood: FloodDetector::new(config.flood),
            port_scan: PortScanDetector::new(config.port_scan),
            brute_force: BruteForceDetector::new(config.brute_force),
            slow_conn: SlowConnDetector::new(config.slow_conn),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
            last_cleanup: Instant::now(),
        })
    }

    /// Run the bank over one packet. First trigger wins.
    pub fn on_packet(&mut self, pkt: &PacketMeta) -> Option<RuleAlert> {
        let now = pkt.ts;
        self.maybe_cleanup(now);

        let (kind, count) = self.evaluate(pkt, now)?;
        Some(RuleAlert {
            kind,
            src_ip: pkt.src_ip,
            dst_ip: pkt.dst_ip,
            dst_port: pkt.dst_port,
            count,
            ts: now,
        })
    }

    fn evaluate(&mut self, pkt: &PacketMeta, now: Instant) -> Option<(RuleKind, usize)> {
        if let Some(count) = self.flood.on_packet(pkt.src_ip, now) {
            return Some((RuleKind::Flood, count));
        }
        if let Some(count) = self.port_scan.on_packet(pkt.src_ip, pkt.dst_port, now) {
            return Some((RuleKind::PortScan, count));
        }

        if let Some(flags) = pkt.tcp_flags() {
            if flags.is_syn() {
                if let Some(count) = self.brute_force.on_attempt(pkt.src_ip, pkt.dst_port, now) {
                    return Some((RuleKind::BruteForce, count));
                }
                if let Some(count) = self.slow_conn.on_syn(pkt.src_ip, pkt.dst_port, now) {
                    return Some((RuleKind::SlowConnection, count));
                }
            } else if flags.ack {
                // Forward ACK completes the handshake; drop half-open credit
                self.slow_conn.on_established(pkt.src_ip);
            }
        }

        match self.signatures.scan(&pkt.payload) {
            Some(SignatureKind::Injection) => Some((RuleKind::SqlInjection, 1)),
            Some(SignatureKind::Script) => Some((RuleKind::ScriptPayload, 1)),
            None => None,
        }
    }

    fn maybe_cleanup(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_cleanup) < self.cleanup_interval {
            return;
        }
        self.last_cleanup = now;
        let max_age = self.cleanup_interval * 2;
        self.flood.sweep_idle(now, max_age);
        self.port_scan.sweep_idle(now, max_age);
        self.brute_force.sweep_idle(now, max_age);
        self.slow_conn.sweep_idle(now, max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{IpProtocol, TcpFlags, TcpMeta};
    use std::net::Ipv4Addr;

    fn syn_packet(src: [u8; 4], dst_port: u16, ts: Instant) -> PacketMeta {
        PacketMeta {
            ts,
            src_ip: IpAddr::V4(Ipv4Addr::from(src)),
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            src_port: 40000,
            dst_port,
            protocol: IpProtocol::Tcp,
            tcp: Some(TcpMeta {
                flags: TcpFlags::from_u8(0x02),
                window: 64240,
                header_len: 20,
            }),
            total_len: 60,
            payload: Vec::new(),
        }
    }

    fn data_packet(payload: &[u8], ts: Instant) -> PacketMeta {
        PacketMeta {
            ts,
            src_ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 5)),
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            src_port: 40001,
            dst_port: 8443,
            protocol: IpProtocol::Tcp,
            tcp: Some(TcpMeta {
                flags: TcpFlags::from_u8(0x18),
                window: 64240,
                header_len: 20,
            }),
            total_len: 40 + payload.len() as u32,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn brute_force_triggers_on_auth_port() {
        let mut bank = RuleDetectors::new(DetectorConfig::default()).unwrap();
        let base = Instant::now();

        let mut alert = None;
        for i in 0..10 {
            let pkt = syn_packet([203, 0, 113, 4], 22, base + Duration::from_millis(i * 500));
            alert = bank.on_packet(&pkt).or(alert);
        }
        let alert = alert.unwrap();
        assert_eq!(alert.kind, RuleKind::BruteForce);
        assert_eq!(alert.dst_port, 22);
    }

    #[test]
    fn signature_alert_carries_kind() {
        let mut bank = RuleDetectors::new(DetectorConfig::default()).unwrap();
        let pkt = data_packet(b"id=1 UNION SELECT * FROM users", Instant::now());
        let alert = bank.on_packet(&pkt).unwrap();
        assert_eq!(alert.kind, RuleKind::SqlInjection);
        assert_eq!(alert.kind.label(), "SQL-Injection");
    }

    #[test]
    fn flood_outranks_slow_conn() {
        // 150 packets in one second against a web port: the flood window
        // fills before another slow-conn trigger, so packet 101 reports a
        // flood even though half-open counting runs on the same stream.
        let mut bank = RuleDetectors::new(DetectorConfig::default()).unwrap();
        let base = Instant::now();

        let mut kinds = Vec::new();
        for i in 0..150u64 {
            let pkt = syn_packet([198, 51, 100, 2], 80, base + Duration::from_micros(i * 6_600));
            if let Some(alert) = bank.on_packet(&pkt) {
                kinds.push(alert.kind);
            }
        }
        assert!(kinds.contains(&RuleKind::Flood));
    }

    #[test]
    fn benign_traffic_stays_quiet() {
        let mut bank = RuleDetectors::new(DetectorConfig::default()).unwrap();
        let base = Instant::now();

        for i in 0..30u64 {
            let pkt = data_packet(b"GET / HTTP/1.1\r\nHost: example.org\r\n\r\n", base + Duration::from_millis(i * 100));
            assert!(bank.on_packet(&pkt).is_none());
        }
    }
}
