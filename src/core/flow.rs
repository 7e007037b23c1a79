//! Bidirectional flow accumulation
//!
//! A flow is every packet sharing one canonical 5-tuple. The key orders
//! its endpoints deterministically so both directions of a connection
//! hash to the same entry; packet direction falls out of the comparison.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use super::packet::{Direction, IpProtocol, PacketMeta, TcpFlags};
use crate::detect::RuleKind;

/// Direction-independent connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub ip_a: IpAddr,
    pub port_a: u16,
    pub ip_b: IpAddr,
    pub port_b: u16,
    pub protocol: IpProtocol,
}

impl FlowKey {
    /// Canonicalize a packet's 5-tuple. The lexicographically smaller
    /// (ip, port) endpoint is always `a`; a packet sent by endpoint `a`
    /// travels `Forward`.
    pub fn from_packet(pkt: &PacketMeta) -> (Self, Direction) {
        if (pkt.src_ip, pkt.src_port) <= (pkt.dst_ip, pkt.dst_port) {
            (
                Self {
                    ip_a: pkt.src_ip,
                    port_a: pkt.src_port,
                    ip_b: pkt.dst_ip,
                    port_b: pkt.dst_port,
                    protocol: pkt.protocol,
                },
                Direction::Forward,
            )
        } else {
            (
                Self {
                    ip_a: pkt.dst_ip,
                    port_a: pkt.dst_port,
                    ip_b: pkt.src_ip,
                    port_b: pkt.src_port,
                    protocol: pkt.protocol,
                },
                Direction::Backward,
            )
        }
    }
}

/// Why a flow left the active table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// TCP FIN or RST observed
    FinRst,
    /// No packet within the idle timeout
    IdleTimeout,
    /// Forced out during engine shutdown
    Shutdown,
}

/// Mutable per-connection accumulator
///
/// Owned exclusively by the flow table while active; ownership moves to
/// the completed queue when the flow terminates.
#[derive(Debug, Clone)]
pub struct Flow {
    pub start: Instant,
    pub end: Instant,

    // Forward direction (canonical endpoint a -> b)
    pub fwd_packets: u64,
    pub fwd_bytes: u64,
    pub fwd_lens: Vec<u32>,
    pub fwd_iats: Vec<Duration>,
    pub fwd_last: Option<Instant>,
    pub fwd_windows: Vec<u16>,
    pub fwd_headers: Vec<u16>,

    // Backward direction (b -> a)
    pub bwd_packets: u64,
    pub bwd_bytes: u64,
    pub bwd_lens: Vec<u32>,
    pub bwd_iats: Vec<Duration>,
    pub bwd_last: Option<Instant>,
    pub bwd_windows: Vec<u16>,
    pub bwd_headers: Vec<u16>,

    // Aggregate TCP flag counters
    pub syn_count: u32,
    pub ack_count: u32,
    pub fin_count: u32,
    pub rst_count: u32,
    pub psh_count: u32,
    pub urg_count: u32,
    pub ece_count: u32,
    pub cwr_count: u32,

    /// Destination port of the first packet (the probed service)
    pub dst_port: u16,
    pub protocol: IpProtocol,

    /// Set when any rule detector fired for a packet of this flow;
    /// suppresses model scoring at completion.
    pub rule_hit: Option<RuleKind>,
    /// Filled in when the flow is moved to the completed queue
    pub completed_by: Option<CompletionReason>,
}

impl Flow {
    /// Create from the first packet of a connection
    pub fn new(pkt: &PacketMeta) -> Self {
        let mut flow = Self {
            start: pkt.ts,
            end: pkt.ts,
            fwd_packets: 0,
            fwd_bytes: 0,
            fwd_lens: Vec::new(),
            fwd_iats: Vec::new(),
            fwd_last: None,
            fwd_windows: Vec::new(),
            fwd_headers: Vec::new(),
            bwd_packets: 0,
            bwd_bytes: 0,
            bwd_lens: Vec::new(),
            bwd_iats: Vec::new(),
            bwd_last: None,
            bwd_windows: Vec::new(),
            bwd_headers: Vec::new(),
            syn_count: 0,
            ack_count: 0,
            fin_count: 0,
            rst_count: 0,
            psh_count: 0,
            urg_count: 0,
            ece_count: 0,
            cwr_count: 0,
            dst_port: pkt.dst_port,
            protocol: pkt.protocol,
            rule_hit: None,
            completed_by: None,
        };
        let (_, dir) = FlowKey::from_packet(pkt);
        flow.update(pkt, dir);
        flow
    }

    /// Append one packet's statistics
    pub fn update(&mut self, pkt: &PacketMeta, direction: Direction) {
        let now = pkt.ts;
        self.end = now;

        match direction {
            Direction::Forward => {
                self.fwd_packets += 1;
                self.fwd_bytes += pkt.total_len as u64;
                self.fwd_lens.push(pkt.total_len);
                if let Some(last) = self.fwd_last {
                    self.fwd_iats.push(now.saturating_duration_since(last));
                }
                self.fwd_last = Some(now);
                if let Some(tcp) = pkt.tcp {
                    self.fwd_windows.push(tcp.window);
                    self.fwd_headers.push(tcp.header_len);
                }
            }
            Direction::Backward => {
                self.bwd_packets += 1;
                self.bwd_bytes += pkt.total_len as u64;
                self.bwd_lens.push(pkt.total_len);
                if let Some(last) = self.bwd_last {
                    self.bwd_iats.push(now.saturating_duration_since(last));
                }
                self.bwd_last = Some(now);
                if let Some(tcp) = pkt.tcp {
                    self.bwd_windows.push(tcp.window);
                    self.bwd_headers.push(tcp.header_len);
                }
            }
        }

        if let Some(flags) = pkt.tcp_flags() {
            self.count_flags(flags);
        }
    }

    fn count_flags(&mut self, flags: TcpFlags) {
        if flags.syn { self.syn_count += 1; }
        if flags.ack { self.ack_count += 1; }
        if flags.fin { self.fin_count += 1; }
        if flags.rst { self.rst_count += 1; }
        if flags.psh { self.psh_count += 1; }
        if flags.urg { self.urg_count += 1; }
        if flags.ece { self.ece_count += 1; }
        if flags.cwr { self.cwr_count += 1; }
    }

    /// Record that a rule detector fired for a packet in this flow.
    /// The first hit wins; later hits do not overwrite it.
    pub fn mark_rule_hit(&mut self, kind: RuleKind) {
        if self.rule_hit.is_none() {
            self.rule_hit = Some(kind);
        }
    }

    pub fn total_packets(&self) -> u64 {
        self.fwd_packets + self.bwd_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.fwd_bytes + self.bwd_bytes
    }

    pub fn duration(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }

    /// Idle time since the last packet
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.end)
    }
}
