//! Packet sources
//!
//! A [`PacketSource`] hands the engine fully parsed [`PacketMeta`]
//! values, one event at a time. Two implementations exist: live pcap
//! capture on an interface and offline pcap-file replay. Frames that
//! are not IP, or that fail to parse, are skipped at this boundary and
//! never reach the flow table.

pub mod pcap;

use std::net::IpAddr;
use std::time::Instant;

use anyhow::Result;
use etherparse::SlicedPacket;
use serde::{Deserialize, Serialize};

use crate::core::{IpProtocol, PacketMeta, TcpFlags, TcpMeta};

pub use self::pcap::{FileSource, LiveSource};

/// Capture method selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    /// Live capture on an interface
    Live,
    /// Replay a pcap file
    File,
}

impl Default for CaptureMethod {
    fn default() -> Self {
        CaptureMethod::Live
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub method: CaptureMethod,
    /// Interface name; `None` picks the default device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    /// Pcap file path for the file method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcap_file: Option<String>,
    #[serde(default = "default_snaplen")]
    pub snaplen: i32,
    /// Read timeout for the live capture loop
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i32,
    #[serde(default = "default_promiscuous")]
    pub promiscuous: bool,
    /// BPF filter applied to the capture, e.g. "ip"
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            method: CaptureMethod::default(),
            interface: None,
            pcap_file: None,
            snaplen: default_snaplen(),
            timeout_ms: default_timeout_ms(),
            promiscuous: default_promiscuous(),
            filter: default_filter(),
        }
    }
}

fn default_snaplen() -> i32 {
    65535
}

fn default_timeout_ms() -> i32 {
    100
}

fn default_promiscuous() -> bool {
    true
}

fn default_filter() -> String {
    "ip or ip6".to_string()
}

/// One read from a packet source
pub enum SourceEvent {
    Packet(PacketMeta),
    /// Read timeout elapsed with no traffic; poll again
    Timeout,
    /// The source has no more packets (file replay)
    Eof,
}

/// Blocking packet supplier driven from the capture thread
pub trait PacketSource: Send {
    fn next_event(&mut self) -> Result<SourceEvent>;
    fn name(&self) -> &str;
}

/// Build a source from configuration
pub fn create_source(config: &CaptureConfig) -> Result<Box<dyn PacketSource>> {
    match config.method {
        CaptureMethod::Live => Ok(Box::new(LiveSource::open(config)?)),
        CaptureMethod::File => Ok(Box::new(FileSource::open(config)?)),
    }
}

/// Parse one link-layer frame into a [`PacketMeta`].
///
/// Returns `None` for non-IP frames and anything etherparse rejects.
pub fn parse_frame(data: &[u8], ts: Instant) -> Option<PacketMeta> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;
    parse_sliced(&sliced, data.len() as u32, ts)
}

/// Parse a frame that starts at the IP header (raw-IP link types)
pub fn parse_ip_frame(data: &[u8], ts: Instant) -> Option<PacketMeta> {
    let sliced = SlicedPacket::from_ip(data).ok()?;
    parse_sliced(&sliced, data.len() as u32, ts)
}

fn parse_sliced(sliced: &SlicedPacket<'_>, total_len: u32, ts: Instant) -> Option<PacketMeta> {
    let (src_ip, dst_ip, protocol) = match &sliced.net {
        Some(etherparse::NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (
                IpAddr::from(header.source_addr()),
                IpAddr::from(header.destination_addr()),
                IpProtocol::from(header.protocol().0),
            )
        }
        Some(etherparse::NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            (
                IpAddr::from(header.source_addr()),
                IpAddr::from(header.destination_addr()),
                IpProtocol::from(header.next_header().0),
            )
        }
        _ => return None, // ARP and friends
    };

    let mut pkt = PacketMeta::new(src_ip, dst_ip, protocol);
    pkt.ts = ts;
    pkt.total_len = total_len;

    match &sliced.transport {
        Some(etherparse::TransportSlice::Tcp(tcp)) => {
            pkt.src_port = tcp.source_port();
            pkt.dst_port = tcp.destination_port();
            pkt.tcp = Some(TcpMeta {
                flags: TcpFlags {
                    fin: tcp.fin(),
                    syn: tcp.syn(),
                    rst: tcp.rst(),
                    psh: tcp.psh(),
                    ack: tcp.ack(),
                    urg: tcp.urg(),
                    ece: tcp.ece(),
                    cwr: tcp.cwr(),
                },
                window: tcp.window_size(),
                header_len: u16::from(tcp.data_offset()) * 4,
            });
            pkt.payload = tcp.payload().to_vec();
        }
        Some(etherparse::TransportSlice::Udp(udp)) => {
            pkt.src_port = udp.source_port();
            pkt.dst_port = udp.destination_port();
            pkt.payload = udp.payload().to_vec();
        }
        _ => {}
    }

    Some(pkt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    fn tcp_frame(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([192, 168, 1, 5], [10, 0, 0, 1], 64)
            .tcp(44321, 80, 1000, 64240)
            .syn();
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    #[test]
    fn parses_tcp_frame() {
        let frame = tcp_frame(b"hello");
        let pkt = parse_frame(&frame, Instant::now()).unwrap();

        assert_eq!(pkt.src_ip.to_string(), "192.168.1.5");
        assert_eq!(pkt.dst_ip.to_string(), "10.0.0.1");
        assert_eq!(pkt.src_port, 44321);
        assert_eq!(pkt.dst_port, 80);
        assert_eq!(pkt.protocol, IpProtocol::Tcp);
        assert!(pkt.tcp_flags().unwrap().syn);
        assert_eq!(pkt.payload, b"hello");
        assert_eq!(pkt.total_len, frame.len() as u32);
    }

    #[test]
    fn parses_udp_frame() {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([10, 0, 0, 9], [10, 0, 0, 1], 64)
            .udp(5353, 53);
        let mut frame = Vec::new();
        builder.write(&mut frame, b"query").unwrap();

        let pkt = parse_frame(&frame, Instant::now()).unwrap();
        assert_eq!(pkt.protocol, IpProtocol::Udp);
        assert_eq!(pkt.dst_port, 53);
        assert!(pkt.tcp.is_none());
        assert_eq!(pkt.payload, b"query");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_frame(&[0u8; 10], Instant::now()).is_none());
        assert!(parse_frame(&[], Instant::now()).is_none());
    }

    #[test]
    fn raw_ip_frames_parse_without_link_layer() {
        let builder = PacketBuilder::ipv4([172, 16, 0, 2], [172, 16, 0, 3], 64)
            .tcp(50000, 443, 1, 1024);
        let mut frame = Vec::new();
        builder.write(&mut frame, &[]).unwrap();

        let pkt = parse_ip_frame(&frame, Instant::now()).unwrap();
        assert_eq!(pkt.dst_port, 443);
        assert!(parse_frame(&frame, Instant::now()).is_none());
    }
}
