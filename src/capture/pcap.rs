//! pcap-backed packet sources

use std::time::Instant;

use anyhow::{Context, Result};
use pcap::{Active, Capture, Device, Linktype, Offline};
use tracing::{debug, info};

use super::{parse_frame, parse_ip_frame, CaptureConfig, PacketSource, SourceEvent};

fn parse_for_linktype(linktype: Linktype, data: &[u8], ts: Instant) -> Option<crate::core::PacketMeta> {
    match linktype {
        Linktype::ETHERNET => parse_frame(data, ts),
        // LINUX_SLL and raw captures start at (or near) the IP header
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => parse_ip_frame(data, ts),
        _ => parse_frame(data, ts),
    }
}

/// Live capture on a network interface
pub struct LiveSource {
    capture: Capture<Active>,
    linktype: Linktype,
    name: String,
}

impl LiveSource {
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let device = match &config.interface {
            Some(name) => Device::from(name.as_str()),
            None => Device::lookup()
                .context("looking up default capture device")?
                .context("no capture device available")?,
        };
        let name = device.name.clone();

        let mut capture = Capture::from_device(device)
            .with_context(|| format!("opening device {name}"))?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen)
            .timeout(config.timeout_ms)
            .open()
            .with_context(|| format!("activating capture on {name}"))?;

        if !config.filter.is_empty() {
            capture
                .filter(&config.filter, true)
                .with_context(|| format!("applying filter {:?}", config.filter))?;
        }

        let linktype = capture.get_datalink();
        info!(interface = name.as_str(), ?linktype, "live capture opened");
        Ok(Self {
            capture,
            linktype,
            name,
        })
    }
}

impl PacketSource for LiveSource {
    fn next_event(&mut self) -> Result<SourceEvent> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = Instant::now();
                match parse_for_linktype(self.linktype, packet.data, ts) {
                    Some(pkt) => Ok(SourceEvent::Packet(pkt)),
                    None => Ok(SourceEvent::Timeout),
                }
            }
            Err(pcap::Error::TimeoutExpired) => Ok(SourceEvent::Timeout),
            Err(err) => Err(err).context("reading from live capture"),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Offline replay of a pcap file
pub struct FileSource {
    capture: Capture<Offline>,
    linktype: Linktype,
    name: String,
    replayed: u64,
}

impl FileSource {
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let path = config
            .pcap_file
            .as_deref()
            .context("pcap_file is required for file capture")?;
        let capture =
            Capture::from_file(path).with_context(|| format!("opening pcap file {path}"))?;
        let linktype = capture.get_datalink();
        info!(file = path, ?linktype, "pcap replay opened");
        Ok(Self {
            capture,
            linktype,
            name: path.to_string(),
            replayed: 0,
        })
    }
}

impl PacketSource for FileSource {
    fn next_event(&mut self) -> Result<SourceEvent> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = Instant::now();
                match parse_for_linktype(self.linktype, packet.data, ts) {
                    Some(pkt) => {
                        self.replayed += 1;
                        Ok(SourceEvent::Packet(pkt))
                    }
                    None => Ok(SourceEvent::Timeout),
                }
            }
            Err(pcap::Error::NoMorePackets) => {
                debug!(replayed = self.replayed, "pcap file exhausted");
                Ok(SourceEvent::Eof)
            }
            Err(err) => Err(err).context("reading from pcap file"),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
