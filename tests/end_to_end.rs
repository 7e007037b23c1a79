//! Full-pipeline scenarios: packets in, classified snapshot out.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flowguard::capture::{PacketSource, SourceEvent};
use flowguard::core::{Flow, FlowKey, IpProtocol, PacketMeta, TcpFlags, TcpMeta};
use flowguard::detect::{DetectorConfig, RuleDetectors};
use flowguard::engine::{
    Engine, EngineConfig, EngineStats, EventQueue, Orchestrator, OrchestratorConfig, RuleEvent,
    SnapshotPublisher, ThreatLevel,
};
use flowguard::features::FeatureSchema;
use flowguard::flow_table::{CompletedQueue, FlowConfig, FlowTable};

fn tcp_packet(
    src: [u8; 4],
    sp: u16,
    dst: [u8; 4],
    dp: u16,
    flags: u8,
    ts: Instant,
) -> PacketMeta {
    let mut pkt = PacketMeta::new(
        IpAddr::V4(Ipv4Addr::from(src)),
        IpAddr::V4(Ipv4Addr::from(dst)),
        IpProtocol::Tcp,
    );
    pkt.ts = ts;
    pkt.src_port = sp;
    pkt.dst_port = dp;
    pkt.total_len = 60;
    pkt.tcp = Some(TcpMeta {
        flags: TcpFlags::from_u8(flags),
        window: 64240,
        header_len: 20,
    });
    pkt
}

struct Harness {
    table: Arc<FlowTable>,
    completed: Arc<CompletedQueue>,
    detectors: RuleDetectors,
    rule_events: Arc<EventQueue<RuleEvent>>,
    orchestrator: Orchestrator,
    snapshot: flowguard::SnapshotHandle,
}

impl Harness {
    fn new() -> Self {
        let flow_config = FlowConfig::default();
        let completed = Arc::new(CompletedQueue::new(flow_config.completed_capacity));
        let table = Arc::new(FlowTable::new(flow_config));
        let detectors = RuleDetectors::new(DetectorConfig::default()).unwrap();
        let rule_events = Arc::new(EventQueue::new(512));
        let samples: Arc<EventQueue<Flow>> = Arc::new(EventQueue::new(256));
        let publisher = SnapshotPublisher::new(None);
        let snapshot = publisher.handle();
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::clone(&table),
            Arc::clone(&completed),
            Arc::clone(&rule_events),
            samples,
            None,
            FeatureSchema::default(),
            publisher,
            Arc::new(EngineStats::default()),
        );
        Self {
            table,
            completed,
            detectors,
            rule_events,
            orchestrator,
            snapshot,
        }
    }

    /// Mirror of the engine's per-packet ingest path
    fn feed(&mut self, pkt: &PacketMeta) {
        let alert = self.detectors.on_packet(pkt);
        let (_, flow) = self
            .table
            .ingest(pkt, alert.as_ref().map(|a| a.kind), &self.completed);
        if let Some(alert) = alert {
            self.rule_events.push(RuleEvent { alert, flow });
        }
    }
}

#[test]
fn both_directions_share_one_flow() {
    let mut h = Harness::new();
    let base = Instant::now();

    let fwd = tcp_packet([10, 0, 0, 1], 1000, [10, 0, 0, 2], 8443, 0x18, base);
    let bwd = tcp_packet([10, 0, 0, 2], 8443, [10, 0, 0, 1], 1000, 0x18, base);
    h.feed(&fwd);
    h.feed(&bwd);

    assert_eq!(h.table.active_count(), 1);
    let (k1, _) = FlowKey::from_packet(&fwd);
    let (k2, _) = FlowKey::from_packet(&bwd);
    assert_eq!(k1, k2);
}

#[test]
fn fin_completes_flow_into_one_record() {
    let mut h = Harness::new();
    let base = Instant::now();
    let client = [10, 0, 0, 1];
    let server = [10, 0, 0, 2];

    // 5 client packets (the last carries FIN) and 3 server packets
    for i in 0..4u64 {
        h.feed(&tcp_packet(
            client,
            1000,
            server,
            8443,
            0x18,
            base + Duration::from_millis(i * 10),
        ));
    }
    for i in 0..3u64 {
        h.feed(&tcp_packet(
            server,
            8443,
            client,
            1000,
            0x18,
            base + Duration::from_millis(40 + i * 10),
        ));
    }
    h.feed(&tcp_packet(
        client,
        1000,
        server,
        8443,
        0x11, // FIN+ACK
        base + Duration::from_millis(80),
    ));

    assert_eq!(h.table.active_count(), 0);
    assert_eq!(h.completed.len(), 1);

    h.orchestrator.tick(base + Duration::from_millis(100));
    let snap = h.snapshot.latest();
    assert_eq!(snap.traffic.len(), 1);
    // Client is the canonically smaller endpoint here
    assert_eq!(snap.traffic[0].fwd_packets, 5);
    assert_eq!(snap.traffic[0].bwd_packets, 3);
    assert_eq!(snap.traffic[0].dest_port, 8443);
    assert!(snap.alerts.is_empty());
}

#[test]
fn injection_on_fin_packet_beats_the_model() {
    let mut h = Harness::new();
    let base = Instant::now();

    h.feed(&tcp_packet([10, 0, 0, 1], 1000, [10, 0, 0, 2], 80, 0x18, base));
    let mut fin = tcp_packet(
        [10, 0, 0, 1],
        1000,
        [10, 0, 0, 2],
        80,
        0x11,
        base + Duration::from_millis(10),
    );
    fin.payload = b"id=1 union select password from users".to_vec();
    h.feed(&fin);

    assert_eq!(h.table.active_count(), 0);
    h.orchestrator.tick(base + Duration::from_millis(500));
    let snap = h.snapshot.latest();

    // The verdict reached the flow even though it completed on the same
    // packet: every record for it is rule-labeled, nothing model-scored
    assert!(!snap.traffic.is_empty());
    for record in &snap.traffic {
        assert_eq!(record.label, "SQL-Injection");
        assert_eq!(record.detection_method, "rule");
        assert_eq!(record.fwd_packets, 2);
    }
    assert_eq!(snap.alerts.len(), 1);
    assert_eq!(snap.alerts[0].record.label, "SQL-Injection");
}

#[test]
fn flood_raises_critical_rule_alert() {
    let mut h = Harness::new();
    let base = Instant::now();

    // 150 SYNs inside one second from a single source
    for i in 0..150u64 {
        h.feed(&tcp_packet(
            [203, 0, 113, 50],
            40000,
            [10, 0, 0, 2],
            80,
            0x02,
            base + Duration::from_micros(i * 6_000),
        ));
    }

    h.orchestrator.tick(base + Duration::from_secs(1));
    let snap = h.snapshot.latest();

    assert!(!snap.alerts.is_empty());
    let labels: Vec<&str> = snap.alerts.iter().map(|a| a.record.label.as_str()).collect();
    assert!(labels.contains(&"DDoS"), "expected a DDoS alert, got {labels:?}");
    for alert in &snap.alerts {
        assert_eq!(alert.record.detection_method, "rule");
        assert_eq!(alert.record.confidence, 99.0);
        assert_eq!(alert.threat_level, ThreatLevel::Critical);
    }
    // No model is configured, so nothing can be model-labeled
    assert!(snap
        .traffic
        .iter()
        .all(|r| r.detection_method == "rule" || r.label == "BENIGN"));
}

#[test]
fn idle_flows_expire_on_sweep() {
    let mut h = Harness::new();
    let base = Instant::now();

    h.feed(&tcp_packet([10, 0, 0, 1], 1000, [10, 0, 0, 2], 8443, 0x18, base));
    h.feed(&tcp_packet(
        [10, 0, 0, 1],
        1000,
        [10, 0, 0, 2],
        8443,
        0x18,
        base + Duration::from_millis(10),
    ));
    assert_eq!(h.table.active_count(), 1);

    // Under the 2s idle timeout: flow stays
    h.orchestrator.tick(base + Duration::from_secs(1));
    assert_eq!(h.table.active_count(), 1);

    // Past it: swept, classified, published
    h.orchestrator.tick(base + Duration::from_secs(4));
    assert_eq!(h.table.active_count(), 0);
    assert_eq!(h.snapshot.latest().traffic.len(), 1);
}

#[test]
fn traffic_buffer_keeps_newest_200() {
    let mut h = Harness::new();
    let base = Instant::now();

    for i in 0..250u16 {
        let sp = 1000 + i;
        let flow_start = base + Duration::from_millis(u64::from(i));
        h.feed(&tcp_packet([10, 0, 0, 1], sp, [10, 0, 0, 2], 8443, 0x18, flow_start));
        h.feed(&tcp_packet(
            [10, 0, 0, 2],
            8443,
            [10, 0, 0, 1],
            sp,
            0x11,
            flow_start + Duration::from_micros(100),
        ));
    }

    h.orchestrator.tick(base + Duration::from_secs(1));
    let snap = h.snapshot.latest();
    assert_eq!(snap.traffic.len(), 200);
}

#[test]
fn single_packet_flows_never_published() {
    let mut h = Harness::new();
    let base = Instant::now();

    // A lone RST completes its flow immediately with one packet
    h.feed(&tcp_packet([10, 0, 0, 9], 2000, [10, 0, 0, 2], 8443, 0x04, base));
    h.orchestrator.tick(base + Duration::from_millis(500));

    assert!(h.snapshot.latest().traffic.is_empty());
}

/// Deterministic in-memory packet source for driving the whole engine
struct ScriptedSource {
    packets: std::vec::IntoIter<PacketMeta>,
}

impl PacketSource for ScriptedSource {
    fn next_event(&mut self) -> anyhow::Result<SourceEvent> {
        match self.packets.next() {
            Some(pkt) => Ok(SourceEvent::Packet(pkt)),
            None => Ok(SourceEvent::Eof),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[tokio::test]
async fn engine_drains_everything_on_source_exhaustion() {
    let base = Instant::now();
    let mut packets = Vec::new();

    // One clean exchange ending in FIN
    for i in 0..3u64 {
        packets.push(tcp_packet(
            [10, 0, 0, 1],
            1000,
            [10, 0, 0, 2],
            8443,
            0x18,
            base + Duration::from_millis(i * 5),
        ));
    }
    packets.push(tcp_packet(
        [10, 0, 0, 1],
        1000,
        [10, 0, 0, 2],
        8443,
        0x11,
        base + Duration::from_millis(20),
    ));

    // One brute-force burst against SSH
    for i in 0..12u64 {
        packets.push(tcp_packet(
            [203, 0, 113, 7],
            41000 + i as u16,
            [10, 0, 0, 2],
            22,
            0x02,
            base + Duration::from_millis(i * 100),
        ));
    }

    let source = Box::new(ScriptedSource {
        packets: packets.into_iter(),
    });
    let engine = Engine::new(
        EngineConfig::default(),
        FlowConfig::default(),
        DetectorConfig::default(),
        OrchestratorConfig::default(),
        source,
        None,
        FeatureSchema::default(),
        None,
    )
    .unwrap();
    let snapshot = engine.snapshot_handle();

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    engine.run(shutdown_rx).await.unwrap();

    let snap = snapshot.latest();
    assert!(
        snap.traffic.iter().any(|r| r.dest_port == 8443),
        "FIN-completed flow missing from traffic"
    );
    assert!(
        snap.alerts
            .iter()
            .any(|a| a.record.label == "SSH-Brute-Force"),
        "brute-force alert missing"
    );
}
