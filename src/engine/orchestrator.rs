//! Classification orchestrator
//!
//! Runs once per tick: expires idle flows, drains every pending queue,
//! classifies what came out, and publishes a fresh snapshot. The tick
//! body takes `now` as a parameter so tests drive it directly; the
//! engine wraps it in a `tokio::time::interval`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::Flow;
use crate::detect::RuleAlert;
use crate::features::{self, FeatureSchema};
use crate::flow_table::{CompletedQueue, FlowTable};
use crate::model::{ModelScorer, Prediction};

use super::snapshot::{
    AlertRecord, RingBuffer, Snapshot, SnapshotPublisher, TrafficRecord,
};
use super::EventQueue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_traffic_capacity")]
    pub traffic_capacity: usize,
    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,
    /// Completed flows shorter than this are dropped unclassified
    #[serde(default = "default_min_packets")]
    pub min_flow_packets: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_ms(),
            traffic_capacity: default_traffic_capacity(),
            alert_capacity: default_alert_capacity(),
            min_flow_packets: default_min_packets(),
        }
    }
}

fn default_tick_ms() -> u64 {
    500
}

fn default_traffic_capacity() -> usize {
    200
}

fn default_alert_capacity() -> usize {
    500
}

fn default_min_packets() -> u64 {
    2
}

/// A rule trigger with the live flow it fired inside, when known
#[derive(Debug, Clone)]
pub struct RuleEvent {
    pub alert: RuleAlert,
    pub flow: Option<Flow>,
}

/// Shared engine counters
#[derive(Debug, Default)]
pub struct EngineStats {
    pub packets: AtomicU64,
    pub flows_created: AtomicU64,
    pub flows_completed: AtomicU64,
    pub flows_discarded: AtomicU64,
    pub rule_alerts: AtomicU64,
    pub model_scored: AtomicU64,
    pub scoring_failures: AtomicU64,
}

impl EngineStats {
    pub fn log_summary(&self) {
        info!(
            packets = self.packets.load(Ordering::Relaxed),
            flows_created = self.flows_created.load(Ordering::Relaxed),
            flows_completed = self.flows_completed.load(Ordering::Relaxed),
            flows_discarded = self.flows_discarded.load(Ordering::Relaxed),
            rule_alerts = self.rule_alerts.load(Ordering::Relaxed),
            model_scored = self.model_scored.load(Ordering::Relaxed),
            scoring_failures = self.scoring_failures.load(Ordering::Relaxed),
            "engine totals"
        );
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    table: Arc<FlowTable>,
    completed: Arc<CompletedQueue>,
    rule_events: Arc<EventQueue<RuleEvent>>,
    samples: Arc<EventQueue<Flow>>,
    scorer: Option<Arc<dyn ModelScorer>>,
    schema: FeatureSchema,
    publisher: SnapshotPublisher,
    stats: Arc<EngineStats>,
    traffic: RingBuffer<TrafficRecord>,
    alerts: RingBuffer<AlertRecord>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        table: Arc<FlowTable>,
        completed: Arc<CompletedQueue>,
        rule_events: Arc<EventQueue<RuleEvent>>,
        samples: Arc<EventQueue<Flow>>,
        scorer: Option<Arc<dyn ModelScorer>>,
        schema: FeatureSchema,
        publisher: SnapshotPublisher,
        stats: Arc<EngineStats>,
    ) -> Self {
        let traffic = RingBuffer::new(config.traffic_capacity);
        let alerts = RingBuffer::new(config.alert_capacity);
        Self {
            config,
            table,
            completed,
            rule_events,
            samples,
            scorer,
            schema,
            publisher,
            stats,
            traffic,
            alerts,
        }
    }

    /// One classification round. Safe to call from tests without a
    /// runtime; the engine drives it every `tick_interval_ms`.
    pub fn tick(&mut self, now: Instant) {
        let expired = self.table.sweep(now, &self.completed);
        if expired > 0 {
            debug!(expired, "idle flows expired");
        }

        while let Some(flow) = self.completed.pop() {
            self.classify_completed(flow);
        }
        while let Some(event) = self.rule_events.pop() {
            self.record_rule_event(event);
        }
        while let Some(flow) = self.samples.pop() {
            self.score_sample(flow);
        }

        self.publisher.publish(Snapshot {
            traffic: self.traffic.to_vec(),
            alerts: self.alerts.to_vec(),
        });
    }

    fn classify_completed(&mut self, flow: Flow) {
        if flow.total_packets() < self.config.min_flow_packets {
            self.stats.flows_discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.stats.flows_completed.fetch_add(1, Ordering::Relaxed);

        // A rule already fired on this flow: record it under the rule
        // verdict and skip the model. The alert itself was queued at
        // trigger time, so only the traffic record is added here.
        if let Some(kind) = flow.rule_hit {
            let record = self.record_from_flow(&flow, kind.label(), 99.0, "rule");
            self.traffic.push(record);
            return;
        }

        let prediction = self.score(&flow);
        let record = self.record_from_flow(
            &flow,
            &prediction.label,
            prediction.confidence,
            "model",
        );
        if record.is_attack {
            self.alerts.push(AlertRecord::from_traffic(record.clone()));
        }
        self.traffic.push(record);
    }

    fn record_rule_event(&mut self, event: RuleEvent) {
        self.stats.rule_alerts.fetch_add(1, Ordering::Relaxed);
        let alert = &event.alert;
        let (fwd, bwd, duration) = event
            .flow
            .as_ref()
            .map(|f| (f.fwd_packets, f.bwd_packets, round_ms(f.duration().as_secs_f64())))
            .unwrap_or((0, 0, 0.0));

        let record = TrafficRecord {
            timestamp: Utc::now(),
            label: alert.kind.label().to_string(),
            confidence: 99.0,
            is_attack: true,
            fwd_packets: fwd,
            bwd_packets: bwd,
            duration,
            dest_port: alert.dst_port,
            detection_method: "rule".to_string(),
            src_ip: Some(alert.src_ip),
            dst_ip: Some(alert.dst_ip),
        };
        info!(
            label = record.label.as_str(),
            src = %alert.src_ip,
            port = alert.dst_port,
            count = alert.count,
            "rule alert"
        );
        self.alerts.push(AlertRecord::from_traffic(record.clone()));
        self.traffic.push(record);
    }

    fn score_sample(&mut self, flow: Flow) {
        // Samples from flows with a rule verdict stay suppressed
        if flow.rule_hit.is_some() || flow.total_packets() < self.config.min_flow_packets {
            return;
        }
        let prediction = self.score(&flow);
        let record = self.record_from_flow(
            &flow,
            &prediction.label,
            prediction.confidence,
            "model",
        );
        if record.is_attack {
            self.alerts.push(AlertRecord::from_traffic(record.clone()));
        }
        self.traffic.push(record);
    }

    fn score(&self, flow: &Flow) -> Prediction {
        let scorer = match &self.scorer {
            Some(s) => s,
            None => return Prediction::benign(),
        };
        let vector = features::extract(flow, &self.schema);
        match scorer.score(&vector) {
            Ok(prediction) => {
                self.stats.model_scored.fetch_add(1, Ordering::Relaxed);
                prediction
            }
            Err(err) => {
                self.stats.scoring_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "model scoring failed, recording flow as benign");
                Prediction::benign()
            }
        }
    }

    fn record_from_flow(
        &self,
        flow: &Flow,
        label: &str,
        confidence: f64,
        method: &str,
    ) -> TrafficRecord {
        TrafficRecord {
            timestamp: Utc::now(),
            label: label.to_string(),
            confidence,
            is_attack: label != "BENIGN",
            fwd_packets: flow.fwd_packets,
            bwd_packets: flow.bwd_packets,
            duration: round_ms(flow.duration().as_secs_f64()),
            dest_port: flow.dst_port,
            detection_method: method.to_string(),
            src_ip: None,
            dst_ip: None,
        }
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config.tick_interval_ms)
    }
}

fn round_ms(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{IpProtocol, PacketMeta, TcpFlags, TcpMeta};
    use crate::detect::{RuleAlert, RuleKind};
    use crate::flow_table::FlowConfig;
    use crate::model::ModelError;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    struct FixedScorer(Prediction);

    impl ModelScorer for FixedScorer {
        fn score(&self, _features: &[f64]) -> Result<Prediction, ModelError> {
            Ok(self.0.clone())
        }
        fn input_dim(&self) -> usize {
            crate::features::FEATURE_NAMES.len()
        }
    }

    struct FailingScorer;

    impl ModelScorer for FailingScorer {
        fn score(&self, features: &[f64]) -> Result<Prediction, ModelError> {
            Err(ModelError::DimensionMismatch {
                got: features.len(),
                expected: 1,
            })
        }
        fn input_dim(&self) -> usize {
            1
        }
    }

    fn harness(scorer: Option<Arc<dyn ModelScorer>>) -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(FlowTable::new(FlowConfig::default())),
            Arc::new(CompletedQueue::new(1000)),
            Arc::new(EventQueue::new(256)),
            Arc::new(EventQueue::new(256)),
            scorer,
            FeatureSchema::default(),
            SnapshotPublisher::new(None),
            Arc::new(EngineStats::default()),
        )
    }

    fn packet(sp: u16, dp: u16, flags: u8, ts: Instant) -> PacketMeta {
        let mut pkt = PacketMeta::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
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

    fn two_packet_flow(ts: Instant) -> Flow {
        let mut flow = Flow::new(&packet(1000, 80, 0x10, ts));
        let (_, d) = crate::core::FlowKey::from_packet(&packet(
            1000,
            80,
            0x10,
            ts + Duration::from_millis(5),
        ));
        flow.update(&packet(1000, 80, 0x10, ts + Duration::from_millis(5)), d);
        flow
    }

    #[test]
    fn single_packet_flows_discarded() {
        let mut orch = harness(None);
        let now = Instant::now();
        orch.completed.push(Flow::new(&packet(1000, 80, 0x10, now)));
        orch.tick(now);

        assert_eq!(orch.stats.flows_discarded.load(Ordering::Relaxed), 1);
        assert!(orch.traffic.is_empty());
    }

    #[test]
    fn model_verdict_becomes_traffic_record() {
        let scorer = Arc::new(FixedScorer(Prediction {
            label: "BENIGN".to_string(),
            confidence: 88.0,
        }));
        let mut orch = harness(Some(scorer));
        let now = Instant::now();
        orch.completed.push(two_packet_flow(now));
        orch.tick(now);

        let snap = orch.publisher.handle().latest();
        assert_eq!(snap.traffic.len(), 1);
        assert!(snap.alerts.is_empty());
        assert_eq!(snap.traffic[0].detection_method, "model");
        assert_eq!(snap.traffic[0].fwd_packets, 2);
    }

    #[test]
    fn attack_verdict_raises_alert() {
        let scorer = Arc::new(FixedScorer(Prediction {
            label: "PortScan".to_string(),
            confidence: 96.5,
        }));
        let mut orch = harness(Some(scorer));
        let now = Instant::now();
        orch.completed.push(two_packet_flow(now));
        orch.tick(now);

        let snap = orch.publisher.handle().latest();
        assert_eq!(snap.alerts.len(), 1);
        assert!(snap.alerts[0].record.is_attack);
        assert_eq!(
            snap.alerts[0].threat_level,
            super::super::snapshot::ThreatLevel::Critical
        );
    }

    #[test]
    fn rule_hit_suppresses_model() {
        let scorer = Arc::new(FixedScorer(Prediction {
            label: "BENIGN".to_string(),
            confidence: 10.0,
        }));
        let mut orch = harness(Some(scorer));
        let now = Instant::now();
        let mut flow = two_packet_flow(now);
        flow.mark_rule_hit(RuleKind::Flood);
        orch.completed.push(flow);
        orch.tick(now);

        let snap = orch.publisher.handle().latest();
        assert_eq!(snap.traffic[0].label, "DDoS");
        assert_eq!(snap.traffic[0].confidence, 99.0);
        assert_eq!(snap.traffic[0].detection_method, "rule");
        assert_eq!(orch.stats.model_scored.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn rule_event_emits_critical_alert() {
        let mut orch = harness(None);
        let now = Instant::now();
        orch.rule_events.push(RuleEvent {
            alert: RuleAlert {
                kind: RuleKind::BruteForce,
                src_ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)),
                dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                dst_port: 22,
                count: 12,
                ts: now,
            },
            flow: Some(two_packet_flow(now)),
        });
        orch.tick(now);

        let snap = orch.publisher.handle().latest();
        assert_eq!(snap.alerts.len(), 1);
        assert_eq!(snap.alerts[0].record.label, "SSH-Brute-Force");
        assert_eq!(snap.alerts[0].record.confidence, 99.0);
        assert_eq!(snap.alerts[0].record.detection_method, "rule");
        assert_eq!(snap.alerts[0].record.src_ip.unwrap().to_string(), "203.0.113.7");
    }

    #[test]
    fn scoring_failure_records_benign() {
        let mut orch = harness(Some(Arc::new(FailingScorer)));
        let now = Instant::now();
        orch.completed.push(two_packet_flow(now));
        orch.tick(now);

        let snap = orch.publisher.handle().latest();
        assert_eq!(snap.traffic.len(), 1);
        assert_eq!(snap.traffic[0].label, "BENIGN");
        assert_eq!(snap.traffic[0].confidence, 0.0);
        assert_eq!(orch.stats.scoring_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn sampled_flow_with_rule_hit_is_skipped() {
        let scorer = Arc::new(FixedScorer(Prediction {
            label: "DDoS".to_string(),
            confidence: 97.0,
        }));
        let mut orch = harness(Some(scorer));
        let now = Instant::now();
        let mut flow = two_packet_flow(now);
        flow.mark_rule_hit(RuleKind::Flood);
        orch.samples.push(flow);
        orch.tick(now);

        assert!(orch.publisher.handle().latest().traffic.is_empty());
    }
}
