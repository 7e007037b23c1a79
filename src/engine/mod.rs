//! Engine wiring
//!
//! Three execution contexts: a capture thread feeding parsed packets
//! over a bounded channel, an ingest thread running the flow table and
//! rule detectors, and a tokio task driving the classification tick.
//! The packet path never blocks on classification; everything crossing
//! between them goes through bounded evict-oldest queues.

pub mod orchestrator;
pub mod snapshot;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::capture::{PacketSource, SourceEvent};
use crate::core::PacketMeta;
use crate::detect::{DetectorConfig, RuleDetectors};
use crate::features::FeatureSchema;
use crate::flow_table::{CompletedQueue, FlowConfig, FlowTable, IngestOutcome};
use crate::model::ModelScorer;

pub use orchestrator::{EngineStats, Orchestrator, OrchestratorConfig, RuleEvent};
pub use snapshot::{
    AlertRecord, RingBuffer, Snapshot, SnapshotHandle, SnapshotPublisher, ThreatLevel,
    TrafficRecord,
};

/// Bounded multi-producer queue that drops its oldest entry when full
pub struct EventQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> EventQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, item: T) {
        let mut q = self.inner.lock();
        if q.len() >= self.capacity && q.pop_front().is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        q.push_back(item);
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Packet channel capacity between capture and ingest
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Rule-alert queue capacity
    #[serde(default = "default_rule_queue")]
    pub rule_queue_capacity: usize,
    /// Sampled-flow queue capacity
    #[serde(default = "default_sample_queue")]
    pub sample_queue_capacity: usize,
    /// Score the live flow of every Nth packet; 0 disables sampling
    #[serde(default = "default_sample_every")]
    pub sample_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            rule_queue_capacity: default_rule_queue(),
            sample_queue_capacity: default_sample_queue(),
            sample_every: default_sample_every(),
        }
    }
}

fn default_channel_capacity() -> usize {
    4096
}

fn default_rule_queue() -> usize {
    512
}

fn default_sample_queue() -> usize {
    256
}

fn default_sample_every() -> u64 {
    64
}

pub struct Engine {
    config: EngineConfig,
    source: Box<dyn PacketSource>,
    table: Arc<FlowTable>,
    completed: Arc<CompletedQueue>,
    detectors: RuleDetectors,
    rule_events: Arc<EventQueue<RuleEvent>>,
    samples: Arc<EventQueue<crate::core::Flow>>,
    stats: Arc<EngineStats>,
    orchestrator: Orchestrator,
    snapshot: SnapshotHandle,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        flow_config: FlowConfig,
        detector_config: DetectorConfig,
        orchestrator_config: OrchestratorConfig,
        source: Box<dyn PacketSource>,
        scorer: Option<Arc<dyn ModelScorer>>,
        schema: FeatureSchema,
        snapshot_path: Option<std::path::PathBuf>,
    ) -> Result<Self> {
        let completed = Arc::new(CompletedQueue::new(flow_config.completed_capacity));
        let table = Arc::new(FlowTable::new(flow_config));
        let detectors = RuleDetectors::new(detector_config).context("building detectors")?;
        let rule_events = Arc::new(EventQueue::new(config.rule_queue_capacity));
        let samples = Arc::new(EventQueue::new(config.sample_queue_capacity));
        let stats = Arc::new(EngineStats::default());
        let publisher = SnapshotPublisher::new(snapshot_path);
        let snapshot = publisher.handle();

        let orchestrator = Orchestrator::new(
            orchestrator_config,
            Arc::clone(&table),
            Arc::clone(&completed),
            Arc::clone(&rule_events),
            Arc::clone(&samples),
            scorer,
            schema,
            publisher,
            Arc::clone(&stats),
        );

        Ok(Self {
            config,
            source,
            table,
            completed,
            detectors,
            rule_events,
            samples,
            stats,
            orchestrator,
            snapshot,
        })
    }

    /// Read-side handle; valid for the engine's lifetime
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    /// Run until the shutdown signal fires or the packet source is
    /// exhausted (file replay). Flushes every active flow and publishes
    /// one final snapshot before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(source = self.source.name(), "engine starting");

        let running = Arc::new(AtomicBool::new(true));
        let (pkt_tx, pkt_rx) = crossbeam_channel::bounded(self.config.channel_capacity);
        let (done_tx, mut done_rx) = watch::channel(false);

        let capture_handle = {
            let running = Arc::clone(&running);
            let source = self.source;
            std::thread::Builder::new()
                .name("flowguard-capture".to_string())
                .spawn(move || capture_loop(source, pkt_tx, running))
                .context("spawning capture thread")?
        };

        let ingest_handle = {
            let running = Arc::clone(&running);
            let ctx = IngestContext {
                table: Arc::clone(&self.table),
                completed: Arc::clone(&self.completed),
                detectors: self.detectors,
                rule_events: Arc::clone(&self.rule_events),
                samples: Arc::clone(&self.samples),
                stats: Arc::clone(&self.stats),
                sample_every: self.config.sample_every,
            };
            std::thread::Builder::new()
                .name("flowguard-ingest".to_string())
                .spawn(move || {
                    ingest_loop(ctx, pkt_rx, running);
                    let _ = done_tx.send(true);
                })
                .context("spawning ingest thread")?
        };

        let mut interval = tokio::time::interval(self.orchestrator.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.orchestrator.tick(Instant::now());
                }
                _ = shutdown.changed() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = done_rx.changed() => {
                    info!("packet source exhausted");
                    break;
                }
            }
        }

        running.store(false, Ordering::Relaxed);
        if capture_handle.join().is_err() {
            warn!("capture thread panicked");
        }
        if ingest_handle.join().is_err() {
            warn!("ingest thread panicked");
        }

        let flushed = self.table.flush_all(&self.completed);
        debug!(flushed, "active flows flushed");
        self.orchestrator.tick(Instant::now());
        self.stats.log_summary();
        Ok(())
    }
}

struct IngestContext {
    table: Arc<FlowTable>,
    completed: Arc<CompletedQueue>,
    detectors: RuleDetectors,
    rule_events: Arc<EventQueue<RuleEvent>>,
    samples: Arc<EventQueue<crate::core::Flow>>,
    stats: Arc<EngineStats>,
    sample_every: u64,
}

fn capture_loop(
    mut source: Box<dyn PacketSource>,
    tx: Sender<PacketMeta>,
    running: Arc<AtomicBool>,
) {
    let mut dropped: u64 = 0;
    while running.load(Ordering::Relaxed) {
        match source.next_event() {
            Ok(SourceEvent::Packet(pkt)) => match tx.try_send(pkt) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    if dropped % 1000 == 1 {
                        warn!(dropped, "packet channel full, dropping");
                    }
                }
                Err(TrySendError::Disconnected(_)) => break,
            },
            Ok(SourceEvent::Timeout) => continue,
            Ok(SourceEvent::Eof) => {
                info!("packet source reached end of stream");
                break;
            }
            Err(err) => {
                warn!(error = %err, "capture error, skipping");
            }
        }
    }
}

fn ingest_loop(mut ctx: IngestContext, rx: Receiver<PacketMeta>, running: Arc<AtomicBool>) {
    let mut seen: u64 = 0;
    loop {
        let pkt = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(pkt) => pkt,
            Err(RecvTimeoutError::Timeout) => {
                if running.load(Ordering::Relaxed) {
                    continue;
                }
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        seen += 1;
        ctx.stats.packets.fetch_add(1, Ordering::Relaxed);

        // Detectors run first so a verdict on this packet reaches the
        // flow even when the same packet is the FIN/RST that completes it
        let alert = ctx.detectors.on_packet(&pkt);
        let (outcome, hit_flow) =
            ctx.table
                .ingest(&pkt, alert.as_ref().map(|a| a.kind), &ctx.completed);
        if outcome == IngestOutcome::Created {
            ctx.stats.flows_created.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(alert) = alert {
            ctx.rule_events.push(RuleEvent { alert, flow: hit_flow });
        } else if ctx.sample_every > 0 && seen % ctx.sample_every == 0 {
            if let Some(flow) = ctx.table.snapshot_flow(&pkt) {
                if flow.rule_hit.is_none() {
                    ctx.samples.push(flow);
                }
            }
        }
    }
}
