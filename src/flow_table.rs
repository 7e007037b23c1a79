//! Flow table and completed-flow queue
//!
//! The active map is guarded by a single mutex: key lookup, insert, and
//! the move-to-completed all happen inside one short critical section so
//! the ingest path and the periodic sweep never observe a half-updated
//! flow. A flow lives in exactly one place at a time; completion moves it
//! out of the map and into the bounded queue by value.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{CompletionReason, Flow, FlowKey, PacketMeta};
use crate::detect::RuleKind;

/// Flow lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Seconds without a packet before a flow is swept out
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: f64,
    /// Completed-flow queue capacity; oldest entries are evicted when full
    #[serde(default = "default_completed_capacity")]
    pub completed_capacity: usize,
    /// Active-map cap; the stalest flow is force-completed when exceeded
    #[serde(default = "default_max_active")]
    pub max_active: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            completed_capacity: default_completed_capacity(),
            max_active: default_max_active(),
        }
    }
}

fn default_idle_timeout() -> f64 {
    2.0
}

fn default_completed_capacity() -> usize {
    1000
}

fn default_max_active() -> usize {
    100_000
}

impl FlowConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.idle_timeout_secs)
    }
}

/// What `ingest` did with the packet's flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First packet of a new flow
    Created,
    /// Existing flow updated
    Updated,
    /// FIN/RST moved the flow to the completed queue
    Completed,
}

/// Bounded FIFO of completed flows; push evicts the oldest when full
#[derive(Debug)]
pub struct CompletedQueue {
    inner: Mutex<VecDeque<Flow>>,
    capacity: usize,
}

impl CompletedQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Push with eviction. Dropping the oldest completed flow is the
    /// backpressure policy, not an error.
    pub fn push(&self, flow: Flow) {
        let mut q = self.inner.lock();
        if q.len() >= self.capacity {
            q.pop_front();
            debug!("completed queue full, evicting oldest flow");
        }
        q.push_back(flow);
    }

    pub fn pop(&self) -> Option<Flow> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Active flow map with timeout-driven completion
pub struct FlowTable {
    active: Mutex<HashMap<FlowKey, Flow>>,
    config: FlowConfig,
}

impl FlowTable {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            active: Mutex::new(HashMap::with_capacity(1024)),
            config,
        }
    }

    /// Feed one packet through the table. Creates the flow on first
    /// sight, appends per-direction statistics otherwise, and moves the
    /// flow to `completed` synchronously when the packet carries FIN or
    /// RST.
    ///
    /// A rule verdict for this packet is stamped onto the flow here, in
    /// the same critical section, so it lands before a terminal packet
    /// moves the flow out of the map. When a hit is stamped the updated
    /// flow is also returned by value for the alert record.
    pub fn ingest(
        &self,
        pkt: &PacketMeta,
        rule_hit: Option<RuleKind>,
        completed: &CompletedQueue,
    ) -> (IngestOutcome, Option<Flow>) {
        let (key, direction) = FlowKey::from_packet(pkt);
        let terminal = pkt.tcp_flags().map(|f| f.is_terminal()).unwrap_or(false);

        let mut active = self.active.lock();

        let outcome = match active.get_mut(&key) {
            Some(flow) => {
                flow.update(pkt, direction);
                IngestOutcome::Updated
            }
            None => {
                if active.len() >= self.config.max_active {
                    Self::evict_stalest(&mut active, completed);
                }
                active.insert(key, Flow::new(pkt));
                IngestOutcome::Created
            }
        };

        let mut hit_flow = None;
        if let Some(kind) = rule_hit {
            if let Some(flow) = active.get_mut(&key) {
                flow.mark_rule_hit(kind);
                hit_flow = Some(flow.clone());
            }
        }

        if terminal {
            if let Some(mut flow) = active.remove(&key) {
                flow.completed_by = Some(CompletionReason::FinRst);
                drop(active);
                completed.push(flow);
                return (IngestOutcome::Completed, hit_flow);
            }
        }

        (outcome, hit_flow)
    }

    /// Clone the live accumulator for a packet's flow (packet-sampled
    /// model scoring). The flow itself stays active.
    pub fn snapshot_flow(&self, pkt: &PacketMeta) -> Option<Flow> {
        let (key, _) = FlowKey::from_packet(pkt);
        self.active.lock().get(&key).cloned()
    }

    /// Move every flow idle longer than the timeout into the completed
    /// queue. Returns how many were swept.
    pub fn sweep(&self, now: Instant, completed: &CompletedQueue) -> usize {
        let timeout = self.config.idle_timeout();
        let mut active = self.active.lock();

        let expired: Vec<FlowKey> = active
            .iter()
            .filter(|(_, flow)| flow.idle_for(now) > timeout)
            .map(|(key, _)| *key)
            .collect();

        let count = expired.len();
        let mut swept = Vec::with_capacity(count);
        for key in expired {
            if let Some(mut flow) = active.remove(&key) {
                flow.completed_by = Some(CompletionReason::IdleTimeout);
                swept.push(flow);
            }
        }
        drop(active);

        for flow in swept {
            completed.push(flow);
        }
        count
    }

    /// Force every remaining active flow into the completed queue
    /// (graceful shutdown).
    pub fn flush_all(&self, completed: &CompletedQueue) -> usize {
        let mut active = self.active.lock();
        let drained: Vec<Flow> = active
            .drain()
            .map(|(_, mut flow)| {
                flow.completed_by = Some(CompletionReason::Shutdown);
                flow
            })
            .collect();
        drop(active);

        let count = drained.len();
        for flow in drained {
            completed.push(flow);
        }
        count
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    fn evict_stalest(active: &mut HashMap<FlowKey, Flow>, completed: &CompletedQueue) {
        if let Some(key) = active
            .iter()
            .min_by_key(|(_, flow)| flow.end)
            .map(|(key, _)| *key)
        {
            if let Some(mut flow) = active.remove(&key) {
                flow.completed_by = Some(CompletionReason::IdleTimeout);
                completed.push(flow);
            }
        }
    }
}
