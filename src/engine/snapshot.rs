//! Published classification state
//!
//! The orchestrator appends traffic and alert records into bounded ring
//! buffers and publishes a consistent copy each tick: an in-memory
//! snapshot behind an `RwLock` swap, plus an optional JSON file written
//! tmp-then-rename so readers never observe a partial document.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Severity bucket derived from confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl ThreatLevel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 95.0 {
            ThreatLevel::Critical
        } else if confidence >= 85.0 {
            ThreatLevel::High
        } else if confidence >= 75.0 {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreatLevel::Critical => write!(f, "CRITICAL"),
            ThreatLevel::High => write!(f, "HIGH"),
            ThreatLevel::Medium => write!(f, "MEDIUM"),
            ThreatLevel::Low => write!(f, "LOW"),
        }
    }
}

/// One classified flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub confidence: f64,
    pub is_attack: bool,
    pub fwd_packets: u64,
    pub bwd_packets: u64,
    /// Seconds, rounded to milliseconds
    pub duration: f64,
    pub dest_port: u16,
    /// "model" or "rule"
    pub detection_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_ip: Option<IpAddr>,
}

/// An attack record with identity and severity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub threat_level: ThreatLevel,
    #[serde(flatten)]
    pub record: TrafficRecord,
}

impl AlertRecord {
    pub fn from_traffic(record: TrafficRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            threat_level: ThreatLevel::from_confidence(record.confidence),
            record,
        }
    }
}

/// Fixed-capacity buffer that evicts its oldest entry when full
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.buf.len() >= self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Oldest-first copy of the contents
    pub fn to_vec(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }
}

/// Consistent point-in-time view of both buffers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub traffic: Vec<TrafficRecord>,
    pub alerts: Vec<AlertRecord>,
}

/// Swaps the shared snapshot and mirrors it to an optional JSON file
pub struct SnapshotPublisher {
    current: Arc<RwLock<Snapshot>>,
    file: Option<PathBuf>,
}

impl SnapshotPublisher {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            current: Arc::new(RwLock::new(Snapshot::default())),
            file,
        }
    }

    /// Handle readers use to clone the latest snapshot
    pub fn handle(&self) -> SnapshotHandle {
        SnapshotHandle {
            current: Arc::clone(&self.current),
        }
    }

    /// Swap in a new snapshot. The file mirror is best-effort; a write
    /// failure leaves the in-memory state authoritative and the next
    /// tick retries.
    pub fn publish(&self, snapshot: Snapshot) {
        if let Some(path) = &self.file {
            if let Err(err) = write_atomic(path, &snapshot) {
                warn!(path = %path.display(), error = %err, "snapshot file write failed");
            }
        }
        *self.current.write() = snapshot;
    }
}

/// Read-side access to the published snapshot
#[derive(Clone)]
pub struct SnapshotHandle {
    current: Arc<RwLock<Snapshot>>,
}

impl SnapshotHandle {
    pub fn latest(&self) -> Snapshot {
        self.current.read().clone()
    }
}

fn write_atomic(path: &std::path::Path, snapshot: &Snapshot) -> Result<()> {
    let json = serde_json::to_string(snapshot).context("serializing snapshot")?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming over {}", path.display()))?;
    Ok(())
}
