//! Fixed-schema flow feature extraction
//!
//! Produces the CICIDS2017-style statistical vector a trained model
//! expects. The output order follows a schema of feature names so the
//! vector lines up with the scaler and weight matrix it was trained
//! against; names the extractor does not know resolve to 0.0.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::Flow;

/// Canonical feature names in extraction order
pub const FEATURE_NAMES: &[&str] = &[
    "Destination Port",
    "Flow Duration",
    "Total Fwd Packets",
    "Total Backward Packets",
    "Total Length of Fwd Packets",
    "Total Length of Bwd Packets",
    "Fwd Packet Length Max",
    "Fwd Packet Length Min",
    "Fwd Packet Length Mean",
    "Fwd Packet Length Std",
    "Bwd Packet Length Max",
    "Bwd Packet Length Min",
    "Bwd Packet Length Mean",
    "Bwd Packet Length Std",
    "Flow Bytes/s",
    "Flow Packets/s",
    "Flow IAT Mean",
    "Flow IAT Std",
    "Flow IAT Max",
    "Flow IAT Min",
    "Fwd IAT Total",
    "Fwd IAT Mean",
    "Fwd IAT Std",
    "Fwd IAT Max",
    "Fwd IAT Min",
    "Bwd IAT Total",
    "Bwd IAT Mean",
    "Bwd IAT Std",
    "Bwd IAT Max",
    "Bwd IAT Min",
    "Fwd SYN Flag Count",
    "Fwd PSH Flag Count",
    "Fwd ACK Flag Count",
    "Fwd URG Flag Count",
    "Fwd FIN Flag Count",
    "Bwd PSH Flag Count",
    "Bwd ACK Flag Count",
    "Bwd URG Flag Count",
    "Bwd FIN Flag Count",
    "Bwd SYN Flag Count",
    "Bwd RST Flag Count",
    "Bwd ECE Flag Count",
    "Length Flag Count",
    "Packet Length Max",
    "Packet Length Min",
    "Packet Length Mean",
    "Packet Length Std",
    "Packet Length Var",
    "ACK Flag Count",
    "URG Flag Count",
    "CWE Flag Count",
    "ECE Flag Count",
    "Down/Up Ratio",
    "Fwd Bytes/Bulk Avg",
    "Fwd Packets/Bulk Avg",
    "Fwd Bulk Rate Avg",
    "Bwd Bytes/Bulk Avg",
    "Bwd Packets/Bulk Avg",
    "Bwd Bulk Rate Avg",
    "Subflow Fwd Packets",
    "Subflow Fwd Bytes",
    "Subflow Bwd Packets",
    "Subflow Bwd Bytes",
    "Init_Win_bytes_fwd",
    "Init_Win_bytes_bwd",
    "act_data_fwd_len",
    "min_seg_size_fwd",
    "Inbound",
];

/// Ordered list of feature names the model was trained against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub names: Vec<String>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self {
            names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FeatureSchema {
    /// Load a JSON array of feature names
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading feature schema {}", path.display()))?;
        let names: Vec<String> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing feature schema {}", path.display()))?;
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        0.0
    } else {
        vals.iter().sum::<f64>() / vals.len() as f64
    }
}

fn variance(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return 0.0;
    }
    let m = mean(vals);
    vals.iter().map(|v| (v - m).powi(2)).sum::<f64>() / vals.len() as f64
}

fn std_dev(vals: &[f64]) -> f64 {
    variance(vals).sqrt()
}

fn max_of(vals: &[f64]) -> f64 {
    vals.iter().copied().fold(f64::NEG_INFINITY, f64::max).max(0.0)
}

fn min_of(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        0.0
    } else {
        vals.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

/// Per-direction minimum with the 9999 sentinel for an empty side
fn min_or_sentinel(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        9999.0
    } else {
        vals.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

fn secs(iats: &[Duration]) -> Vec<f64> {
    iats.iter().map(Duration::as_secs_f64).collect()
}

/// Compute the full named feature map for one flow.
///
/// Pure with respect to the flow: reads every field, mutates nothing.
pub fn compute(flow: &Flow) -> Vec<(&'static str, f64)> {
    let dur = flow.duration().as_secs_f64();
    let tf = flow.fwd_packets as f64;
    let tb = flow.bwd_packets as f64;
    let tp = tf + tb;

    let fwd_lens: Vec<f64> = flow.fwd_lens.iter().map(|&l| l as f64).collect();
    let bwd_lens: Vec<f64> = flow.bwd_lens.iter().map(|&l| l as f64).collect();
    let all_lens: Vec<f64> = fwd_lens.iter().chain(bwd_lens.iter()).copied().collect();

    let fwd_iat = secs(&flow.fwd_iats);
    let bwd_iat = secs(&flow.bwd_iats);
    let all_iat: Vec<f64> = fwd_iat.iter().chain(bwd_iat.iter()).copied().collect();

    let fwd_wins: Vec<f64> = flow.fwd_windows.iter().map(|&w| w as f64).collect();
    let bwd_wins: Vec<f64> = flow.bwd_windows.iter().map(|&w| w as f64).collect();
    let fwd_hdrs: Vec<f64> = flow.fwd_headers.iter().map(|&h| h as f64).collect();

    let total_bytes = (flow.fwd_bytes + flow.bwd_bytes) as f64;
    // Zero-duration flows report raw totals instead of a rate
    let bytes_per_sec = if dur > 0.0 { total_bytes / dur } else { total_bytes };
    let pkts_per_sec = if dur > 0.0 { tp / dur } else { tp };

    vec![
        ("Destination Port", f64::from(flow.dst_port)),
        ("Flow Duration", dur),
        ("Total Fwd Packets", tf),
        ("Total Backward Packets", tb),
        ("Total Length of Fwd Packets", flow.fwd_bytes as f64),
        ("Total Length of Bwd Packets", flow.bwd_bytes as f64),
        ("Fwd Packet Length Max", max_of(&fwd_lens)),
        ("Fwd Packet Length Min", min_of(&fwd_lens)),
        ("Fwd Packet Length Mean", mean(&fwd_lens)),
        ("Fwd Packet Length Std", std_dev(&fwd_lens)),
        ("Bwd Packet Length Max", max_of(&bwd_lens)),
        ("Bwd Packet Length Min", min_of(&bwd_lens)),
        ("Bwd Packet Length Mean", mean(&bwd_lens)),
        ("Bwd Packet Length Std", std_dev(&bwd_lens)),
        ("Flow Bytes/s", bytes_per_sec),
        ("Flow Packets/s", pkts_per_sec),
        ("Flow IAT Mean", mean(&all_iat)),
        ("Flow IAT Std", std_dev(&all_iat)),
        ("Flow IAT Max", max_of(&all_iat)),
        ("Flow IAT Min", min_of(&all_iat)),
        ("Fwd IAT Total", fwd_iat.iter().sum()),
        ("Fwd IAT Mean", mean(&fwd_iat)),
        ("Fwd IAT Std", std_dev(&fwd_iat)),
        ("Fwd IAT Max", max_of(&fwd_iat)),
        ("Fwd IAT Min", min_of(&fwd_iat)),
        ("Bwd IAT Total", bwd_iat.iter().sum()),
        ("Bwd IAT Mean", mean(&bwd_iat)),
        ("Bwd IAT Std", std_dev(&bwd_iat)),
        ("Bwd IAT Max", max_of(&bwd_iat)),
        ("Bwd IAT Min", min_of(&bwd_iat)),
        ("Fwd SYN Flag Count", f64::from(flow.syn_count)),
        ("Fwd PSH Flag Count", f64::from(flow.psh_count)),
        ("Fwd ACK Flag Count", f64::from(flow.ack_count)),
        ("Fwd URG Flag Count", f64::from(flow.urg_count)),
        ("Fwd FIN Flag Count", f64::from(flow.fin_count)),
        ("Bwd PSH Flag Count", 0.0),
        ("Bwd ACK Flag Count", 0.0),
        ("Bwd URG Flag Count", 0.0),
        ("Bwd FIN Flag Count", 0.0),
        ("Bwd SYN Flag Count", 0.0),
        ("Bwd RST Flag Count", f64::from(flow.rst_count)),
        ("Bwd ECE Flag Count", f64::from(flow.ece_count)),
        ("Length Flag Count", 0.0),
        ("Packet Length Max", max_of(&fwd_lens).max(max_of(&bwd_lens))),
        (
            "Packet Length Min",
            min_or_sentinel(&fwd_lens).min(min_or_sentinel(&bwd_lens)),
        ),
        ("Packet Length Mean", mean(&all_lens)),
        ("Packet Length Std", std_dev(&all_lens)),
        ("Packet Length Var", variance(&all_lens)),
        ("ACK Flag Count", f64::from(flow.ack_count)),
        ("URG Flag Count", f64::from(flow.urg_count)),
        ("CWE Flag Count", f64::from(flow.cwr_count)),
        ("ECE Flag Count", f64::from(flow.ece_count)),
        ("Down/Up Ratio", if tf > 0.0 { tb / tf } else { 0.0 }),
        // Bulk transfer metrics are not tracked; trained models expect
        // the columns, so they stay as constant zeros.
        ("Fwd Bytes/Bulk Avg", 0.0),
        ("Fwd Packets/Bulk Avg", 0.0),
        ("Fwd Bulk Rate Avg", 0.0),
        ("Bwd Bytes/Bulk Avg", 0.0),
        ("Bwd Packets/Bulk Avg", 0.0),
        ("Bwd Bulk Rate Avg", 0.0),
        ("Subflow Fwd Packets", tf),
        ("Subflow Fwd Bytes", flow.fwd_bytes as f64),
        ("Subflow Bwd Packets", tb),
        ("Subflow Bwd Bytes", flow.bwd_bytes as f64),
        ("Init_Win_bytes_fwd", mean(&fwd_wins)),
        ("Init_Win_bytes_bwd", mean(&bwd_wins)),
        (
            "act_data_fwd_len",
            (flow.fwd_bytes as f64 - mean(&fwd_hdrs) * tf).max(0.0),
        ),
        ("min_seg_size_fwd", min_of(&fwd_hdrs)),
        ("Inbound", 0.0),
    ]
}

/// Extract the feature vector in schema order.
///
/// Unknown names resolve to 0.0 and non-finite values are clamped to
/// 0.0 so a degenerate flow can never poison the scaler.
pub fn extract(flow: &Flow, schema: &FeatureSchema) -> Vec<f64> {
    let named: HashMap<&str, f64> = compute(flow).into_iter().collect();
    schema
        .names
        .iter()
        .map(|name| {
            let v = named.get(name.as_str()).copied().unwrap_or(0.0);
            if v.is_finite() { v } else { 0.0 }
        })
        .collect()
}
