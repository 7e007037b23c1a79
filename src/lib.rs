//! flowguard: real-time network intrusion detection sensor
//!
//! Captures packets, reconstructs bidirectional flows, runs a bank of
//! rule detectors on the packet path, extracts CICIDS-style features
//! from completed flows, scores them through an optional model, and
//! publishes bounded traffic/alert snapshots.

pub mod capture;
pub mod config;
pub mod core;
pub mod detect;
pub mod engine;
pub mod features;
pub mod flow_table;
pub mod model;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

pub use config::Config;
pub use engine::{Engine, Snapshot, SnapshotHandle};
pub use model::{LinearScorer, ModelScorer, Prediction};

/// Top-level sensor: builds the engine from configuration and runs it
/// until ctrl-c or source exhaustion.
pub struct Sensor {
    config: Config,
}

impl Sensor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let schema = match &self.config.model.feature_schema {
            Some(path) => features::FeatureSchema::load(path)?,
            None => features::FeatureSchema::default(),
        };

        let scorer: Option<Arc<dyn ModelScorer>> = match &self.config.model.artifact {
            Some(path) => {
                let scorer = LinearScorer::load(path)?;
                if scorer.input_dim() != schema.len() {
                    anyhow::bail!(
                        "model expects {} features but schema has {}",
                        scorer.input_dim(),
                        schema.len()
                    );
                }
                info!(artifact = %path.display(), "model loaded");
                Some(Arc::new(scorer))
            }
            None => {
                info!("no model artifact configured, running rule detection only");
                None
            }
        };

        let source = capture::create_source(&self.config.capture)?;

        let engine = Engine::new(
            self.config.engine.clone(),
            self.config.flow.clone(),
            self.config.detectors.clone(),
            self.config.orchestrator.clone(),
            source,
            scorer,
            schema,
            self.config.general.snapshot_file.clone(),
        )
        .context("building engine")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for ctrl-c");
                return;
            }
            info!("ctrl-c received");
            let _ = shutdown_tx.send(true);
        });

        engine.run(shutdown_rx).await
    }
}
