//! ModelOps - a model lifecycle orchestration core.
//!
//! ModelOps keeps deployed prediction models healthy without a human in
//! the loop: it watches production traffic for data drift and accuracy
//! decay, retrains through a staged pipeline, proves candidates against
//! the incumbent with sticky A/B experiments, and records every version
//! with one-step rollback.
//!
//! # Features
//!
//! - **Pipeline Orchestrator**: Eight ordered stages from data collection
//!   to armed monitoring, with per-stage timeouts and audit trails.
//! - **Drift & Decay Monitor**: Kolmogorov-Smirnov drift detection and
//!   accuracy/F1 decay tracking against training baselines.
//! - **A/B Test Manager**: Sticky traffic splitting with chi-square
//!   significance verdicts.
//! - **Version Registry**: Semantic versioning, promotion with at most
//!   one production version per family, and rollback.
//! - **Retrain Triggers**: Drift, decay, and staleness conditions driving
//!   automatic retraining via a background scheduler.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         ModelOps                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scheduler Loop: Check Ticks | Full Sweeps | Shutdown       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Trigger Engine: Drift | Decay | Staleness                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline: Collect | Validate | Train | Gate | Deploy       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serving State: Version Registry | A/B Tests | Monitor      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Seams: Training Backend | Model Store | Prediction Log     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use modelops::config::ModelOpsConfig;
//! use modelops::LifecycleCore;
//! use std::sync::Arc;
//! # use modelops::backend::{DatasetHandle, TrainingBackend, TrainingOutcome};
//! # use std::collections::HashMap;
//! # struct MyBackend;
//! # #[async_trait::async_trait]
//! # impl TrainingBackend for MyBackend {
//! #     async fn acquire_dataset(&self, _: &str) -> modelops::Result<DatasetHandle> { unimplemented!() }
//! #     async fn train(&self, _: &str, _: &DatasetHandle, _: Option<&HashMap<String, f64>>) -> modelops::Result<TrainingOutcome> { unimplemented!() }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> modelops::Result<()> {
//!     let config = ModelOpsConfig::default();
//!     let core = LifecycleCore::in_memory(config, Arc::new(MyBackend))?;
//!
//!     // Retrain a model family on demand...
//!     let run_id = core
//!         .orchestrator
//!         .spawn("churn-predictor", modelops::pipeline::TriggerReason::Manual)
//!         .await;
//!     println!("started run {}", run_id);
//!
//!     // ...or let the background loop manage the fleet.
//!     let handle = core.start();
//!     core.shutdown();
//!     let _ = handle.await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod abtest;
pub mod alerting;
pub mod backend;
pub mod monitor;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod trigger;

// Re-exports
pub use error::{ModelOpsError, Result};
pub use types::*;

use abtest::AbTestManager;
use alerting::AlertCenter;
use backend::TrainingBackend;
use config::ModelOpsConfig;
use monitor::LifecycleMonitor;
use pipeline::PipelineOrchestrator;
use registry::VersionRegistry;
use scheduler::LifecycleScheduler;
use std::sync::Arc;
use store::{InMemoryModelStore, InMemoryPredictionLog, ModelStore, PredictionLog};
use tokio::sync::broadcast;
use tracing::info;
use trigger::RetrainTriggerEngine;

/// Fully wired lifecycle core.
///
/// Owns every component and the shutdown channel for the background
/// scheduler. Components are individually reachable for embedding in a
/// larger service.
pub struct LifecycleCore {
    pub store: Arc<dyn ModelStore>,
    pub log: Arc<dyn PredictionLog>,
    pub alerts: Arc<AlertCenter>,
    pub registry: Arc<VersionRegistry>,
    pub monitor: Arc<LifecycleMonitor>,
    pub abtests: Arc<AbTestManager>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub engine: Arc<RetrainTriggerEngine>,
    pub scheduler: Arc<LifecycleScheduler>,
    shutdown: broadcast::Sender<()>,
}

impl std::fmt::Debug for LifecycleCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCore").finish_non_exhaustive()
    }
}

impl LifecycleCore {
    /// Wire the core against caller-provided store and log backends.
    pub fn new(
        config: ModelOpsConfig,
        backend: Arc<dyn TrainingBackend>,
        store: Arc<dyn ModelStore>,
        log: Arc<dyn PredictionLog>,
    ) -> Result<Self> {
        config.validate()?;

        let alerts = Arc::new(AlertCenter::default());
        let registry = Arc::new(VersionRegistry::new(store.clone()));
        let monitor = Arc::new(LifecycleMonitor::new(
            config.monitor.clone(),
            store.clone(),
            log.clone(),
            alerts.clone(),
        ));
        let abtests = Arc::new(AbTestManager::new(
            config.abtest.clone(),
            registry.clone(),
            alerts.clone(),
        ));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            config.pipeline.clone(),
            backend,
            store.clone(),
            registry.clone(),
            abtests.clone(),
            monitor.clone(),
            alerts.clone(),
        ));
        let engine = Arc::new(RetrainTriggerEngine::new(
            config.trigger.clone(),
            monitor.clone(),
            orchestrator.clone(),
            store.clone(),
        ));
        let scheduler = Arc::new(LifecycleScheduler::new(
            config.scheduler.clone(),
            monitor.clone(),
            engine.clone(),
        ));
        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            store,
            log,
            alerts,
            registry,
            monitor,
            abtests,
            orchestrator,
            engine,
            scheduler,
            shutdown,
        })
    }

    /// Wire the core with the bundled in-memory store and log.
    pub fn in_memory(config: ModelOpsConfig, backend: Arc<dyn TrainingBackend>) -> Result<Self> {
        let capacity = config.monitor.cache_capacity * 2;
        Self::new(
            config,
            backend,
            Arc::new(InMemoryModelStore::new()),
            Arc::new(InMemoryPredictionLog::new(capacity)),
        )
    }

    /// Start the background scheduler loop.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        info!("Starting lifecycle core");
        self.scheduler.start(self.shutdown.subscribe())
    }

    /// Signal the background loop to stop. In-flight pipeline runs keep
    /// running to completion.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}
