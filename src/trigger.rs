//! Retrain trigger engine.
//!
//! Decides, per model family, whether a retraining run should start.
//! Three conditions are evaluated independently on every check: data
//! drift reported by the monitor, model decay reported by the monitor,
//! and staleness (time since last training exceeding the retrain
//! interval). All satisfied conditions are recorded; the first one, in
//! that order, names the run's trigger reason. At most one run is
//! started per check.

use crate::error::{ModelOpsError, Result};
use crate::monitor::LifecycleMonitor;
use crate::pipeline::{PipelineOrchestrator, TriggerReason};
use crate::store::ModelStore;
use crate::types::{ModelId, RunId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::TriggerConfig;

/// Outcome of one trigger check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDecision {
    pub model_id: ModelId,
    /// Whether a retraining run was started.
    pub triggered: bool,
    /// Every condition that held, in evaluation order.
    pub reasons: Vec<TriggerReason>,
    /// The spawned run, when triggered.
    pub run_id: Option<RunId>,
    pub checked_at: DateTime<Utc>,
}

/// Evaluates retrain conditions and starts pipeline runs.
pub struct RetrainTriggerEngine {
    config: TriggerConfig,
    monitor: Arc<LifecycleMonitor>,
    orchestrator: Arc<PipelineOrchestrator>,
    store: Arc<dyn ModelStore>,
    decisions: RwLock<Vec<TriggerDecision>>,
}

impl RetrainTriggerEngine {
    pub fn new(
        config: TriggerConfig,
        monitor: Arc<LifecycleMonitor>,
        orchestrator: Arc<PipelineOrchestrator>,
        store: Arc<dyn ModelStore>,
    ) -> Self {
        Self {
            config,
            monitor,
            orchestrator,
            store,
            decisions: RwLock::new(Vec::new()),
        }
    }

    /// Evaluate all retrain conditions for a model and start a pipeline
    /// run if any holds.
    ///
    /// Monitor evaluations that cannot run (insufficient data, missing
    /// baseline) count as not-triggered for that condition rather than
    /// failing the check.
    pub async fn check_and_maybe_retrain(&self, model_id: &str) -> Result<TriggerDecision> {
        let mut reasons = Vec::new();

        match self.monitor.evaluate_drift(model_id).await {
            Ok(finding) if finding.detected() => reasons.push(TriggerReason::DriftDetected),
            Ok(_) => {}
            Err(e) => debug!(model_id, error = %e, "Drift evaluation skipped"),
        }

        match self.monitor.evaluate_decay(model_id).await {
            Ok(finding) if finding.detected() => reasons.push(TriggerReason::DecayDetected),
            Ok(_) => {}
            Err(e) => debug!(model_id, error = %e, "Decay evaluation skipped"),
        }

        if self.is_stale(model_id).await? {
            reasons.push(TriggerReason::Scheduled);
        }

        let mut decision = TriggerDecision {
            model_id: model_id.to_string(),
            triggered: !reasons.is_empty(),
            reasons,
            run_id: None,
            checked_at: Utc::now(),
        };

        if decision.triggered {
            let reason = decision.reasons[0];
            let run_id = self.orchestrator.spawn(model_id, reason).await;
            info!(
                model_id,
                run_id = %run_id,
                reason = reason.as_str(),
                conditions = decision.reasons.len(),
                "Retraining triggered"
            );
            decision.run_id = Some(run_id);
        } else {
            debug!(model_id, "No retrain condition met");
        }

        self.decisions.write().await.push(decision.clone());
        Ok(decision)
    }

    /// Trigger decisions for a model, oldest first.
    pub async fn decisions_for_model(&self, model_id: &str) -> Vec<TriggerDecision> {
        self.decisions
            .read()
            .await
            .iter()
            .filter(|d| d.model_id == model_id)
            .cloned()
            .collect()
    }

    async fn is_stale(&self, model_id: &str) -> Result<bool> {
        let info = self
            .store
            .get(model_id)
            .await?
            .ok_or_else(|| ModelOpsError::NotFound(format!("Model {} not found", model_id)))?;

        let age = Utc::now() - info.trained_at;
        Ok(age > Duration::days(i64::from(self.config.retrain_interval_days)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abtest::AbTestManager;
    use crate::alerting::AlertCenter;
    use crate::backend::{DatasetHandle, TrainingBackend, TrainingOutcome};
    use crate::config::{AbTestConfig, MonitorConfig, PipelineConfig};
    use crate::registry::VersionRegistry;
    use crate::store::{InMemoryModelStore, InMemoryPredictionLog, ModelStore};
    use crate::types::{FeatureStats, ModelInfo, PredictionRecord};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubBackend;

    #[async_trait]
    impl TrainingBackend for StubBackend {
        async fn acquire_dataset(&self, model_type: &str) -> Result<DatasetHandle> {
            Ok(DatasetHandle {
                uri: format!("datasets/{}/latest", model_type),
                record_count: 1000,
                feature_names: vec!["age".into()],
            })
        }

        async fn train(
            &self,
            model_type: &str,
            _dataset: &DatasetHandle,
            _hyperparameters: Option<&HashMap<String, f64>>,
        ) -> Result<TrainingOutcome> {
            Ok(TrainingOutcome {
                artifact_location: format!("models/{}/retrained", model_type),
                metrics: HashMap::from([("accuracy".to_string(), 0.9)]),
                feature_names: vec!["age".into()],
                baseline_stats: HashMap::from([(
                    "age".to_string(),
                    FeatureStats {
                        mean: 60.0,
                        std_dev: 10.0,
                    },
                )]),
            })
        }
    }

    struct Harness {
        engine: RetrainTriggerEngine,
        monitor: Arc<LifecycleMonitor>,
        store: Arc<InMemoryModelStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryModelStore::new());
        let log = Arc::new(InMemoryPredictionLog::new(2000));
        let alerts = Arc::new(AlertCenter::default());
        let registry = Arc::new(VersionRegistry::new(store.clone()));
        let monitor = Arc::new(LifecycleMonitor::new(
            MonitorConfig::default(),
            store.clone(),
            log,
            alerts.clone(),
        ));
        let abtests = Arc::new(AbTestManager::new(
            AbTestConfig::default(),
            registry.clone(),
            alerts.clone(),
        ));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            PipelineConfig::default(),
            Arc::new(StubBackend),
            store.clone(),
            registry,
            abtests,
            monitor.clone(),
            alerts,
        ));
        let engine = RetrainTriggerEngine::new(
            TriggerConfig::default(),
            monitor.clone(),
            orchestrator,
            store.clone(),
        );
        Harness {
            engine,
            monitor,
            store,
        }
    }

    async fn seed_model(store: &InMemoryModelStore, model_id: &str, trained_days_ago: i64) {
        store
            .put(ModelInfo {
                model_id: model_id.to_string(),
                model_type: "classifier".to_string(),
                artifact_location: format!("models/{}/v1", model_id),
                metrics: HashMap::from([("accuracy".to_string(), 0.9)]),
                feature_names: vec!["age".to_string()],
                baseline_stats: HashMap::from([(
                    "age".to_string(),
                    FeatureStats {
                        mean: 60.0,
                        std_dev: 10.0,
                    },
                )]),
                is_production: true,
                trained_at: Utc::now() - Duration::days(trained_days_ago),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fresh_model_without_data_does_not_trigger() {
        let h = harness();
        seed_model(&h.store, "m1", 1).await;
        h.monitor.arm("m1").await;

        let decision = h.engine.check_and_maybe_retrain("m1").await.unwrap();
        assert!(!decision.triggered);
        assert!(decision.reasons.is_empty());
        assert!(decision.run_id.is_none());
    }

    #[tokio::test]
    async fn test_stale_model_triggers_scheduled_retrain() {
        let h = harness();
        seed_model(&h.store, "m1", 45).await;
        h.monitor.arm("m1").await;

        let decision = h.engine.check_and_maybe_retrain("m1").await.unwrap();
        assert!(decision.triggered);
        assert_eq!(decision.reasons, vec![TriggerReason::Scheduled]);
        assert!(decision.run_id.is_some());
    }

    #[tokio::test]
    async fn test_drifted_distribution_triggers_retrain() {
        let h = harness();
        seed_model(&h.store, "m1", 1).await;
        h.monitor.arm("m1").await;

        // Observed ages far from the Normal(60, 10) baseline.
        for i in 0..200 {
            h.monitor
                .record_prediction(PredictionRecord::new(
                    "m1",
                    HashMap::from([("age".to_string(), 20.0 + (i % 10) as f64)]),
                    1.0,
                ))
                .await
                .unwrap();
        }

        let decision = h.engine.check_and_maybe_retrain("m1").await.unwrap();
        assert!(decision.triggered);
        assert!(decision.reasons.contains(&TriggerReason::DriftDetected));
        assert_eq!(decision.reasons[0], TriggerReason::DriftDetected);
    }

    #[tokio::test]
    async fn test_conditions_are_recorded_independently() {
        let h = harness();
        seed_model(&h.store, "m1", 45).await;
        h.monitor.arm("m1").await;

        // Drifted features and a stale model at the same time.
        for i in 0..200 {
            h.monitor
                .record_prediction(PredictionRecord::new(
                    "m1",
                    HashMap::from([("age".to_string(), 20.0 + (i % 10) as f64)]),
                    1.0,
                ))
                .await
                .unwrap();
        }

        let decision = h.engine.check_and_maybe_retrain("m1").await.unwrap();
        assert!(decision.triggered);
        assert!(decision.reasons.contains(&TriggerReason::DriftDetected));
        assert!(decision.reasons.contains(&TriggerReason::Scheduled));
        // One run per check, named after the first condition.
        assert!(decision.run_id.is_some());
        assert_eq!(decision.reasons[0], TriggerReason::DriftDetected);
    }

    #[tokio::test]
    async fn test_unknown_model_errors() {
        let h = harness();
        let err = h.engine.check_and_maybe_retrain("ghost").await.unwrap_err();
        assert!(matches!(err, ModelOpsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_decision_history() {
        let h = harness();
        seed_model(&h.store, "m1", 1).await;
        h.monitor.arm("m1").await;

        h.engine.check_and_maybe_retrain("m1").await.unwrap();
        h.engine.check_and_maybe_retrain("m1").await.unwrap();

        let history = h.engine.decisions_for_model("m1").await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|d| !d.triggered));
    }
}
