//! Pipeline orchestrator: candidate-to-production as an ordered state
//! machine.
//!
//! One run executes the stages strictly in order: collect data, validate
//! data, train, validate the resulting metrics, functional tests,
//! experiment setup, deploy, arm monitoring. Any required-stage failure
//! short-circuits the remainder, marks the run *failed*, and leaves prior
//! production state untouched; there is no partial promotion. Stage
//! results are append-only and retained for audit.
//!
//! A run may be cancelled cooperatively between stages, never mid-stage;
//! a cancelled run leaves its candidate version in *development*.
//! External calls (training backend) run under a per-stage timeout that
//! surfaces as stage failure, preserving the rest of the audit trail.

use crate::abtest::AbTestManager;
use crate::alerting::{AlertCategory, AlertCenter, AlertSeverity};
use crate::backend::{DatasetHandle, TrainingBackend, TrainingOutcome};
use crate::config::PipelineConfig;
use crate::error::{ModelOpsError, Result};
use crate::monitor::LifecycleMonitor;
use crate::registry::{NewVersion, VersionRegistry};
use crate::store::ModelStore;
use crate::types::{ModelId, ModelInfo, RunId, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Why a pipeline run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerReason {
    /// Retrain interval elapsed.
    Scheduled,
    /// The monitor reported data drift.
    DriftDetected,
    /// The monitor reported model decay.
    DecayDetected,
    /// Direct API call.
    Manual,
}

impl TriggerReason {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Scheduled => "scheduled",
            TriggerReason::DriftDetected => "drift_detected",
            TriggerReason::DecayDetected => "decay_detected",
            TriggerReason::Manual => "manual",
        }
    }
}

/// Overall status of a pipeline run. Terminal once it leaves *running*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the run can still make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// The ordered stages of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    CollectData,
    ValidateData,
    Train,
    ValidateModel,
    FunctionalTest,
    ExperimentSetup,
    Deploy,
    ArmMonitoring,
}

impl PipelineStage {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::CollectData => "collect_data",
            PipelineStage::ValidateData => "validate_data",
            PipelineStage::Train => "train",
            PipelineStage::ValidateModel => "validate_model",
            PipelineStage::FunctionalTest => "functional_test",
            PipelineStage::ExperimentSetup => "experiment_setup",
            PipelineStage::Deploy => "deploy",
            PipelineStage::ArmMonitoring => "arm_monitoring",
        }
    }
}

/// Outcome of one stage, appended to the run in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: PipelineStage,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    /// Human-readable detail payload.
    pub detail: String,
}

/// One execution of the orchestrator. Retained indefinitely for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: RunId,
    /// Target model family.
    pub model_id: ModelId,
    pub trigger: TriggerReason,
    pub status: RunStatus,
    /// Ordered, append-only stage results.
    pub stages: Vec<StageResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Candidate version created by this run, once training succeeded.
    pub version_id: Option<VersionId>,
    /// Terminal error, verbatim from the failing stage.
    pub error: Option<String>,
}

/// Runs the end-to-end retraining sequence.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    backend: Arc<dyn TrainingBackend>,
    store: Arc<dyn ModelStore>,
    registry: Arc<VersionRegistry>,
    abtests: Arc<AbTestManager>,
    monitor: Arc<LifecycleMonitor>,
    alerts: Arc<AlertCenter>,
    runs: RwLock<HashMap<RunId, PipelineRun>>,
    run_order: RwLock<Vec<RunId>>,
    cancels: RwLock<HashMap<RunId, Arc<AtomicBool>>>,
}

impl PipelineOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn TrainingBackend>,
        store: Arc<dyn ModelStore>,
        registry: Arc<VersionRegistry>,
        abtests: Arc<AbTestManager>,
        monitor: Arc<LifecycleMonitor>,
        alerts: Arc<AlertCenter>,
    ) -> Self {
        Self {
            config,
            backend,
            store,
            registry,
            abtests,
            monitor,
            alerts,
            runs: RwLock::new(HashMap::new()),
            run_order: RwLock::new(Vec::new()),
            cancels: RwLock::new(HashMap::new()),
        }
    }

    /// Execute one run to completion and return it.
    pub async fn execute(
        self: &Arc<Self>,
        model_id: &str,
        trigger: TriggerReason,
    ) -> Result<PipelineRun> {
        let run_id = self.create_run(model_id, trigger).await;
        Ok(self.clone().run_stages(run_id).await)
    }

    /// Start one run in the background and return its id immediately.
    ///
    /// This is the non-blocking exposed interface: callers poll the run
    /// by id.
    pub async fn spawn(self: &Arc<Self>, model_id: &str, trigger: TriggerReason) -> RunId {
        let run_id = self.create_run(model_id, trigger).await;
        let orchestrator = self.clone();
        let spawned_id = run_id.clone();
        tokio::spawn(async move {
            orchestrator.run_stages(spawned_id).await;
        });
        run_id
    }

    /// Request cooperative cancellation of a run. Takes effect at the
    /// next stage boundary.
    pub async fn cancel(&self, run_id: &str) -> Result<()> {
        let runs = self.runs.read().await;
        let run = runs
            .get(run_id)
            .ok_or_else(|| ModelOpsError::NotFound(format!("Run {} not found", run_id)))?;

        if run.status.is_terminal() {
            return Err(ModelOpsError::InvalidState(format!(
                "run {} already {}",
                run_id,
                run.status.as_str()
            )));
        }
        drop(runs);

        if let Some(flag) = self.cancels.read().await.get(run_id) {
            flag.store(true, Ordering::SeqCst);
            info!(run_id, "Cancellation requested");
        }
        Ok(())
    }

    /// Fetch one run.
    pub async fn run(&self, run_id: &str) -> Option<PipelineRun> {
        self.runs.read().await.get(run_id).cloned()
    }

    /// Runs targeting a model family, oldest first.
    pub async fn runs_for_model(&self, model_id: &str) -> Vec<PipelineRun> {
        let order = self.run_order.read().await.clone();
        let runs = self.runs.read().await;
        order
            .iter()
            .filter_map(|id| runs.get(id))
            .filter(|r| r.model_id == model_id)
            .cloned()
            .collect()
    }

    async fn create_run(&self, model_id: &str, trigger: TriggerReason) -> RunId {
        let run = PipelineRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            model_id: model_id.to_string(),
            trigger,
            status: RunStatus::Pending,
            stages: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            version_id: None,
            error: None,
        };
        let run_id = run.run_id.clone();

        info!(
            run_id = %run_id,
            model_id,
            trigger = trigger.as_str(),
            "Pipeline run created"
        );

        self.runs.write().await.insert(run_id.clone(), run);
        self.cancels
            .write()
            .await
            .insert(run_id.clone(), Arc::new(AtomicBool::new(false)));

        let mut order = self.run_order.write().await;
        order.push(run_id.clone());
        if order.len() > self.config.max_run_history {
            let excess = order.len() - self.config.max_run_history;
            let evicted: Vec<RunId> = order.drain(..excess).collect();
            drop(order);
            let mut runs = self.runs.write().await;
            let mut cancels = self.cancels.write().await;
            for id in evicted {
                runs.remove(&id);
                cancels.remove(&id);
            }
        }

        run_id
    }

    /// Execute the stage sequence for a created run.
    async fn run_stages(self: Arc<Self>, run_id: RunId) -> PipelineRun {
        self.set_status(&run_id, RunStatus::Running).await;
        let model_id = match self.run(&run_id).await {
            Some(run) => run.model_id,
            None => {
                error!(run_id = %run_id, "Run vanished before execution");
                return self.finish(&run_id, RunStatus::Failed, Some("run not found".into())).await;
            }
        };

        // Stage 1: acquire training data.
        let dataset = match self.stage_collect(&run_id, &model_id).await {
            Ok(dataset) => dataset,
            Err(e) => return self.fail(&run_id, &model_id, e).await,
        };
        if self.cancelled(&run_id).await {
            return self.finish(&run_id, RunStatus::Cancelled, None).await;
        }

        // Stage 2: validate data, fails closed.
        if let Err(e) = self.stage_validate_data(&run_id, &dataset).await {
            return self.fail(&run_id, &model_id, e).await;
        }
        if self.cancelled(&run_id).await {
            return self.finish(&run_id, RunStatus::Cancelled, None).await;
        }

        // Stage 3: train.
        let outcome = match self.stage_train(&run_id, &model_id, &dataset).await {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(&run_id, &model_id, e).await,
        };

        // Persist the candidate: registry version plus the family
        // descriptor (baseline statistics for the monitor).
        let version = match self.persist_candidate(&model_id, &outcome).await {
            Ok(version) => version,
            Err(e) => return self.fail(&run_id, &model_id, e).await,
        };
        self.set_version(&run_id, &version).await;
        if self.cancelled(&run_id).await {
            return self.finish(&run_id, RunStatus::Cancelled, None).await;
        }

        // Stage 4: metric quality gate.
        if let Err(e) = self.stage_validate_model(&run_id, &outcome).await {
            return self.fail(&run_id, &model_id, e).await;
        }
        if self.cancelled(&run_id).await {
            return self.finish(&run_id, RunStatus::Cancelled, None).await;
        }

        // Stage 5: functional tests against the candidate.
        if let Err(e) = self.stage_functional_test(&run_id, &outcome).await {
            return self.fail(&run_id, &model_id, e).await;
        }
        if self.cancelled(&run_id).await {
            return self.finish(&run_id, RunStatus::Cancelled, None).await;
        }

        // Stage 6: experiment setup when a production version exists.
        let staged_test = match self.stage_experiment_setup(&run_id, &model_id, &version).await {
            Ok(test) => test,
            Err(e) => return self.fail(&run_id, &model_id, e).await,
        };
        if self.cancelled(&run_id).await {
            return self.finish(&run_id, RunStatus::Cancelled, None).await;
        }

        // Stage 7: deploy.
        if let Err(e) = self
            .stage_deploy(&run_id, &version, staged_test.as_deref())
            .await
        {
            return self.fail(&run_id, &model_id, e).await;
        }

        // Stage 8: arm monitoring.
        self.stage_arm_monitoring(&run_id, &model_id).await;

        info!(run_id = %run_id, model_id = %model_id, "Pipeline run succeeded");
        self.finish(&run_id, RunStatus::Success, None).await
    }

    async fn stage_collect(&self, run_id: &str, model_id: &str) -> Result<DatasetHandle> {
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            self.config.stage_timeout,
            self.backend.acquire_dataset(model_id),
        )
        .await
        .map_err(|_| ModelOpsError::Timeout(self.config.stage_timeout.as_millis() as u64))
        .and_then(|r| r);

        match &result {
            Ok(dataset) => {
                self.record_stage(
                    run_id,
                    PipelineStage::CollectData,
                    true,
                    format!("records={} uri={}", dataset.record_count, dataset.uri),
                    started.elapsed().as_millis() as u64,
                )
                .await;
            }
            Err(e) => {
                self.record_stage(
                    run_id,
                    PipelineStage::CollectData,
                    false,
                    e.to_string(),
                    started.elapsed().as_millis() as u64,
                )
                .await;
            }
        }
        result
    }

    async fn stage_validate_data(&self, run_id: &str, dataset: &DatasetHandle) -> Result<()> {
        let started = std::time::Instant::now();
        let result = if dataset.record_count == 0 {
            Err(ModelOpsError::Validation(
                "training dataset is empty".into(),
            ))
        } else if dataset.feature_names.is_empty() {
            Err(ModelOpsError::Validation(
                "training dataset has no feature columns".into(),
            ))
        } else {
            Ok(())
        };

        self.record_stage(
            run_id,
            PipelineStage::ValidateData,
            result.is_ok(),
            match &result {
                Ok(()) => format!(
                    "records={} features={}",
                    dataset.record_count,
                    dataset.feature_names.len()
                ),
                Err(e) => e.to_string(),
            },
            started.elapsed().as_millis() as u64,
        )
        .await;
        result
    }

    async fn stage_train(
        &self,
        run_id: &str,
        model_id: &str,
        dataset: &DatasetHandle,
    ) -> Result<TrainingOutcome> {
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            self.config.stage_timeout,
            self.backend.train(model_id, dataset, None),
        )
        .await
        .map_err(|_| ModelOpsError::Timeout(self.config.stage_timeout.as_millis() as u64))
        .and_then(|r| r);

        match &result {
            Ok(outcome) => {
                self.record_stage(
                    run_id,
                    PipelineStage::Train,
                    true,
                    format!(
                        "artifact={} accuracy={:.3}",
                        outcome.artifact_location,
                        outcome.metrics.get("accuracy").copied().unwrap_or(f64::NAN)
                    ),
                    started.elapsed().as_millis() as u64,
                )
                .await;
            }
            Err(e) => {
                self.record_stage(
                    run_id,
                    PipelineStage::Train,
                    false,
                    e.to_string(),
                    started.elapsed().as_millis() as u64,
                )
                .await;
            }
        }
        result
    }

    async fn persist_candidate(
        &self,
        model_id: &str,
        outcome: &TrainingOutcome,
    ) -> Result<crate::registry::ModelVersion> {
        let previous = self
            .registry
            .production_version(model_id)
            .await
            .map(|v| v.version_id);

        let version = self
            .registry
            .create_version(NewVersion {
                model_id: model_id.to_string(),
                artifact_location: outcome.artifact_location.clone(),
                metrics: outcome.metrics.clone(),
                parent_version: previous,
                changelog: None,
                ..Default::default()
            })
            .await?;

        let model_type = self
            .store
            .get(model_id)
            .await?
            .map(|info| info.model_type)
            .unwrap_or_else(|| model_id.to_string());

        self.store
            .put(ModelInfo {
                model_id: model_id.to_string(),
                model_type,
                artifact_location: outcome.artifact_location.clone(),
                metrics: outcome.metrics.clone(),
                feature_names: outcome.feature_names.clone(),
                baseline_stats: outcome.baseline_stats.clone(),
                is_production: false,
                trained_at: version.trained_at,
            })
            .await?;

        Ok(version)
    }

    async fn stage_validate_model(&self, run_id: &str, outcome: &TrainingOutcome) -> Result<()> {
        let started = std::time::Instant::now();
        let accuracy = outcome.metrics.get("accuracy").copied();
        let result = match accuracy {
            None => Err(ModelOpsError::Validation(
                "training outcome lacks an accuracy metric".into(),
            )),
            Some(acc) if acc < self.config.min_accuracy => Err(ModelOpsError::Validation(format!(
                "accuracy {:.3} below minimum {:.3}",
                acc, self.config.min_accuracy
            ))),
            Some(_) => Ok(()),
        };

        self.record_stage(
            run_id,
            PipelineStage::ValidateModel,
            result.is_ok(),
            match &result {
                Ok(()) => format!(
                    "accuracy={:.3} min={:.3}",
                    accuracy.unwrap_or(f64::NAN),
                    self.config.min_accuracy
                ),
                Err(e) => e.to_string(),
            },
            started.elapsed().as_millis() as u64,
        )
        .await;
        result
    }

    async fn stage_functional_test(&self, run_id: &str, outcome: &TrainingOutcome) -> Result<()> {
        let started = std::time::Instant::now();
        let result = if outcome.artifact_location.is_empty() {
            Err(ModelOpsError::Validation(
                "candidate has no artifact location".into(),
            ))
        } else if outcome.feature_names.is_empty() {
            Err(ModelOpsError::Validation(
                "candidate declares no input features".into(),
            ))
        } else if outcome.metrics.values().any(|v| !v.is_finite()) {
            Err(ModelOpsError::Validation(
                "candidate metrics contain non-finite values".into(),
            ))
        } else {
            Ok(())
        };

        self.record_stage(
            run_id,
            PipelineStage::FunctionalTest,
            result.is_ok(),
            match &result {
                Ok(()) => format!("checks=3 features={}", outcome.feature_names.len()),
                Err(e) => e.to_string(),
            },
            started.elapsed().as_millis() as u64,
        )
        .await;
        result
    }

    /// Register an A/B test against the current production version, if
    /// one exists. Returns the created test id.
    async fn stage_experiment_setup(
        &self,
        run_id: &str,
        model_id: &str,
        candidate: &crate::registry::ModelVersion,
    ) -> Result<Option<String>> {
        let started = std::time::Instant::now();

        let production = self.registry.production_version(model_id).await;
        // Errors land in `result` so the stage audit trail records the
        // failure rather than bypassing it.
        let result: Result<Option<String>> = match production {
            Some(production) => {
                match self
                    .abtests
                    .create_test(
                        format!("{} canary {}", model_id, candidate.semantic_version),
                        &production.version_id,
                        &candidate.version_id,
                        self.config.canary_fraction,
                        "accuracy",
                    )
                    .await
                {
                    Ok(test_id) => self
                        .registry
                        .mark_staging(&candidate.version_id)
                        .await
                        .map(|()| Some(test_id)),
                    Err(e) => Err(e),
                }
            }
            None => Ok(None),
        };

        self.record_stage(
            run_id,
            PipelineStage::ExperimentSetup,
            result.is_ok(),
            match &result {
                Ok(Some(test_id)) => format!(
                    "ab_test={} fraction={:.2}",
                    test_id, self.config.canary_fraction
                ),
                Ok(None) => "direct deployment, no production predecessor".to_string(),
                Err(e) => e.to_string(),
            },
            started.elapsed().as_millis() as u64,
        )
        .await;
        result
    }

    async fn stage_deploy(
        &self,
        run_id: &str,
        candidate: &crate::registry::ModelVersion,
        staged_test: Option<&str>,
    ) -> Result<()> {
        let started = std::time::Instant::now();
        let result = match staged_test {
            // A pending experiment owns the promotion decision.
            Some(_) => Ok(()),
            None => self
                .registry
                .promote_to_production(&candidate.version_id)
                .await
                .map(|_| ()),
        };

        self.record_stage(
            run_id,
            PipelineStage::Deploy,
            result.is_ok(),
            match (&result, staged_test) {
                (Ok(()), Some(test_id)) => format!("staged behind experiment {}", test_id),
                (Ok(()), None) => format!("promoted {}", candidate.semantic_version),
                (Err(e), _) => e.to_string(),
            },
            started.elapsed().as_millis() as u64,
        )
        .await;
        result
    }

    async fn stage_arm_monitoring(&self, run_id: &str, model_id: &str) {
        let started = std::time::Instant::now();
        self.monitor.arm(model_id).await;
        self.record_stage(
            run_id,
            PipelineStage::ArmMonitoring,
            true,
            "monitoring armed".to_string(),
            started.elapsed().as_millis() as u64,
        )
        .await;
    }

    async fn record_stage(
        &self,
        run_id: &str,
        stage: PipelineStage,
        success: bool,
        detail: String,
        duration_ms: u64,
    ) {
        if success {
            info!(run_id, stage = stage.as_str(), duration_ms, detail = %detail, "Stage completed");
        } else {
            error!(run_id, stage = stage.as_str(), duration_ms, detail = %detail, "Stage failed");
        }

        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(run_id) {
            run.stages.push(StageResult {
                stage,
                success,
                timestamp: Utc::now(),
                duration_ms,
                detail,
            });
        }
    }

    async fn set_status(&self, run_id: &str, status: RunStatus) {
        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(run_id) {
            run.status = status;
        }
    }

    async fn set_version(&self, run_id: &str, version: &crate::registry::ModelVersion) {
        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(run_id) {
            run.version_id = Some(version.version_id.clone());
        }
    }

    async fn cancelled(&self, run_id: &str) -> bool {
        self.cancels
            .read()
            .await
            .get(run_id)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn fail(&self, run_id: &str, model_id: &str, error: ModelOpsError) -> PipelineRun {
        warn!(run_id, model_id, error = %error, "Pipeline run failed");
        self.alerts
            .emit(
                model_id,
                AlertCategory::Pipeline,
                AlertSeverity::Warning,
                format!("pipeline run {} failed: {}", run_id, error),
            )
            .await;
        self.finish(run_id, RunStatus::Failed, Some(error.to_string()))
            .await
    }

    async fn finish(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> PipelineRun {
        if status == RunStatus::Cancelled {
            info!(run_id, "Pipeline run cancelled between stages");
        }

        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(run_id) {
            run.status = status;
            run.completed_at = Some(Utc::now());
            run.error = error;
            return run.clone();
        }
        // Evicted from bounded history mid-run; synthesize the terminal
        // view for the caller.
        PipelineRun {
            run_id: run_id.to_string(),
            model_id: String::new(),
            trigger: TriggerReason::Manual,
            status,
            stages: Vec::new(),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            version_id: None,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AbTestConfig, MonitorConfig};
    use crate::store::{InMemoryModelStore, InMemoryPredictionLog};
    use crate::types::FeatureStats;
    use async_trait::async_trait;

    struct StubBackend {
        accuracy: f64,
        fail_training: bool,
    }

    #[async_trait]
    impl TrainingBackend for StubBackend {
        async fn acquire_dataset(&self, model_type: &str) -> Result<DatasetHandle> {
            Ok(DatasetHandle {
                uri: format!("datasets/{}/latest", model_type),
                record_count: 5000,
                feature_names: vec!["age".into(), "bmi".into()],
            })
        }

        async fn train(
            &self,
            model_type: &str,
            _dataset: &DatasetHandle,
            _hyperparameters: Option<&HashMap<String, f64>>,
        ) -> Result<TrainingOutcome> {
            if self.fail_training {
                return Err(ModelOpsError::Training("backend unreachable".into()));
            }
            Ok(TrainingOutcome {
                artifact_location: format!("models/{}/{}", model_type, uuid::Uuid::new_v4()),
                metrics: HashMap::from([
                    ("accuracy".to_string(), self.accuracy),
                    ("f1_score".to_string(), self.accuracy - 0.01),
                ]),
                feature_names: vec!["age".into(), "bmi".into()],
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

    fn harness(backend: StubBackend) -> (Arc<PipelineOrchestrator>, Arc<VersionRegistry>) {
        harness_with_config(PipelineConfig::default(), Arc::new(backend))
    }

    fn harness_with_config(
        config: PipelineConfig,
        backend: Arc<dyn TrainingBackend>,
    ) -> (Arc<PipelineOrchestrator>, Arc<VersionRegistry>) {
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
            config,
            backend,
            store,
            registry.clone(),
            abtests,
            monitor,
            alerts,
        ));
        (orchestrator, registry)
    }

    #[tokio::test]
    async fn test_first_run_deploys_directly() {
        let (orchestrator, registry) = harness(StubBackend {
            accuracy: 0.9,
            fail_training: false,
        });

        let run = orchestrator
            .execute("m1", TriggerReason::Manual)
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.stages.len(), 8);
        assert!(run.stages.iter().all(|s| s.success));
        assert!(run.error.is_none());

        // No prior production version: deployed directly.
        let production = registry.production_version("m1").await.unwrap();
        assert_eq!(Some(production.version_id), run.version_id);
    }

    #[tokio::test]
    async fn test_second_run_stages_behind_experiment() {
        let (orchestrator, registry) = harness(StubBackend {
            accuracy: 0.9,
            fail_training: false,
        });

        let first = orchestrator
            .execute("m1", TriggerReason::Manual)
            .await
            .unwrap();
        let second = orchestrator
            .execute("m1", TriggerReason::DriftDetected)
            .await
            .unwrap();

        assert_eq!(second.status, RunStatus::Success);

        // Production unchanged; candidate staged behind the experiment.
        let production = registry.production_version("m1").await.unwrap();
        assert_eq!(Some(production.version_id), first.version_id);

        let candidate = registry
            .version(second.version_id.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(candidate.status, crate::registry::VersionStatus::Staging);

        let setup = second
            .stages
            .iter()
            .find(|s| s.stage == PipelineStage::ExperimentSetup)
            .unwrap();
        assert!(setup.detail.contains("ab_test="));
    }

    #[tokio::test]
    async fn test_training_failure_is_contained() {
        let (orchestrator, registry) = harness(StubBackend {
            accuracy: 0.9,
            fail_training: true,
        });

        let run = orchestrator
            .execute("m1", TriggerReason::Scheduled)
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_ref().unwrap().contains("backend unreachable"));
        assert!(run.version_id.is_none());
        assert!(registry.production_version("m1").await.is_none());

        // The failing stage is recorded; later stages never ran.
        assert_eq!(run.stages.len(), 3);
        let train = run.stages.last().unwrap();
        assert_eq!(train.stage, PipelineStage::Train);
        assert!(!train.success);
    }

    #[tokio::test]
    async fn test_training_failure_leaves_production_untouched() {
        let (good, registry) = harness(StubBackend {
            accuracy: 0.9,
            fail_training: false,
        });
        let first = good.execute("m1", TriggerReason::Manual).await.unwrap();

        // Same registry, failing backend.
        let store = Arc::new(InMemoryModelStore::new());
        let log = Arc::new(InMemoryPredictionLog::new(2000));
        let alerts = Arc::new(AlertCenter::default());
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
        let failing = Arc::new(PipelineOrchestrator::new(
            PipelineConfig::default(),
            Arc::new(StubBackend {
                accuracy: 0.9,
                fail_training: true,
            }),
            store,
            registry.clone(),
            abtests,
            monitor,
            alerts,
        ));

        let run = failing.execute("m1", TriggerReason::Manual).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);

        let production = registry.production_version("m1").await.unwrap();
        assert_eq!(Some(production.version_id), first.version_id);
    }

    #[tokio::test]
    async fn test_quality_gate_failure() {
        let (orchestrator, registry) = harness(StubBackend {
            accuracy: 0.5,
            fail_training: false,
        });

        let run = orchestrator
            .execute("m1", TriggerReason::Manual)
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_ref().unwrap().contains("below minimum"));

        // Candidate exists but stays in development; nothing promoted.
        let candidate = registry
            .version(run.version_id.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(
            candidate.status,
            crate::registry::VersionStatus::Development
        );
        assert!(registry.production_version("m1").await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_returns_immediately_and_completes() {
        let (orchestrator, _registry) = harness(StubBackend {
            accuracy: 0.9,
            fail_training: false,
        });

        let run_id = orchestrator.spawn("m1", TriggerReason::Manual).await;

        // Poll until the background run finishes.
        for _ in 0..100 {
            if let Some(run) = orchestrator.run(&run_id).await {
                if run.status.is_terminal() {
                    assert_eq!(run.status, RunStatus::Success);
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("spawned run never completed");
    }

    #[tokio::test]
    async fn test_experiment_setup_failure_is_recorded() {
        // A traffic fraction the experiment manager rejects: setup must
        // fail the run and land in the stage audit trail.
        let (orchestrator, registry) = harness_with_config(
            PipelineConfig {
                canary_fraction: 1.5,
                ..PipelineConfig::default()
            },
            Arc::new(StubBackend {
                accuracy: 0.9,
                fail_training: false,
            }),
        );

        let first = orchestrator
            .execute("m1", TriggerReason::Manual)
            .await
            .unwrap();
        assert_eq!(first.status, RunStatus::Success);

        let second = orchestrator
            .execute("m1", TriggerReason::Manual)
            .await
            .unwrap();
        assert_eq!(second.status, RunStatus::Failed);
        assert!(second.error.as_ref().unwrap().contains("traffic_fraction"));

        let setup = second.stages.last().unwrap();
        assert_eq!(setup.stage, PipelineStage::ExperimentSetup);
        assert!(!setup.success);
        assert!(setup.detail.contains("traffic_fraction"));

        // Production unchanged; the candidate never left development.
        assert_eq!(
            registry.production_version("m1").await.unwrap().version_id,
            first.version_id.unwrap()
        );
        let candidate = registry
            .version(second.version_id.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(
            candidate.status,
            crate::registry::VersionStatus::Development
        );
    }

    #[tokio::test]
    async fn test_run_history_is_bounded() {
        let (orchestrator, _registry) = harness_with_config(
            PipelineConfig {
                max_run_history: 2,
                ..PipelineConfig::default()
            },
            Arc::new(StubBackend {
                accuracy: 0.9,
                fail_training: false,
            }),
        );

        let mut run_ids = Vec::new();
        for model in ["m1", "m2", "m3"] {
            let run = orchestrator
                .execute(model, TriggerReason::Manual)
                .await
                .unwrap();
            run_ids.push(run.run_id);
        }

        // Oldest run evicted, newest two retained.
        assert!(orchestrator.run(&run_ids[0]).await.is_none());
        assert!(orchestrator.run(&run_ids[1]).await.is_some());
        assert!(orchestrator.run(&run_ids[2]).await.is_some());
        assert!(orchestrator.runs_for_model("m1").await.is_empty());
    }

    #[tokio::test]
    async fn test_run_history_per_model() {
        let (orchestrator, _registry) = harness(StubBackend {
            accuracy: 0.9,
            fail_training: false,
        });

        orchestrator
            .execute("m1", TriggerReason::Manual)
            .await
            .unwrap();
        orchestrator
            .execute("m2", TriggerReason::Manual)
            .await
            .unwrap();
        orchestrator
            .execute("m1", TriggerReason::Scheduled)
            .await
            .unwrap();

        let history = orchestrator.runs_for_model("m1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].trigger, TriggerReason::Manual);
        assert_eq!(history[1].trigger, TriggerReason::Scheduled);
    }

    /// Backend whose training stage takes long enough for a cancellation
    /// request to land mid-stage.
    struct SlowTrainBackend;

    #[async_trait]
    impl TrainingBackend for SlowTrainBackend {
        async fn acquire_dataset(&self, model_type: &str) -> Result<DatasetHandle> {
            Ok(DatasetHandle {
                uri: format!("datasets/{}/latest", model_type),
                record_count: 5000,
                feature_names: vec!["age".into()],
            })
        }

        async fn train(
            &self,
            model_type: &str,
            _dataset: &DatasetHandle,
            _hyperparameters: Option<&HashMap<String, f64>>,
        ) -> Result<TrainingOutcome> {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            Ok(TrainingOutcome {
                artifact_location: format!("models/{}/slow", model_type),
                metrics: HashMap::from([("accuracy".to_string(), 0.9)]),
                feature_names: vec!["age".into()],
                baseline_stats: HashMap::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_cancel_takes_effect_between_stages() {
        let (orchestrator, registry) =
            harness_with_config(PipelineConfig::default(), Arc::new(SlowTrainBackend));

        let run_id = orchestrator.spawn("m1", TriggerReason::Manual).await;

        // Let the run reach the training stage, then request cancellation.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        orchestrator.cancel(&run_id).await.unwrap();

        let mut finished = None;
        for _ in 0..200 {
            if let Some(run) = orchestrator.run(&run_id).await {
                if run.status.is_terminal() {
                    finished = Some(run);
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let run = finished.expect("cancelled run never finished");
        assert_eq!(run.status, RunStatus::Cancelled);

        // Training completed before the stage boundary, so a candidate
        // exists; cancellation leaves it in development, undeployed.
        let candidate = registry
            .version(run.version_id.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(
            candidate.status,
            crate::registry::VersionStatus::Development
        );
        assert!(registry.production_version("m1").await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_terminal_run_fails() {
        let (orchestrator, _registry) = harness(StubBackend {
            accuracy: 0.9,
            fail_training: false,
        });

        let run = orchestrator
            .execute("m1", TriggerReason::Manual)
            .await
            .unwrap();
        let err = orchestrator.cancel(&run.run_id).await.unwrap_err();
        assert!(matches!(err, ModelOpsError::InvalidState(_)));

        let last = run.stages.last().unwrap();
        assert_eq!(last.stage, PipelineStage::ArmMonitoring);
    }
}
