//! Drift & decay monitoring for production models.
//!
//! Statistically compares recent production traffic against the baseline
//! stored at training time and raises typed findings:
//!
//! - **Drift**: for each feature in the stored baseline, a same-size
//!   synthetic reference sample is drawn from a normal distribution
//!   parameterized by the baseline mean/std, and a two-sample
//!   Kolmogorov-Smirnov statistic is computed against the recent
//!   production values. A feature is flagged when the statistic exceeds
//!   the configured threshold.
//! - **Decay**: among recent predictions carrying ground truth, current
//!   accuracy and F1 are compared against the baseline metrics; decay is
//!   flagged when either has dropped by more than the threshold.
//!
//! Too few samples yields an `InsufficientData` finding and a missing
//! baseline yields `MissingBaseline`; both are distinct from "no drift".
//!
//! The monitor owns the per-model bounded recent-prediction cache; other
//! components record and read predictions through its interface only.

use crate::alerting::{AlertCategory, AlertCenter, AlertSeverity};
use crate::config::MonitorConfig;
use crate::error::{ModelOpsError, Result};
use crate::stats::{classification_metrics, ks_statistic};
use crate::store::{ModelStore, PredictionLog};
use crate::types::{FeatureStats, ModelId, PredictionRecord};
use chrono::{DateTime, Utc};
use rand::distributions::Distribution;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// What kind of degradation a finding describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingType {
    /// Input feature distribution shift.
    DataDrift,
    /// Accuracy/F1 drop against ground truth.
    ModelDecay,
}

impl FindingType {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingType::DataDrift => "data_drift",
            FindingType::ModelDecay => "model_decay",
        }
    }
}

/// Overall verdict of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingOutcome {
    /// Degradation detected.
    Detected,
    /// Evaluated cleanly, nothing detected.
    Clear,
    /// Too few recent samples to evaluate.
    InsufficientData,
    /// No baseline stored for the model.
    MissingBaseline,
}

/// Per-feature drift detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub feature: String,
    /// Two-sample KS statistic against the synthetic baseline sample.
    pub statistic: f64,
    pub threshold: f64,
    pub drifted: bool,
}

/// Per-metric decay detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDecay {
    pub metric: String,
    pub baseline: f64,
    pub current: f64,
    /// Baseline minus current; positive means the metric got worse.
    pub drop: f64,
    pub threshold: f64,
    pub decayed: bool,
}

/// One drift or decay determination at a point in time. Immutable once
/// written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringFinding {
    pub model_id: ModelId,
    pub finding_type: FindingType,
    pub outcome: FindingOutcome,
    /// Per-feature detail (drift findings).
    pub features: Vec<FeatureDrift>,
    /// Per-metric detail (decay findings).
    pub metrics: Vec<MetricDecay>,
    /// Recent samples the evaluation saw.
    pub sample_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl MonitoringFinding {
    /// Whether degradation was detected.
    pub fn detected(&self) -> bool {
        self.outcome == FindingOutcome::Detected
    }
}

/// Health roll-up for the exposed status read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelHealth {
    Healthy,
    Drifting,
    Decayed,
    InsufficientData,
    Unmonitored,
}

/// Current monitoring status of one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub model_id: ModelId,
    pub armed: bool,
    pub health: ModelHealth,
    pub cached_samples: usize,
    pub last_drift: Option<MonitoringFinding>,
    pub last_decay: Option<MonitoringFinding>,
}

/// Drift & decay monitor with the per-model recent-prediction cache.
pub struct LifecycleMonitor {
    config: MonitorConfig,
    store: Arc<dyn ModelStore>,
    log: Arc<dyn PredictionLog>,
    alerts: Arc<AlertCenter>,
    /// Bounded ring buffer of recent predictions per model. Owned here;
    /// appended by recording calls, read by the evaluators.
    cache: RwLock<HashMap<ModelId, VecDeque<PredictionRecord>>>,
    findings: RwLock<HashMap<ModelId, Vec<MonitoringFinding>>>,
    armed: RwLock<HashSet<ModelId>>,
}

impl LifecycleMonitor {
    /// Create a monitor over the given stores and alert sink.
    pub fn new(
        config: MonitorConfig,
        store: Arc<dyn ModelStore>,
        log: Arc<dyn PredictionLog>,
        alerts: Arc<AlertCenter>,
    ) -> Self {
        Self {
            config,
            store,
            log,
            alerts,
            cache: RwLock::new(HashMap::new()),
            findings: RwLock::new(HashMap::new()),
            armed: RwLock::new(HashSet::new()),
        }
    }

    /// Start watching a model (called when a version reaches production).
    pub async fn arm(&self, model_id: &str) {
        let inserted = self.armed.write().await.insert(model_id.to_string());
        if inserted {
            info!(model_id, "Armed monitoring");
        }
    }

    /// Stop watching a model.
    pub async fn disarm(&self, model_id: &str) {
        if self.armed.write().await.remove(model_id) {
            info!(model_id, "Disarmed monitoring");
        }
    }

    /// Models currently under watch.
    pub async fn armed_models(&self) -> Vec<ModelId> {
        self.armed.read().await.iter().cloned().collect()
    }

    /// Record one production prediction: appends to the bounded cache and
    /// writes through to the durable prediction log.
    pub async fn record_prediction(&self, record: PredictionRecord) -> Result<()> {
        self.log.log(record.clone()).await?;

        let mut cache = self.cache.write().await;
        let window = cache.entry(record.model_id.clone()).or_default();
        window.push_back(record);
        while window.len() > self.config.cache_capacity {
            window.pop_front();
        }
        Ok(())
    }

    /// Minimum recent predictions required before evaluations run.
    pub fn min_samples(&self) -> usize {
        self.config.min_samples
    }

    /// Number of recent predictions cached for a model.
    pub async fn cached_samples(&self, model_id: &str) -> usize {
        self.cache
            .read()
            .await
            .get(model_id)
            .map(|w| w.len())
            .unwrap_or(0)
    }

    /// Evaluate data drift for a model against its stored baseline.
    pub async fn evaluate_drift(&self, model_id: &str) -> Result<MonitoringFinding> {
        let recent = self.recent_window(model_id).await;

        if recent.len() < self.config.min_samples {
            debug!(
                model_id,
                samples = recent.len(),
                min = self.config.min_samples,
                "Too few samples for drift evaluation"
            );
            return Ok(self
                .persist(self.empty_finding(
                    model_id,
                    FindingType::DataDrift,
                    FindingOutcome::InsufficientData,
                    recent.len(),
                ))
                .await);
        }

        let baseline = match self.store.get(model_id).await? {
            Some(info) if !info.baseline_stats.is_empty() => info.baseline_stats,
            _ => {
                return Ok(self
                    .persist(self.empty_finding(
                        model_id,
                        FindingType::DataDrift,
                        FindingOutcome::MissingBaseline,
                        recent.len(),
                    ))
                    .await);
            }
        };

        // The thread-local RNG is not Send; keep it out of the awaiting
        // scope so callers can run evaluations on spawned tasks.
        let features = compute_feature_drift(&baseline, &recent, self.config.drift_threshold)?;

        let drifted: Vec<&FeatureDrift> = features.iter().filter(|f| f.drifted).collect();
        let outcome = if drifted.is_empty() {
            FindingOutcome::Clear
        } else {
            FindingOutcome::Detected
        };

        let finding = MonitoringFinding {
            model_id: model_id.to_string(),
            finding_type: FindingType::DataDrift,
            outcome,
            features,
            metrics: Vec::new(),
            sample_count: recent.len(),
            timestamp: Utc::now(),
        };

        if finding.detected() {
            let max_statistic = finding
                .features
                .iter()
                .map(|f| f.statistic)
                .fold(0.0, f64::max);
            let severity = if max_statistic > 2.0 * self.config.drift_threshold {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };
            let flagged: Vec<&str> = finding
                .features
                .iter()
                .filter(|f| f.drifted)
                .map(|f| f.feature.as_str())
                .collect();

            warn!(
                model_id,
                flagged = ?flagged,
                max_statistic,
                "Data drift detected"
            );
            self.alerts
                .emit(
                    model_id,
                    AlertCategory::DataDrift,
                    severity,
                    format!(
                        "data drift detected on features [{}], max KS statistic {:.3}",
                        flagged.join(", "),
                        max_statistic
                    ),
                )
                .await;
        }

        Ok(self.persist(finding).await)
    }

    /// Evaluate model decay against ground truth accumulated in the
    /// recent window.
    pub async fn evaluate_decay(&self, model_id: &str) -> Result<MonitoringFinding> {
        let recent = self.recent_window(model_id).await;
        let labeled: Vec<(f64, f64)> = recent
            .iter()
            .filter_map(|r| r.ground_truth.map(|t| (r.prediction, t)))
            .collect();

        if labeled.len() < self.config.min_samples {
            debug!(
                model_id,
                labeled = labeled.len(),
                min = self.config.min_samples,
                "Too few labeled samples for decay evaluation"
            );
            return Ok(self
                .persist(self.empty_finding(
                    model_id,
                    FindingType::ModelDecay,
                    FindingOutcome::InsufficientData,
                    labeled.len(),
                ))
                .await);
        }

        let info = self.store.get(model_id).await?;
        let (baseline_accuracy, baseline_f1) = match info {
            Some(info) => match (info.metric("accuracy"), info.metric("f1_score")) {
                (Some(acc), f1) => (acc, f1),
                _ => {
                    return Ok(self
                        .persist(self.empty_finding(
                            model_id,
                            FindingType::ModelDecay,
                            FindingOutcome::MissingBaseline,
                            labeled.len(),
                        ))
                        .await);
                }
            },
            None => {
                return Ok(self
                    .persist(self.empty_finding(
                        model_id,
                        FindingType::ModelDecay,
                        FindingOutcome::MissingBaseline,
                        labeled.len(),
                    ))
                    .await);
            }
        };

        let current = classification_metrics(&labeled);
        let mut metrics = vec![MetricDecay {
            metric: "accuracy".to_string(),
            baseline: baseline_accuracy,
            current: current.accuracy,
            drop: baseline_accuracy - current.accuracy,
            threshold: self.config.decay_threshold,
            decayed: baseline_accuracy - current.accuracy > self.config.decay_threshold,
        }];

        if let Some(baseline_f1) = baseline_f1 {
            metrics.push(MetricDecay {
                metric: "f1_score".to_string(),
                baseline: baseline_f1,
                current: current.f1,
                drop: baseline_f1 - current.f1,
                threshold: self.config.decay_threshold,
                decayed: baseline_f1 - current.f1 > self.config.decay_threshold,
            });
        }

        let outcome = if metrics.iter().any(|m| m.decayed) {
            FindingOutcome::Detected
        } else {
            FindingOutcome::Clear
        };

        let finding = MonitoringFinding {
            model_id: model_id.to_string(),
            finding_type: FindingType::ModelDecay,
            outcome,
            features: Vec::new(),
            metrics,
            sample_count: labeled.len(),
            timestamp: Utc::now(),
        };

        if finding.detected() {
            let max_drop = finding.metrics.iter().map(|m| m.drop).fold(0.0, f64::max);
            let severity = if max_drop > 2.0 * self.config.decay_threshold {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };

            warn!(model_id, max_drop, "Model decay detected");
            self.alerts
                .emit(
                    model_id,
                    AlertCategory::ModelDecay,
                    severity,
                    format!(
                        "model decay detected, largest metric drop {:.3} over {} labeled samples",
                        max_drop,
                        finding.sample_count
                    ),
                )
                .await;
        }

        Ok(self.persist(finding).await)
    }

    /// All recorded findings for a model, oldest first.
    pub async fn findings(&self, model_id: &str) -> Vec<MonitoringFinding> {
        self.findings
            .read()
            .await
            .get(model_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The most recent finding of a given type.
    pub async fn latest_finding(
        &self,
        model_id: &str,
        finding_type: FindingType,
    ) -> Option<MonitoringFinding> {
        self.findings
            .read()
            .await
            .get(model_id)?
            .iter()
            .rev()
            .find(|f| f.finding_type == finding_type)
            .cloned()
    }

    /// Health roll-up for the exposed status read path.
    pub async fn status(&self, model_id: &str) -> ModelStatus {
        let armed = self.armed.read().await.contains(model_id);
        let cached_samples = self.cached_samples(model_id).await;
        let last_drift = self.latest_finding(model_id, FindingType::DataDrift).await;
        let last_decay = self.latest_finding(model_id, FindingType::ModelDecay).await;

        let health = match (&last_drift, &last_decay) {
            (None, None) => ModelHealth::Unmonitored,
            _ => {
                let decayed = matches!(
                    last_decay.as_ref().map(|f| f.outcome),
                    Some(FindingOutcome::Detected)
                );
                let drifting = matches!(
                    last_drift.as_ref().map(|f| f.outcome),
                    Some(FindingOutcome::Detected)
                );
                let starved = [&last_drift, &last_decay].iter().all(|f| {
                    matches!(
                        f.as_ref().map(|f| f.outcome),
                        None | Some(FindingOutcome::InsufficientData)
                            | Some(FindingOutcome::MissingBaseline)
                    )
                });

                if decayed {
                    ModelHealth::Decayed
                } else if drifting {
                    ModelHealth::Drifting
                } else if starved {
                    ModelHealth::InsufficientData
                } else {
                    ModelHealth::Healthy
                }
            }
        };

        ModelStatus {
            model_id: model_id.to_string(),
            armed,
            health,
            cached_samples,
            last_drift,
            last_decay,
        }
    }

    async fn recent_window(&self, model_id: &str) -> Vec<PredictionRecord> {
        self.cache
            .read()
            .await
            .get(model_id)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn empty_finding(
        &self,
        model_id: &str,
        finding_type: FindingType,
        outcome: FindingOutcome,
        sample_count: usize,
    ) -> MonitoringFinding {
        MonitoringFinding {
            model_id: model_id.to_string(),
            finding_type,
            outcome,
            features: Vec::new(),
            metrics: Vec::new(),
            sample_count,
            timestamp: Utc::now(),
        }
    }

    async fn persist(&self, finding: MonitoringFinding) -> MonitoringFinding {
        let mut findings = self.findings.write().await;
        let history = findings.entry(finding.model_id.clone()).or_default();
        history.push(finding.clone());
        if history.len() > self.config.max_findings {
            let excess = history.len() - self.config.max_findings;
            history.drain(..excess);
        }
        finding
    }
}

/// Per-feature KS statistics against synthetic reference samples drawn
/// from the stored baselines. Synchronous: owns the RNG for the whole
/// sampling pass.
fn compute_feature_drift(
    baseline: &HashMap<String, FeatureStats>,
    recent: &[PredictionRecord],
    threshold: f64,
) -> Result<Vec<FeatureDrift>> {
    let mut rng = rand::thread_rng();
    let mut features = Vec::with_capacity(baseline.len());

    for (feature, stats) in baseline {
        let observed: Vec<f64> = recent
            .iter()
            .filter_map(|r| r.features.get(feature).copied())
            .collect();

        let statistic = if observed.is_empty() {
            0.0
        } else {
            let std_dev = stats.std_dev.max(f64::EPSILON);
            let normal = Normal::new(stats.mean, std_dev).map_err(|e| {
                ModelOpsError::Internal(format!(
                    "invalid baseline for feature {}: {}",
                    feature, e
                ))
            })?;
            let reference: Vec<f64> = normal
                .sample_iter(&mut rng)
                .take(observed.len())
                .collect();
            ks_statistic(&observed, &reference)
        };

        features.push(FeatureDrift {
            feature: feature.clone(),
            statistic,
            threshold,
            drifted: statistic > threshold,
        });
    }

    features.sort_by(|a, b| a.feature.cmp(&b.feature));
    Ok(features)
}
