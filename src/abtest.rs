//! A/B traffic experiments between two model versions.
//!
//! Splits live traffic between a control and a treatment version,
//! accumulates per-arm outcome counters, and computes a chi-square
//! significance verdict once both arms have enough samples. Assignment is
//! sticky for callers that supply an identity: the same caller always
//! lands on the same arm for the life of the test. Declaring a winner is
//! the only path by which an experiment changes production state, and it
//! goes through the version registry so the decision stays auditable and
//! reversible.

use crate::alerting::{AlertCategory, AlertCenter, AlertSeverity};
use crate::config::AbTestConfig;
use crate::error::{ModelOpsError, Result};
use crate::registry::{VersionRegistry, VersionStatus};
use crate::stats::chi_square_2x2;
use crate::types::{TestId, VersionId};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Which experiment arm a caller was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arm {
    Control,
    Treatment,
}

impl Arm {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Arm::Control => "control",
            Arm::Treatment => "treatment",
        }
    }
}

/// Experiment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    Active,
    Completed,
}

/// Accumulated outcome counters for one arm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmStats {
    /// Version serving this arm.
    pub version_id: VersionId,
    /// Predictions routed to the arm.
    pub predictions: u64,
    /// Predictions correct against ground truth.
    pub correct: u64,
    /// Named-metric sample lists (e.g. latency, calibration).
    pub metric_samples: HashMap<String, Vec<f64>>,
}

impl ArmStats {
    fn new(version_id: VersionId) -> Self {
        Self {
            version_id,
            predictions: 0,
            correct: 0,
            metric_samples: HashMap::new(),
        }
    }

    /// Accuracy over outcomes with ground truth so far.
    pub fn accuracy(&self) -> f64 {
        if self.predictions == 0 {
            return 0.0;
        }
        self.correct as f64 / self.predictions as f64
    }
}

/// One live experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    pub test_id: TestId,
    /// Human label.
    pub label: String,
    /// Fraction of traffic routed to the treatment arm, fixed for the
    /// life of the test.
    pub traffic_fraction: f64,
    /// Metric the experiment is judged on.
    pub target_metric: String,
    pub status: TestStatus,
    pub control: ArmStats,
    pub treatment: ArmStats,
    /// Declared winner, once stopped with a verdict.
    pub winner: Option<Arm>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether an imbalance alert has already been raised.
    #[serde(default)]
    imbalance_alerted: bool,
}

/// Comparison of the two arms at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestComparison {
    pub test_id: TestId,
    pub status: TestStatus,
    pub control_accuracy: f64,
    pub treatment_accuracy: f64,
    /// Treatment accuracy minus control accuracy.
    pub improvement: f64,
    pub control_samples: u64,
    pub treatment_samples: u64,
    /// Chi-square statistic, once both arms reach the minimum sample
    /// count.
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    /// Significance verdict; `None` below the minimum sample count,
    /// which is distinct from `Some(false)`.
    pub significant: Option<bool>,
    /// Mean of the target metric per arm, where samples were recorded.
    pub control_metric_mean: Option<f64>,
    pub treatment_metric_mean: Option<f64>,
}

/// Manager of live experiments.
pub struct AbTestManager {
    config: AbTestConfig,
    registry: Arc<VersionRegistry>,
    alerts: Arc<AlertCenter>,
    tests: RwLock<HashMap<TestId, AbTest>>,
}

impl AbTestManager {
    /// Create a manager promoting winners through the given registry.
    pub fn new(
        config: AbTestConfig,
        registry: Arc<VersionRegistry>,
        alerts: Arc<AlertCenter>,
    ) -> Self {
        Self {
            config,
            registry,
            alerts,
            tests: RwLock::new(HashMap::new()),
        }
    }

    /// Create an experiment between two registered versions.
    pub async fn create_test(
        &self,
        label: impl Into<String>,
        control_version_id: &str,
        treatment_version_id: &str,
        traffic_fraction: f64,
        target_metric: impl Into<String>,
    ) -> Result<TestId> {
        if !(0.0..=1.0).contains(&traffic_fraction) {
            return Err(ModelOpsError::InvalidArgument(format!(
                "traffic_fraction {} out of range [0, 1]",
                traffic_fraction
            )));
        }

        for version_id in [control_version_id, treatment_version_id] {
            if self.registry.version(version_id).await.is_none() {
                return Err(ModelOpsError::NotFound(format!(
                    "Version {} not found",
                    version_id
                )));
            }
        }

        let test = AbTest {
            test_id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            traffic_fraction,
            target_metric: target_metric.into(),
            status: TestStatus::Active,
            control: ArmStats::new(control_version_id.to_string()),
            treatment: ArmStats::new(treatment_version_id.to_string()),
            winner: None,
            created_at: Utc::now(),
            completed_at: None,
            imbalance_alerted: false,
        };

        let test_id = test.test_id.clone();
        info!(
            test_id = %test_id,
            label = %test.label,
            control = control_version_id,
            treatment = treatment_version_id,
            traffic_fraction,
            "Created A/B test"
        );
        self.tests.write().await.insert(test_id.clone(), test);
        Ok(test_id)
    }

    /// Route one call to an arm.
    ///
    /// With a caller identity the assignment is deterministic for the life
    /// of the test; without one it is randomized per call.
    pub async fn select_arm(
        &self,
        test_id: &str,
        caller: Option<&str>,
    ) -> Result<(VersionId, Arm)> {
        let tests = self.tests.read().await;
        let test = tests
            .get(test_id)
            .ok_or_else(|| ModelOpsError::NotFound(format!("Test {} not found", test_id)))?;

        if test.status != TestStatus::Active {
            return Err(ModelOpsError::InvalidState(format!(
                "test {} is not active",
                test_id
            )));
        }

        let treatment = match caller {
            Some(identity) => sticky_bucket(test_id, identity) < test.traffic_fraction * 100.0,
            None => rand::thread_rng().gen::<f64>() < test.traffic_fraction,
        };

        let (stats, arm) = if treatment {
            (&test.treatment, Arm::Treatment)
        } else {
            (&test.control, Arm::Control)
        };
        Ok((stats.version_id.clone(), arm))
    }

    /// Record one outcome on an arm.
    pub async fn record_outcome(
        &self,
        test_id: &str,
        arm: Arm,
        prediction: f64,
        ground_truth: Option<f64>,
        metrics: Option<&HashMap<String, f64>>,
    ) -> Result<()> {
        let mut tests = self.tests.write().await;
        let test = tests
            .get_mut(test_id)
            .ok_or_else(|| ModelOpsError::NotFound(format!("Test {} not found", test_id)))?;

        if test.status != TestStatus::Active {
            return Err(ModelOpsError::InvalidState(format!(
                "test {} is not active",
                test_id
            )));
        }

        let stats = match arm {
            Arm::Control => &mut test.control,
            Arm::Treatment => &mut test.treatment,
        };
        stats.predictions += 1;
        if let Some(truth) = ground_truth {
            if (prediction >= 0.5) == (truth >= 0.5) {
                stats.correct += 1;
            }
        }
        if let Some(metrics) = metrics {
            for (name, value) in metrics {
                stats
                    .metric_samples
                    .entry(name.clone())
                    .or_default()
                    .push(*value);
            }
        }

        self.maybe_alert_imbalance(test).await;
        Ok(())
    }

    /// Compare the two arms.
    ///
    /// Below the minimum per-arm sample count the comparison is reported
    /// without a significance verdict.
    pub async fn results(&self, test_id: &str) -> Result<TestComparison> {
        let tests = self.tests.read().await;
        let test = tests
            .get(test_id)
            .ok_or_else(|| ModelOpsError::NotFound(format!("Test {} not found", test_id)))?;

        Ok(self.compare(test))
    }

    /// Stop an experiment, optionally declaring a winner.
    ///
    /// A declared winner is promoted to production through the version
    /// registry and the losing arm is archived.
    pub async fn stop_test(&self, test_id: &str, winner: Option<Arm>) -> Result<AbTest> {
        let (winner_version, loser_version) = {
            let mut tests = self.tests.write().await;
            let test = tests
                .get_mut(test_id)
                .ok_or_else(|| ModelOpsError::NotFound(format!("Test {} not found", test_id)))?;

            if test.status != TestStatus::Active {
                return Err(ModelOpsError::InvalidState(format!(
                    "test {} is already completed",
                    test_id
                )));
            }

            test.status = TestStatus::Completed;
            test.completed_at = Some(Utc::now());
            test.winner = winner;

            match winner {
                Some(Arm::Control) => (
                    Some(test.control.version_id.clone()),
                    test.treatment.version_id.clone(),
                ),
                Some(Arm::Treatment) => (
                    Some(test.treatment.version_id.clone()),
                    test.control.version_id.clone(),
                ),
                None => (None, String::new()),
            }
        };

        if let Some(winner_id) = winner_version {
            let winning = self
                .registry
                .version(&winner_id)
                .await
                .ok_or_else(|| ModelOpsError::NotFound(format!("Version {} not found", winner_id)))?;

            if winning.status != VersionStatus::Production {
                self.registry.promote_to_production(&winner_id).await?;
            }

            // Promotion archives a losing production arm; a losing
            // staging/development arm still needs archiving.
            if let Some(loser) = self.registry.version(&loser_version).await {
                if !matches!(
                    loser.status,
                    VersionStatus::Archived | VersionStatus::RolledBack
                ) {
                    self.registry.archive_version(&loser_version).await?;
                }
            }

            info!(
                test_id,
                winner = %winner_id,
                "A/B test stopped with winner promoted"
            );
        } else {
            info!(test_id, "A/B test stopped without a winner");
        }

        let tests = self.tests.read().await;
        tests
            .get(test_id)
            .cloned()
            .ok_or_else(|| ModelOpsError::NotFound(format!("Test {} not found", test_id)))
    }

    /// Fetch one experiment.
    pub async fn test(&self, test_id: &str) -> Option<AbTest> {
        self.tests.read().await.get(test_id).cloned()
    }

    /// All experiments, newest first.
    pub async fn list_tests(&self) -> Vec<AbTest> {
        let mut tests: Vec<AbTest> = self.tests.read().await.values().cloned().collect();
        tests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tests
    }

    fn compare(&self, test: &AbTest) -> TestComparison {
        let control_accuracy = test.control.accuracy();
        let treatment_accuracy = test.treatment.accuracy();

        let min = self.config.min_samples_per_arm;
        let (statistic, p_value, significant) =
            if test.control.predictions >= min && test.treatment.predictions >= min {
                let result = chi_square_2x2(
                    test.control.correct,
                    test.control.predictions,
                    test.treatment.correct,
                    test.treatment.predictions,
                );
                (
                    Some(result.statistic),
                    Some(result.p_value),
                    Some(result.p_value < self.config.significance_level),
                )
            } else {
                (None, None, None)
            };

        let metric_mean = |stats: &ArmStats| {
            stats
                .metric_samples
                .get(&test.target_metric)
                .filter(|samples| !samples.is_empty())
                .map(|samples| crate::stats::mean(samples))
        };

        TestComparison {
            test_id: test.test_id.clone(),
            status: test.status,
            control_accuracy,
            treatment_accuracy,
            improvement: treatment_accuracy - control_accuracy,
            control_samples: test.control.predictions,
            treatment_samples: test.treatment.predictions,
            statistic,
            p_value,
            significant,
            control_metric_mean: metric_mean(&test.control),
            treatment_metric_mean: metric_mean(&test.treatment),
        }
    }

    /// Raise one alert per test if the treatment arm turns out
    /// significantly worse than control.
    async fn maybe_alert_imbalance(&self, test: &mut AbTest) {
        if test.imbalance_alerted {
            return;
        }

        let comparison = self.compare(test);
        if comparison.significant == Some(true) && comparison.improvement < 0.0 {
            test.imbalance_alerted = true;
            warn!(
                test_id = %test.test_id,
                improvement = comparison.improvement,
                "Treatment arm significantly worse than control"
            );
            self.alerts
                .emit(
                    test.treatment.version_id.clone(),
                    AlertCategory::ExperimentImbalance,
                    AlertSeverity::Warning,
                    format!(
                        "treatment arm of test '{}' is significantly worse than control ({:+.3} accuracy)",
                        test.label, comparison.improvement
                    ),
                )
                .await;
        }
    }
}

/// Map a caller identity to a stable value in [0, 100).
fn sticky_bucket(test_id: &str, caller: &str) -> f64 {
    let mut hasher = DefaultHasher::new();
    test_id.hash(&mut hasher);
    caller.hash(&mut hasher);
    (hasher.finish() % 10_000) as f64 / 100.0
}
