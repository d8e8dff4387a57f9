//! Configuration for the modelops lifecycle core.
//!
//! Thresholds, minimum sample counts, and intervals are configuration with
//! documented defaults, not hardcoded constants. Invalid values are fatal
//! at construction time: [`ModelOpsConfig::validate`] is called by
//! `from_file` and by the component constructors, never deferred to the
//! evaluation paths.

use crate::error::{ModelOpsError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the lifecycle core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOpsConfig {
    /// Drift & decay monitor configuration.
    pub monitor: MonitorConfig,
    /// Pipeline orchestrator configuration.
    pub pipeline: PipelineConfig,
    /// A/B test manager configuration.
    pub abtest: AbTestConfig,
    /// Retrain trigger engine configuration.
    pub trigger: TriggerConfig,
    /// Background scheduler configuration.
    pub scheduler: SchedulerConfig,
}

impl ModelOpsConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ModelOpsError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ModelOpsError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.drift_threshold <= 0.0 || self.monitor.drift_threshold >= 1.0 {
            return Err(ModelOpsError::InvalidConfig {
                field: "monitor.drift_threshold".to_string(),
                reason: "must be in (0, 1)".to_string(),
            });
        }

        if self.monitor.decay_threshold <= 0.0 || self.monitor.decay_threshold >= 1.0 {
            return Err(ModelOpsError::InvalidConfig {
                field: "monitor.decay_threshold".to_string(),
                reason: "must be in (0, 1)".to_string(),
            });
        }

        if self.monitor.min_samples == 0 {
            return Err(ModelOpsError::InvalidConfig {
                field: "monitor.min_samples".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }

        if self.monitor.cache_capacity < self.monitor.min_samples {
            return Err(ModelOpsError::InvalidConfig {
                field: "monitor.cache_capacity".to_string(),
                reason: "must be at least monitor.min_samples".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.pipeline.canary_fraction) {
            return Err(ModelOpsError::InvalidConfig {
                field: "pipeline.canary_fraction".to_string(),
                reason: "must be in [0, 1]".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.pipeline.min_accuracy) {
            return Err(ModelOpsError::InvalidConfig {
                field: "pipeline.min_accuracy".to_string(),
                reason: "must be in [0, 1]".to_string(),
            });
        }

        if self.abtest.min_samples_per_arm == 0 {
            return Err(ModelOpsError::InvalidConfig {
                field: "abtest.min_samples_per_arm".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }

        if self.abtest.significance_level <= 0.0 || self.abtest.significance_level >= 1.0 {
            return Err(ModelOpsError::InvalidConfig {
                field: "abtest.significance_level".to_string(),
                reason: "must be in (0, 1)".to_string(),
            });
        }

        if self.trigger.retrain_interval_days == 0 {
            return Err(ModelOpsError::InvalidConfig {
                field: "trigger.retrain_interval_days".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }

        if self.pipeline.stage_timeout.is_zero() {
            return Err(ModelOpsError::InvalidConfig {
                field: "pipeline.stage_timeout".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }

        // tokio::time::interval panics on a zero period; reject it here
        // where configuration errors are fatal.
        if self.scheduler.check_interval.is_zero() {
            return Err(ModelOpsError::InvalidConfig {
                field: "scheduler.check_interval".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }

        if self.scheduler.sweep_interval.is_zero() {
            return Err(ModelOpsError::InvalidConfig {
                field: "scheduler.sweep_interval".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration for the drift & decay monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Minimum recent predictions required before an evaluation can run.
    pub min_samples: usize,
    /// Kolmogorov-Smirnov statistic above which a feature is flagged as drifted.
    pub drift_threshold: f64,
    /// Drop in accuracy or F1 versus baseline above which decay is flagged.
    pub decay_threshold: f64,
    /// Capacity of the per-model recent-prediction ring buffer.
    pub cache_capacity: usize,
    /// Findings retained per model for status queries.
    pub max_findings: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_samples: 100,
            drift_threshold: 0.1,
            decay_threshold: 0.05,
            cache_capacity: 1000,
            max_findings: 500,
        }
    }
}

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum accuracy the candidate must reach to pass the quality gate.
    pub min_accuracy: f64,
    /// Fraction of traffic routed to a candidate when a production version exists.
    pub canary_fraction: f64,
    /// Timeout applied to each external stage (training backend, tests).
    pub stage_timeout: Duration,
    /// Completed runs retained for history queries.
    pub max_run_history: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_accuracy: 0.7,
            canary_fraction: 0.1,
            stage_timeout: Duration::from_secs(600),
            max_run_history: 1000,
        }
    }
}

/// Configuration for the A/B test manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTestConfig {
    /// Samples required in each arm before a significance verdict is given.
    pub min_samples_per_arm: u64,
    /// p-value below which the arm difference is called significant.
    pub significance_level: f64,
}

impl Default for AbTestConfig {
    fn default() -> Self {
        Self {
            min_samples_per_arm: 30,
            significance_level: 0.05,
        }
    }
}

/// Configuration for the retrain trigger engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Days since last training after which a scheduled retrain fires.
    pub retrain_interval_days: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            retrain_interval_days: 30,
        }
    }
}

/// Configuration for the background scheduler loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between trigger-condition checks.
    pub check_interval: Duration,
    /// Interval between full sweeps over all armed models.
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(86400),
        }
    }
}
