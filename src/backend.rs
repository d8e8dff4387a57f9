//! Training-backend seam.
//!
//! The numerical training algorithms are a black box behind this
//! interface: given a model family and a dataset handle, the backend
//! returns a trained artifact plus evaluation metrics and the baseline
//! feature statistics the drift monitor will compare against. Training
//! must be idempotent-safe to retry.

use crate::error::Result;
use crate::types::FeatureStats;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Handle to a prepared training dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetHandle {
    /// Where the dataset lives.
    pub uri: String,
    /// Number of records in the dataset.
    pub record_count: usize,
    /// Feature columns present in the dataset.
    pub feature_names: Vec<String>,
}

/// Result of one training invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOutcome {
    /// Where the trained artifact was stored.
    pub artifact_location: String,
    /// Evaluation metrics (accuracy, f1_score, ...).
    pub metrics: HashMap<String, f64>,
    /// Feature names the artifact consumes, in order.
    pub feature_names: Vec<String>,
    /// Per-feature training-set statistics for drift baselines.
    pub baseline_stats: HashMap<String, FeatureStats>,
}

/// Backend that prepares data and trains model artifacts.
///
/// Both operations are network/compute bound and may take minutes; the
/// orchestrator wraps them in per-stage timeouts. A failure here aborts
/// the pipeline run with the original cause preserved.
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    /// Collect and prepare the training dataset for a model family.
    async fn acquire_dataset(&self, model_type: &str) -> Result<DatasetHandle>;

    /// Train an artifact of the given family on the dataset.
    async fn train(
        &self,
        model_type: &str,
        dataset: &DatasetHandle,
        hyperparameters: Option<&HashMap<String, f64>>,
    ) -> Result<TrainingOutcome>;
}
