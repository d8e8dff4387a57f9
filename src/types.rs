//! Core type definitions for the modelops lifecycle core.
//!
//! This module contains the fundamental data types shared across the
//! lifecycle components: model descriptors, prediction records, and the
//! baseline feature statistics that drift evaluation compares against.
//!
//! # Type Aliases
//!
//! Common identifiers are defined as type aliases for clarity:
//!
//! - [`ModelId`] = `String`: model family identifier
//! - [`VersionId`] = `String`: one immutable trained snapshot
//! - [`RunId`] = `String`: one pipeline execution
//! - [`TestId`] = `String`: one A/B experiment
//!
//! # Examples
//!
//! ```rust
//! use modelops::types::{FeatureStats, PredictionRecord};
//! use std::collections::HashMap;
//!
//! let baseline = FeatureStats { mean: 60.0, std_dev: 10.0 };
//! assert!(baseline.std_dev > 0.0);
//!
//! let record = PredictionRecord::new(
//!     "readmission-risk",
//!     HashMap::from([("age".to_string(), 72.0)]),
//!     1.0,
//! );
//! assert!(record.ground_truth.is_none());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model family identifier (e.g. "readmission-risk").
pub type ModelId = String;

/// Identifier of one immutable trained snapshot.
pub type VersionId = String;

/// Identifier of one pipeline execution.
pub type RunId = String;

/// Identifier of one A/B experiment.
pub type TestId = String;

/// Identifier of one alert.
pub type AlertId = String;

/// Training-time distribution statistics for a single feature.
///
/// Stored in the model registry when a model is trained and used as the
/// reference distribution when evaluating data drift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    /// Mean of the feature over the training set.
    pub mean: f64,
    /// Standard deviation of the feature over the training set.
    pub std_dev: f64,
}

/// Registry-level description of a trained model.
///
/// This is the durable source of truth for "which artifact serves this
/// model family", its evaluation metrics, and the feature baseline the
/// drift monitor compares production traffic against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model family identifier.
    pub model_id: ModelId,
    /// Model family/type label (e.g. "gradient_boosting").
    pub model_type: String,
    /// Where the trained artifact lives.
    pub artifact_location: String,
    /// Evaluation metrics captured at training time (accuracy, f1_score, ...).
    pub metrics: HashMap<String, f64>,
    /// Ordered feature names the model consumes.
    pub feature_names: Vec<String>,
    /// Per-feature baseline statistics from the training set.
    pub baseline_stats: HashMap<String, FeatureStats>,
    /// Whether this model currently serves production traffic.
    pub is_production: bool,
    /// When the artifact was trained.
    pub trained_at: DateTime<Utc>,
}

impl ModelInfo {
    /// Look up a named training-time metric.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// One logged production prediction.
///
/// Appended by prediction-recording calls and read back by the drift and
/// decay monitor over a bounded recency window. Ground truth arrives later
/// (if at all) and is attached at record time when known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Model that produced the prediction.
    pub model_id: ModelId,
    /// Input feature vector.
    pub features: HashMap<String, f64>,
    /// Predicted label/value.
    pub prediction: f64,
    /// Predicted probability, when the model exposes one.
    pub probability: Option<f64>,
    /// Observed outcome, when available.
    pub ground_truth: Option<f64>,
    /// When the prediction was served.
    pub timestamp: DateTime<Utc>,
}

impl PredictionRecord {
    /// Create a record for a prediction without ground truth.
    pub fn new(model_id: impl Into<ModelId>, features: HashMap<String, f64>, prediction: f64) -> Self {
        Self {
            model_id: model_id.into(),
            features,
            prediction,
            probability: None,
            ground_truth: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a predicted probability.
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    /// Attach an observed outcome.
    pub fn with_ground_truth(mut self, truth: f64) -> Self {
        self.ground_truth = Some(truth);
        self
    }

    /// Whether the record carries an observed outcome.
    pub fn is_labeled(&self) -> bool {
        self.ground_truth.is_some()
    }
}
