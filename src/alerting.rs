//! Alerting for monitoring findings and experiment imbalances.
//!
//! Alerts are generated from detected drift/decay findings and from
//! pipeline or experiment problems; they are never mutated except to be
//! marked resolved, and they never block the read paths that surface
//! them.

use crate::error::{ModelOpsError, Result};
use crate::types::{AlertId, ModelId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    /// Informational, no action required.
    Info,
    /// Should be investigated.
    Warning,
    /// Requires immediate attention.
    Critical,
}

impl AlertSeverity {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// What kind of problem an alert describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertCategory {
    /// Input feature distribution shifted versus training baseline.
    DataDrift,
    /// Accuracy/F1 dropped versus training baseline.
    ModelDecay,
    /// A/B experiment arms are imbalanced or degraded.
    ExperimentImbalance,
    /// Pipeline run failure.
    Pipeline,
}

impl AlertCategory {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::DataDrift => "data_drift",
            AlertCategory::ModelDecay => "model_decay",
            AlertCategory::ExperimentImbalance => "experiment_imbalance",
            AlertCategory::Pipeline => "pipeline",
        }
    }
}

/// A user-facing notification about a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id.
    pub id: AlertId,
    /// Model the alert concerns.
    pub model_id: ModelId,
    /// Kind of problem.
    pub category: AlertCategory,
    /// Severity level.
    pub severity: AlertSeverity,
    /// Human-readable description.
    pub message: String,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
    /// Whether the alert has been acknowledged and resolved.
    pub resolved: bool,
}

/// Collects alerts, keeps a bounded history, and logs each emission.
pub struct AlertCenter {
    alerts: RwLock<Vec<Alert>>,
    max_history: usize,
}

impl AlertCenter {
    /// Create an alert center retaining at most `max_history` alerts.
    pub fn new(max_history: usize) -> Self {
        Self {
            alerts: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Raise a new alert. Returns the alert id.
    pub async fn emit(
        &self,
        model_id: impl Into<ModelId>,
        category: AlertCategory,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> AlertId {
        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            model_id: model_id.into(),
            category,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            resolved: false,
        };

        match severity {
            AlertSeverity::Info => info!(
                model_id = %alert.model_id,
                category = category.as_str(),
                message = %alert.message,
                "Alert raised"
            ),
            AlertSeverity::Warning | AlertSeverity::Critical => warn!(
                model_id = %alert.model_id,
                category = category.as_str(),
                severity = severity.as_str(),
                message = %alert.message,
                "Alert raised"
            ),
        }

        let id = alert.id.clone();
        let mut alerts = self.alerts.write().await;
        alerts.push(alert);
        if alerts.len() > self.max_history {
            let excess = alerts.len() - self.max_history;
            alerts.drain(..excess);
        }

        id
    }

    /// All unresolved alerts, newest first.
    pub async fn active(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .alerts
            .read()
            .await
            .iter()
            .filter(|a| !a.resolved)
            .cloned()
            .collect();
        active.reverse();
        active
    }

    /// All alerts for a model, newest first.
    pub async fn for_model(&self, model_id: &str) -> Vec<Alert> {
        let mut matched: Vec<Alert> = self
            .alerts
            .read()
            .await
            .iter()
            .filter(|a| a.model_id == model_id)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    /// Mark an alert resolved.
    pub async fn resolve(&self, alert_id: &str) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| ModelOpsError::NotFound(format!("Alert {} not found", alert_id)))?;

        alert.resolved = true;
        info!(alert_id, model_id = %alert.model_id, "Alert resolved");
        Ok(())
    }
}

impl Default for AlertCenter {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_resolve() {
        let center = AlertCenter::new(10);

        let id = center
            .emit("m1", AlertCategory::DataDrift, AlertSeverity::Warning, "age drifted")
            .await;

        let active = center.active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].category, AlertCategory::DataDrift);

        center.resolve(&id).await.unwrap();
        assert!(center.active().await.is_empty());

        // Resolved alerts stay visible in the per-model view.
        let history = center.for_model("m1").await;
        assert_eq!(history.len(), 1);
        assert!(history[0].resolved);
    }

    #[tokio::test]
    async fn test_resolve_unknown_alert_fails() {
        let center = AlertCenter::new(10);
        assert!(center.resolve("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let center = AlertCenter::new(3);
        for i in 0..5 {
            center
                .emit(
                    "m1",
                    AlertCategory::ModelDecay,
                    AlertSeverity::Info,
                    format!("event {}", i),
                )
                .await;
        }

        let history = center.for_model("m1").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].message, "event 4");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::Warning);
        assert!(AlertSeverity::Warning > AlertSeverity::Info);
    }
}
