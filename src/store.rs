//! Durable-store seams consumed by the lifecycle core.
//!
//! The model registry and the prediction log are external collaborators;
//! this module specifies them at the interface boundary and ships
//! in-memory reference implementations suitable for embedding and tests.
//! The registry is the source of truth for which artifact currently
//! serves production; the prediction log is append-only with
//! bounded-recency reads.

use crate::error::Result;
use crate::types::{ModelId, ModelInfo, PredictionRecord};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Durable store of model descriptors, keyed by model id.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Fetch the descriptor for a model family, if registered.
    async fn get(&self, model_id: &str) -> Result<Option<ModelInfo>>;

    /// Register or replace the descriptor for a model family.
    async fn put(&self, info: ModelInfo) -> Result<ModelId>;

    /// Mark a model family's current artifact as production.
    async fn set_production(&self, model_id: &str) -> Result<()>;
}

/// Append-only store of per-prediction records with bounded-recency reads.
#[async_trait]
pub trait PredictionLog: Send + Sync {
    /// Append one prediction record.
    async fn log(&self, record: PredictionRecord) -> Result<()>;

    /// Fetch up to `limit` of the most recent records for a model,
    /// oldest first.
    async fn recent(&self, model_id: &str, limit: usize) -> Result<Vec<PredictionRecord>>;
}

/// In-memory [`ModelStore`] implementation.
#[derive(Default)]
pub struct InMemoryModelStore {
    models: RwLock<HashMap<ModelId, ModelInfo>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn get(&self, model_id: &str) -> Result<Option<ModelInfo>> {
        Ok(self.models.read().await.get(model_id).cloned())
    }

    async fn put(&self, info: ModelInfo) -> Result<ModelId> {
        let id = info.model_id.clone();
        self.models.write().await.insert(id.clone(), info);
        Ok(id)
    }

    async fn set_production(&self, model_id: &str) -> Result<()> {
        let mut models = self.models.write().await;
        if let Some(info) = models.get_mut(model_id) {
            info.is_production = true;
        }
        Ok(())
    }
}

/// In-memory [`PredictionLog`] keeping a bounded window per model.
pub struct InMemoryPredictionLog {
    records: RwLock<HashMap<ModelId, VecDeque<PredictionRecord>>>,
    capacity: usize,
}

impl InMemoryPredictionLog {
    /// Create a log retaining at most `capacity` records per model.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            capacity,
        }
    }
}

#[async_trait]
impl PredictionLog for InMemoryPredictionLog {
    async fn log(&self, record: PredictionRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let window = records.entry(record.model_id.clone()).or_default();
        window.push_back(record);
        while window.len() > self.capacity {
            window.pop_front();
        }
        Ok(())
    }

    async fn recent(&self, model_id: &str, limit: usize) -> Result<Vec<PredictionRecord>> {
        let records = self.records.read().await;
        let window = match records.get(model_id) {
            Some(w) => w,
            None => return Ok(Vec::new()),
        };

        let skip = window.len().saturating_sub(limit);
        Ok(window.iter().skip(skip).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_info(model_id: &str) -> ModelInfo {
        ModelInfo {
            model_id: model_id.to_string(),
            model_type: "gradient_boosting".into(),
            artifact_location: format!("models/{}/artifact", model_id),
            metrics: HashMap::from([("accuracy".to_string(), 0.9)]),
            feature_names: vec!["age".into()],
            baseline_stats: HashMap::new(),
            is_production: false,
            trained_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_model_store_roundtrip() {
        let store = InMemoryModelStore::new();
        assert!(store.get("m1").await.unwrap().is_none());

        store.put(sample_info("m1")).await.unwrap();
        let info = store.get("m1").await.unwrap().unwrap();
        assert!(!info.is_production);

        store.set_production("m1").await.unwrap();
        let info = store.get("m1").await.unwrap().unwrap();
        assert!(info.is_production);
    }

    #[tokio::test]
    async fn test_prediction_log_bounded_window() {
        let log = InMemoryPredictionLog::new(5);

        for i in 0..10 {
            log.log(PredictionRecord::new("m1", HashMap::new(), i as f64))
                .await
                .unwrap();
        }

        let recent = log.recent("m1", 100).await.unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].prediction, 5.0);
        assert_eq!(recent[4].prediction, 9.0);

        let last_two = log.recent("m1", 2).await.unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].prediction, 9.0);
    }

    #[tokio::test]
    async fn test_prediction_log_unknown_model() {
        let log = InMemoryPredictionLog::new(5);
        assert!(log.recent("missing", 10).await.unwrap().is_empty());
    }
}
