//! Version registry: immutable model snapshots and promotion state.
//!
//! Tracks semantically-versioned snapshots of each model family and owns
//! every production-state transition. Exactly one version per model id may
//! hold *production* status at a time; that invariant is enforced here,
//! under a per-model promotion lock, never by callers. Versions are never
//! deleted; superseded versions are archived so audit history survives
//! rollbacks.

use crate::error::{ModelOpsError, Result};
use crate::store::ModelStore;
use crate::types::{ModelId, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Lifecycle status of a model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionStatus {
    /// Created but not yet deployed anywhere.
    Development,
    /// Deployed behind an experiment, awaiting a promotion decision.
    Staging,
    /// Currently serving production traffic.
    Production,
    /// Superseded by a later promotion.
    Archived,
    /// Removed from production by a rollback.
    RolledBack,
}

impl VersionStatus {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Development => "development",
            VersionStatus::Staging => "staging",
            VersionStatus::Production => "production",
            VersionStatus::Archived => "archived",
            VersionStatus::RolledBack => "rolled_back",
        }
    }
}

/// One immutable trained snapshot of a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    /// Version id.
    pub version_id: VersionId,
    /// Model family this version belongs to.
    pub model_id: ModelId,
    /// Semantic version string (major.minor.patch).
    pub semantic_version: String,
    /// Where the trained artifact lives.
    pub artifact_location: String,
    /// Metric snapshot captured at training time.
    pub metrics: HashMap<String, f64>,
    /// When the artifact was trained.
    pub trained_at: DateTime<Utc>,
    /// When the version was last promoted to production.
    pub deployed_at: Option<DateTime<Utc>>,
    /// Lifecycle status.
    pub status: VersionStatus,
    /// Version this one was trained to replace.
    pub parent_version: Option<VersionId>,
    /// Free-text description of what changed.
    pub changelog: Option<String>,
}

/// Inputs for registering a new version.
#[derive(Debug, Clone, Default)]
pub struct NewVersion {
    pub model_id: ModelId,
    pub artifact_location: String,
    pub metrics: HashMap<String, f64>,
    /// Explicit semantic version; the patch component is auto-incremented
    /// from the latest version when omitted.
    pub semantic_version: Option<String>,
    pub parent_version: Option<VersionId>,
    pub changelog: Option<String>,
}

/// Registry of model versions with promotion/rollback state.
pub struct VersionRegistry {
    versions: RwLock<HashMap<VersionId, ModelVersion>>,
    /// Creation order per model family, for history walks.
    order: RwLock<HashMap<ModelId, Vec<VersionId>>>,
    /// Per-model promotion locks; promotions for different families do not
    /// serialize against each other.
    locks: Mutex<HashMap<ModelId, Arc<Mutex<()>>>>,
    store: Arc<dyn ModelStore>,
}

impl VersionRegistry {
    /// Create a registry backed by the given durable model store.
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
            order: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            store,
        }
    }

    async fn promotion_lock(&self, model_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Register a new version in *development* status.
    pub async fn create_version(&self, new: NewVersion) -> Result<ModelVersion> {
        if new.model_id.is_empty() {
            return Err(ModelOpsError::InvalidArgument(
                "model_id must not be empty".into(),
            ));
        }
        if new.artifact_location.is_empty() {
            return Err(ModelOpsError::InvalidArgument(
                "artifact_location must not be empty".into(),
            ));
        }

        let semantic_version = match new.semantic_version {
            Some(v) => {
                parse_semver(&v).ok_or_else(|| {
                    ModelOpsError::InvalidArgument(format!("invalid semantic version: {}", v))
                })?;
                v
            }
            None => {
                let latest = self.latest_semver(&new.model_id).await;
                next_patch(latest.as_deref())
            }
        };

        let version = ModelVersion {
            version_id: uuid::Uuid::new_v4().to_string(),
            model_id: new.model_id.clone(),
            semantic_version,
            artifact_location: new.artifact_location,
            metrics: new.metrics,
            trained_at: Utc::now(),
            deployed_at: None,
            status: VersionStatus::Development,
            parent_version: new.parent_version,
            changelog: new.changelog,
        };

        info!(
            model_id = %version.model_id,
            version_id = %version.version_id,
            semantic_version = %version.semantic_version,
            "Created model version"
        );

        self.versions
            .write()
            .await
            .insert(version.version_id.clone(), version.clone());
        self.order
            .write()
            .await
            .entry(new.model_id)
            .or_default()
            .push(version.version_id.clone());

        Ok(version)
    }

    /// Fetch one version.
    pub async fn version(&self, version_id: &str) -> Option<ModelVersion> {
        self.versions.read().await.get(version_id).cloned()
    }

    /// All versions of a model family, in creation order.
    pub async fn versions(&self, model_id: &str) -> Vec<ModelVersion> {
        let order = self.order.read().await;
        let ids = match order.get(model_id) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        drop(order);

        let versions = self.versions.read().await;
        ids.iter()
            .filter_map(|id| versions.get(id).cloned())
            .collect()
    }

    /// The version currently serving production for a model family.
    pub async fn production_version(&self, model_id: &str) -> Option<ModelVersion> {
        self.versions
            .read()
            .await
            .values()
            .find(|v| v.model_id == model_id && v.status == VersionStatus::Production)
            .cloned()
    }

    /// Move a development version to *staging* (deployed behind an
    /// experiment, awaiting a promotion decision).
    pub async fn mark_staging(&self, version_id: &str) -> Result<()> {
        let mut versions = self.versions.write().await;
        let version = versions
            .get_mut(version_id)
            .ok_or_else(|| ModelOpsError::NotFound(format!("Version {} not found", version_id)))?;

        if version.status != VersionStatus::Development {
            return Err(ModelOpsError::InvalidState(format!(
                "version {} is {}, expected development",
                version_id,
                version.status.as_str()
            )));
        }

        version.status = VersionStatus::Staging;
        Ok(())
    }

    /// Promote a version to production.
    ///
    /// Archives the current production version for the same model family
    /// (if any), then stamps the target as production. Atomic with respect
    /// to concurrent promotions for the same family.
    pub async fn promote_to_production(&self, version_id: &str) -> Result<ModelVersion> {
        let model_id = self
            .version(version_id)
            .await
            .ok_or_else(|| ModelOpsError::NotFound(format!("Version {} not found", version_id)))?
            .model_id;

        let lock = self.promotion_lock(&model_id).await;
        let _guard = lock.lock().await;

        let promoted = {
            let mut versions = self.versions.write().await;

            // Re-check under the lock; a concurrent promotion may have won.
            if versions
                .get(version_id)
                .map(|v| v.status == VersionStatus::Production)
                .unwrap_or(false)
            {
                return Err(ModelOpsError::InvalidState(format!(
                    "version {} is already production",
                    version_id
                )));
            }

            let previous = versions
                .values()
                .find(|v| v.model_id == model_id && v.status == VersionStatus::Production)
                .map(|v| v.version_id.clone());

            if let Some(prev_id) = previous {
                if let Some(prev) = versions.get_mut(&prev_id) {
                    prev.status = VersionStatus::Archived;
                    info!(
                        model_id = %model_id,
                        version_id = %prev_id,
                        semantic_version = %prev.semantic_version,
                        "Archived previous production version"
                    );
                }
            }

            let target = versions.get_mut(version_id).ok_or_else(|| {
                ModelOpsError::NotFound(format!("Version {} not found", version_id))
            })?;
            target.status = VersionStatus::Production;
            target.deployed_at = Some(Utc::now());
            target.clone()
        };

        self.sync_store(&promoted).await?;

        info!(
            model_id = %promoted.model_id,
            version_id = %promoted.version_id,
            semantic_version = %promoted.semantic_version,
            "Promoted version to production"
        );

        Ok(promoted)
    }

    /// Demote the current production version and promote the named target.
    ///
    /// Used by explicit rollback to a chosen version; the demoted version
    /// is marked *rolled_back*, not archived.
    pub async fn rollback_to_version(&self, version_id: &str) -> Result<ModelVersion> {
        let model_id = self
            .version(version_id)
            .await
            .ok_or_else(|| ModelOpsError::NotFound(format!("Version {} not found", version_id)))?
            .model_id;

        let lock = self.promotion_lock(&model_id).await;
        let _guard = lock.lock().await;

        let restored = {
            let mut versions = self.versions.write().await;

            let current = versions
                .values()
                .find(|v| v.model_id == model_id && v.status == VersionStatus::Production)
                .map(|v| v.version_id.clone());

            if current.as_deref() == Some(version_id) {
                return Err(ModelOpsError::InvalidState(format!(
                    "version {} is already production",
                    version_id
                )));
            }

            if let Some(current_id) = current {
                if let Some(cur) = versions.get_mut(&current_id) {
                    cur.status = VersionStatus::RolledBack;
                    warn!(
                        model_id = %model_id,
                        version_id = %current_id,
                        "Rolled back production version"
                    );
                }
            }

            let target = versions.get_mut(version_id).ok_or_else(|| {
                ModelOpsError::NotFound(format!("Version {} not found", version_id))
            })?;
            target.status = VersionStatus::Production;
            target.deployed_at = Some(Utc::now());
            target.clone()
        };

        self.sync_store(&restored).await?;

        info!(
            model_id = %restored.model_id,
            version_id = %restored.version_id,
            semantic_version = %restored.semantic_version,
            "Restored version to production"
        );

        Ok(restored)
    }

    /// Archive a non-production version (e.g. the losing arm of a
    /// concluded experiment). Archiving the production version directly is
    /// refused; promotion and rollback own that transition.
    pub async fn archive_version(&self, version_id: &str) -> Result<()> {
        let mut versions = self.versions.write().await;
        let version = versions
            .get_mut(version_id)
            .ok_or_else(|| ModelOpsError::NotFound(format!("Version {} not found", version_id)))?;

        if version.status == VersionStatus::Production {
            return Err(ModelOpsError::InvalidState(format!(
                "version {} is production; demote via rollback instead",
                version_id
            )));
        }

        version.status = VersionStatus::Archived;
        info!(
            model_id = %version.model_id,
            version_id,
            "Archived version"
        );
        Ok(())
    }

    /// Roll a model family back to its most recently archived version.
    ///
    /// Walks the version history backward from the current production
    /// version. Failing to find an archived predecessor is an explicit
    /// error, not a silent no-op.
    pub async fn rollback_to_previous(&self, model_id: &str) -> Result<ModelVersion> {
        let current = self
            .production_version(model_id)
            .await
            .ok_or_else(|| {
                ModelOpsError::NotFound(format!("No production version for model {}", model_id))
            })?;

        let target = {
            let order = self.order.read().await;
            let ids = order.get(model_id).cloned().unwrap_or_default();
            drop(order);

            let versions = self.versions.read().await;
            let current_pos = ids
                .iter()
                .position(|id| *id == current.version_id)
                .unwrap_or(ids.len());

            ids[..current_pos]
                .iter()
                .rev()
                .filter_map(|id| versions.get(id))
                .find(|v| v.status == VersionStatus::Archived)
                .map(|v| v.version_id.clone())
        };

        let target_id =
            target.ok_or_else(|| ModelOpsError::NoRollbackTarget(model_id.to_string()))?;

        self.rollback_to_version(&target_id).await
    }

    /// Mirror a promotion into the durable model store.
    async fn sync_store(&self, version: &ModelVersion) -> Result<()> {
        if let Some(mut info) = self.store.get(&version.model_id).await? {
            info.artifact_location = version.artifact_location.clone();
            info.metrics = version.metrics.clone();
            self.store.put(info).await?;
            self.store.set_production(&version.model_id).await?;
        }
        Ok(())
    }

    async fn latest_semver(&self, model_id: &str) -> Option<String> {
        let order = self.order.read().await;
        let last = order.get(model_id)?.last()?.clone();
        drop(order);
        self.versions
            .read()
            .await
            .get(&last)
            .map(|v| v.semantic_version.clone())
    }
}

fn parse_semver(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

fn next_patch(previous: Option<&str>) -> String {
    match previous.and_then(parse_semver) {
        Some((major, minor, patch)) => format!("{}.{}.{}", major, minor, patch + 1),
        None => "1.0.0".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryModelStore;

    fn registry() -> VersionRegistry {
        VersionRegistry::new(Arc::new(InMemoryModelStore::new()))
    }

    fn new_version(model_id: &str, artifact: &str) -> NewVersion {
        NewVersion {
            model_id: model_id.to_string(),
            artifact_location: artifact.to_string(),
            metrics: HashMap::from([("accuracy".to_string(), 0.9)]),
            ..Default::default()
        }
    }

    #[test]
    fn test_semver_parsing() {
        assert_eq!(parse_semver("1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse_semver("1.2"), None);
        assert_eq!(parse_semver("1.2.3.4"), None);
        assert_eq!(parse_semver("a.b.c"), None);

        assert_eq!(next_patch(None), "1.0.0");
        assert_eq!(next_patch(Some("1.0.0")), "1.0.1");
        assert_eq!(next_patch(Some("2.3.9")), "2.3.10");
    }

    #[tokio::test]
    async fn test_patch_auto_increment() {
        let registry = registry();

        let v1 = registry
            .create_version(new_version("m1", "models/m1/a"))
            .await
            .unwrap();
        assert_eq!(v1.semantic_version, "1.0.0");
        assert_eq!(v1.status, VersionStatus::Development);

        let v2 = registry
            .create_version(new_version("m1", "models/m1/b"))
            .await
            .unwrap();
        assert_eq!(v2.semantic_version, "1.0.1");
    }

    #[tokio::test]
    async fn test_promotion_cycle_and_rollback() {
        let registry = registry();

        let v1 = registry
            .create_version(new_version("m1", "models/m1/a"))
            .await
            .unwrap();
        registry.promote_to_production(&v1.version_id).await.unwrap();

        let v2 = registry
            .create_version(new_version("m1", "models/m1/b"))
            .await
            .unwrap();
        assert_eq!(v2.semantic_version, "1.0.1");
        registry.promote_to_production(&v2.version_id).await.unwrap();

        // v1 archived, v2 production.
        assert_eq!(
            registry.version(&v1.version_id).await.unwrap().status,
            VersionStatus::Archived
        );
        let production = registry.production_version("m1").await.unwrap();
        assert_eq!(production.version_id, v2.version_id);
        assert!(production.deployed_at.is_some());

        // Roll back restores v1 and marks v2 rolled_back.
        let restored = registry.rollback_to_previous("m1").await.unwrap();
        assert_eq!(restored.version_id, v1.version_id);
        assert_eq!(restored.status, VersionStatus::Production);
        assert_eq!(
            registry.version(&v2.version_id).await.unwrap().status,
            VersionStatus::RolledBack
        );
    }

    #[tokio::test]
    async fn test_second_rollback_reports_failure() {
        let registry = registry();

        let v1 = registry
            .create_version(new_version("m1", "models/m1/a"))
            .await
            .unwrap();
        registry.promote_to_production(&v1.version_id).await.unwrap();
        let v2 = registry
            .create_version(new_version("m1", "models/m1/b"))
            .await
            .unwrap();
        registry.promote_to_production(&v2.version_id).await.unwrap();

        registry.rollback_to_previous("m1").await.unwrap();

        // No archived predecessor remains; second rollback is a reported
        // failure, not a further rollback.
        let err = registry.rollback_to_previous("m1").await.unwrap_err();
        assert!(matches!(err, ModelOpsError::NoRollbackTarget(_)));
        assert_eq!(
            registry.production_version("m1").await.unwrap().version_id,
            v1.version_id
        );
    }

    #[tokio::test]
    async fn test_at_most_one_production_version() {
        let registry = registry();

        let mut ids = Vec::new();
        for i in 0..4 {
            let v = registry
                .create_version(new_version("m1", &format!("models/m1/{}", i)))
                .await
                .unwrap();
            ids.push(v.version_id);
        }

        for id in &ids {
            registry.promote_to_production(id).await.unwrap();
            let production: Vec<_> = registry
                .versions("m1")
                .await
                .into_iter()
                .filter(|v| v.status == VersionStatus::Production)
                .collect();
            assert_eq!(production.len(), 1);
            assert_eq!(&production[0].version_id, id);
        }
    }

    #[tokio::test]
    async fn test_promote_missing_version_fails() {
        let registry = registry();
        let err = registry.promote_to_production("missing").await.unwrap_err();
        assert!(matches!(err, ModelOpsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_independent_families_do_not_interfere() {
        let registry = registry();

        let a = registry
            .create_version(new_version("m1", "models/m1/a"))
            .await
            .unwrap();
        let b = registry
            .create_version(new_version("m2", "models/m2/a"))
            .await
            .unwrap();

        registry.promote_to_production(&a.version_id).await.unwrap();
        registry.promote_to_production(&b.version_id).await.unwrap();

        assert!(registry.production_version("m1").await.is_some());
        assert!(registry.production_version("m2").await.is_some());
        assert_eq!(b.semantic_version, "1.0.0");
    }

    #[tokio::test]
    async fn test_promotion_syncs_store() {
        let store = Arc::new(InMemoryModelStore::new());
        let registry = VersionRegistry::new(store.clone());

        store
            .put(crate::types::ModelInfo {
                model_id: "m1".into(),
                model_type: "gradient_boosting".into(),
                artifact_location: "models/m1/old".into(),
                metrics: HashMap::new(),
                feature_names: vec![],
                baseline_stats: HashMap::new(),
                is_production: false,
                trained_at: Utc::now(),
            })
            .await
            .unwrap();

        let v = registry
            .create_version(new_version("m1", "models/m1/new"))
            .await
            .unwrap();
        registry.promote_to_production(&v.version_id).await.unwrap();

        let info = store.get("m1").await.unwrap().unwrap();
        assert!(info.is_production);
        assert_eq!(info.artifact_location, "models/m1/new");
    }
}
