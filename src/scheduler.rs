//! Background lifecycle scheduler.
//!
//! One async loop drives the whole system unattended: a *check* tick
//! runs the retrain trigger engine for every armed model that has
//! accumulated enough recent predictions, and a less frequent *sweep*
//! tick checks every armed model regardless of cache fill, so a model
//! whose traffic dried up still gets its staleness evaluated. The loop
//! exits cleanly on a shutdown broadcast; any in-flight pipeline runs
//! it spawned keep running to completion.

use crate::monitor::LifecycleMonitor;
use crate::trigger::RetrainTriggerEngine;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;

/// Periodically evaluates retrain conditions for armed models.
pub struct LifecycleScheduler {
    config: SchedulerConfig,
    monitor: Arc<LifecycleMonitor>,
    engine: Arc<RetrainTriggerEngine>,
    checks_run: AtomicU64,
    sweeps_run: AtomicU64,
}

impl LifecycleScheduler {
    pub fn new(
        config: SchedulerConfig,
        monitor: Arc<LifecycleMonitor>,
        engine: Arc<RetrainTriggerEngine>,
    ) -> Self {
        Self {
            config,
            monitor,
            engine,
            checks_run: AtomicU64::new(0),
            sweeps_run: AtomicU64::new(0),
        }
    }

    /// Run the scheduler loop until a shutdown signal arrives.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            check_interval_secs = self.config.check_interval.as_secs(),
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            "Lifecycle scheduler started"
        );

        let mut check_tick = tokio::time::interval(self.config.check_interval);
        let mut sweep_tick = tokio::time::interval(self.config.sweep_interval);
        // The first interval tick fires immediately; skip both so the
        // loop starts quiet.
        check_tick.tick().await;
        sweep_tick.tick().await;

        loop {
            tokio::select! {
                _ = check_tick.tick() => {
                    self.check_cycle().await;
                }
                _ = sweep_tick.tick() => {
                    self.sweep_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("Lifecycle scheduler stopping");
                    break;
                }
            }
        }
    }

    /// Spawn the scheduler loop onto the runtime.
    pub fn start(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(scheduler.run(shutdown))
    }

    /// Check every armed model that has enough cached predictions for an
    /// evaluation to be meaningful.
    pub async fn check_cycle(&self) {
        let min = self.monitor.min_samples();
        for model_id in self.monitor.armed_models().await {
            if self.monitor.cached_samples(&model_id).await < min {
                debug!(model_id = %model_id, "Skipping check, cache below minimum");
                continue;
            }
            self.check_model(&model_id).await;
        }
        self.checks_run.fetch_add(1, Ordering::Relaxed);
    }

    /// Check every armed model unconditionally. Staleness does not need
    /// recent traffic to be detectable.
    pub async fn sweep_cycle(&self) {
        let armed = self.monitor.armed_models().await;
        info!(models = armed.len(), "Full lifecycle sweep");
        for model_id in armed {
            self.check_model(&model_id).await;
        }
        self.sweeps_run.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed check cycles since start.
    pub fn checks_run(&self) -> u64 {
        self.checks_run.load(Ordering::Relaxed)
    }

    /// Completed sweep cycles since start.
    pub fn sweeps_run(&self) -> u64 {
        self.sweeps_run.load(Ordering::Relaxed)
    }

    async fn check_model(&self, model_id: &str) {
        match self.engine.check_and_maybe_retrain(model_id).await {
            Ok(decision) if decision.triggered => {
                info!(
                    model_id,
                    run_id = decision.run_id.as_deref().unwrap_or(""),
                    "Scheduler triggered retraining"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(model_id, error = %e, "Trigger check failed"),
        }
    }
}
