/// Background dataset refresh service
///
/// A repeated tokio-cron-scheduler job calls `tick` every few seconds. Each
/// tick rebuilds the datasets whose refresh interval has elapsed and starts
/// the workflows subscribed to those refreshes. Last-refresh times live only
/// in this service; a restart refreshes every scheduled dataset once.

use crate::{
    catalog::ConfigStore,
    datasets::DatasetBuilder,
    definitions::Dataset,
    error::{Error, Result},
    runtime::scheduler::Scheduler,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub refreshed: Vec<String>,
    /// Due, but a build of the same dataset was still running
    pub skipped_in_flight: Vec<String>,
    pub failed: Vec<String>,
    /// Run ids started by refresh subscriptions
    pub started_runs: Vec<String>,
}

/// Marks a dataset build as running until dropped
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    dataset_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        in_flight.remove(&self.dataset_id);
    }
}

pub struct RefreshTrigger {
    store: ConfigStore,
    builder: DatasetBuilder,
    scheduler: Arc<Scheduler>,
    tick_interval: Duration,
    last_refresh: Mutex<HashMap<String, DateTime<Utc>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    job_scheduler: RwLock<Option<JobScheduler>>,
}

impl RefreshTrigger {
    pub fn new(
        store: ConfigStore,
        builder: DatasetBuilder,
        scheduler: Arc<Scheduler>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            builder,
            scheduler,
            tick_interval,
            last_refresh: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            job_scheduler: RwLock::new(None),
        }
    }

    /// Register the repeated tick job and start the cron scheduler
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        tracing::info!(
            "⏰ Starting dataset refresh service (tick every {})",
            humantime::format_duration(self.tick_interval)
        );

        let scheduler = JobScheduler::new().await?;
        let trigger = Arc::downgrade(self);

        let job = Job::new_repeated_async(self.tick_interval, move |_uuid, _l| {
            let trigger = trigger.clone();
            Box::pin(async move {
                // Service dropped: nothing left to refresh
                let Some(trigger) = trigger.upgrade() else {
                    return;
                };
                let report = trigger.tick(Utc::now()).await;
                if !report.refreshed.is_empty() || !report.failed.is_empty() {
                    tracing::info!(
                        "🔄 Refresh tick: {} refreshed, {} failed, {} runs started",
                        report.refreshed.len(),
                        report.failed.len(),
                        report.started_runs.len()
                    );
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;
        *self.job_scheduler.write().await = Some(scheduler);

        tracing::info!("✅ Dataset refresh service started");
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!("⏹️ Stopping dataset refresh service");
        if let Some(mut scheduler) = self.job_scheduler.write().await.take() {
            scheduler.shutdown().await?;
        }
        Ok(())
    }

    /// Mark `dataset_id` as building; `None` if a build is already running
    pub fn try_begin(&self, dataset_id: &str) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !in_flight.insert(dataset_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            dataset_id: dataset_id.to_string(),
        })
    }

    pub fn last_refreshed(&self, dataset_id: &str) -> Option<DateTime<Utc>> {
        let last = self.last_refresh.lock().unwrap_or_else(|p| p.into_inner());
        last.get(dataset_id).copied()
    }

    fn is_due(&self, dataset: &Dataset, now: DateTime<Utc>) -> bool {
        let Some(interval) = dataset.refresh_interval() else {
            return false;
        };
        let Ok(interval) = chrono::Duration::from_std(interval) else {
            return false;
        };
        match self.last_refreshed(&dataset.id) {
            None => true,
            Some(last) => last < now - interval,
        }
    }

    /// One refresh pass over the latest config generation
    ///
    /// Failures are logged and reported; they never stop the other datasets.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let hash = match self.store.latest_hash().await {
            Ok(hash) => hash,
            Err(Error::NotFound(_)) => {
                tracing::debug!("⏭️ No configuration loaded, skipping refresh tick");
                return report;
            }
            Err(e) => {
                tracing::error!("❌ Refresh tick could not read latest config: {}", e);
                return report;
            }
        };

        let datasets = match self.store.datasets(&hash).await {
            Ok(datasets) => datasets,
            Err(e) => {
                tracing::error!("❌ Refresh tick could not list datasets: {}", e);
                return report;
            }
        };

        for dataset in datasets.iter().filter(|d| self.is_due(d, now)) {
            let Some(_guard) = self.try_begin(&dataset.id) else {
                tracing::debug!("⏳ Dataset {} is still building, skipping", dataset.id);
                report.skipped_in_flight.push(dataset.id.clone());
                continue;
            };

            match self.builder.build_in(&hash, dataset).await {
                Ok(_) => {
                    self.last_refresh
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .insert(dataset.id.clone(), now);
                    report.refreshed.push(dataset.id.clone());
                }
                Err(e) => {
                    tracing::error!("❌ Refresh of dataset {} failed: {}", dataset.id, e);
                    report.failed.push(dataset.id.clone());
                    continue;
                }
            }

            match self.start_subscribers(&dataset.id).await {
                Ok(runs) => report.started_runs.extend(runs),
                Err(e) => tracing::error!(
                    "❌ Could not start workflows subscribed to {}: {}",
                    dataset.id,
                    e
                ),
            }
        }

        report
    }

    /// Start every workflow of the latest generation subscribed to `dataset_id`
    async fn start_subscribers(&self, dataset_id: &str) -> Result<Vec<String>> {
        let hash = self.store.latest_hash().await?;
        let mut runs = Vec::new();
        for workflow in self.store.workflows(&hash).await? {
            if !workflow.subscribes_to(dataset_id) {
                continue;
            }
            tracing::info!("🔔 Dataset {} refreshed, starting {}", dataset_id, workflow.id);
            let run = self
                .scheduler
                .start_workflow_in(&hash, &workflow.id, None)
                .await?;
            runs.push(run.id);
        }
        Ok(runs)
    }
}
