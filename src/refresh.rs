//! Background refresh scheduler
//!
//! Keeps the weather cache fresh with three periodic jobs (weather refresh,
//! offset refresh and snapshot saving) that run side by side until a shutdown
//! signal arrives. A failed pass is logged and retried on the job's next tick;
//! the first failure is reported once the scheduler stops.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::cache::{CacheError, SnapshotStore, WeatherCache};
use crate::data::Upstream;

/// Configuration for refresh intervals and staleness thresholds
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// How often the weather job wakes up
    pub weather_interval: Duration,
    /// How often the offset job wakes up
    pub offset_interval: Duration,
    /// How often the whole cache is saved regardless of changes
    pub save_interval: Duration,
    /// Forecasts older than this are refreshed
    pub weather_max_age: chrono::Duration,
    /// Offsets older than this are refreshed
    pub offset_max_age: chrono::Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            weather_interval: Duration::from_secs(60 * 60),      // 1 hour
            offset_interval: Duration::from_secs(24 * 60 * 60),  // 24 hours
            save_interval: Duration::from_secs(60 * 60),         // 1 hour
            weather_max_age: chrono::Duration::hours(1),
            offset_max_age: chrono::Duration::hours(24),
        }
    }
}

/// Errors surfaced by a spawned scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A refresh pass failed while the scheduler was running
    #[error(transparent)]
    Refresh(#[from] CacheError),

    /// The scheduler task panicked or was aborted
    #[error("scheduler task did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Drives refresh passes and persistence for one cache
pub struct Scheduler<U> {
    cache: Arc<WeatherCache>,
    upstream: Arc<U>,
    store: SnapshotStore,
    config: RefreshConfig,
    /// Serializes offset passes
    offset_pass: Mutex<()>,
    /// Serializes weather passes
    weather_pass: Mutex<()>,
}

impl<U: Upstream> Scheduler<U> {
    pub fn new(
        cache: Arc<WeatherCache>,
        upstream: Arc<U>,
        store: SnapshotStore,
        config: RefreshConfig,
    ) -> Self {
        Self {
            cache,
            upstream,
            store,
            config,
            offset_pass: Mutex::new(()),
            weather_pass: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &Arc<WeatherCache> {
        &self.cache
    }

    /// Refreshes every city's offset if the last full pass is older than the threshold
    ///
    /// Returns `Ok(true)` when a pass ran to completion. The first failing
    /// city aborts the pass; cities already updated keep their new offset but
    /// the pass timestamp stays put, so the next check retries everything.
    pub async fn update_offset_if_needed(&self, now: DateTime<Utc>) -> Result<bool, CacheError> {
        let _pass = self.offset_pass.lock().await;
        if now - self.cache.last_offset_update() <= self.config.offset_max_age {
            return Ok(false);
        }

        info!(cities = self.cache.len(), "offset data is outdated, updating");
        for index in 0..self.cache.len() {
            self.cache.update_offset(index, self.upstream.as_ref()).await?;
        }
        self.cache.mark_offset_updated(Utc::now());
        info!("offset pass complete");
        Ok(true)
    }

    /// Refreshes every city's forecast if the last full pass is older than the threshold
    ///
    /// Same all-or-nothing rule as [`Self::update_offset_if_needed`].
    pub async fn update_weather_if_needed(&self, now: DateTime<Utc>) -> Result<bool, CacheError> {
        let _pass = self.weather_pass.lock().await;
        if now - self.cache.last_weather_update() <= self.config.weather_max_age {
            return Ok(false);
        }

        info!(cities = self.cache.len(), "weather data is outdated, updating");
        for index in 0..self.cache.len() {
            self.cache.update_weather(index, self.upstream.as_ref()).await?;
        }
        self.cache.mark_weather_updated(Utc::now());
        info!("weather pass complete");
        Ok(true)
    }

    /// Offsets first, then weather, then save if anything changed
    ///
    /// Used at startup and on every weather tick. A completed offset pass is
    /// saved even when the weather pass after it fails.
    pub async fn catch_up(&self, now: DateTime<Utc>) -> Result<bool, CacheError> {
        let offsets = self.update_offset_if_needed(now).await?;
        let weather = match self.update_weather_if_needed(now).await {
            Ok(weather) => weather,
            Err(e) => {
                if offsets {
                    info!("saving refreshed offsets before reporting the weather failure");
                    self.save();
                }
                return Err(e);
            }
        };

        let updated = offsets || weather;
        if updated {
            info!("saving cache due to data updates");
            self.save();
        }
        Ok(updated)
    }

    /// Writes the cache to disk, logging instead of failing
    pub fn save(&self) -> bool {
        match self.store.save(&self.cache) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to save cache, will retry on the next save");
                false
            }
        }
    }

    /// Runs all periodic jobs until `shutdown` flips to `true` or its sender is dropped
    ///
    /// A failing pass does not stop any job. The first failure is kept and
    /// returned once every job has exited.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), CacheError> {
        info!("refresh scheduler started");

        let failure = StdMutex::new(None);
        futures::future::join3(
            self.weather_job(shutdown.clone(), &failure),
            self.offset_job(shutdown.clone(), &failure),
            self.save_job(shutdown),
        )
        .await;

        match failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
            None => {
                info!("refresh scheduler stopped");
                Ok(())
            }
            Some(e) => {
                error!(error = %e, "refresh scheduler stopped after a failed pass");
                Err(e)
            }
        }
    }

    /// Hourly: offsets if due, then forecasts if due
    async fn weather_job(&self, mut shutdown: watch::Receiver<bool>, failure: &Failure) {
        let mut ticker = ticker(self.config.weather_interval).await;

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("stopping weather update job");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.catch_up(Utc::now()).await {
                        record_failure(failure, "weather", e);
                    }
                }
            }
        }
    }

    /// Daily: offsets if due
    async fn offset_job(&self, mut shutdown: watch::Receiver<bool>, failure: &Failure) {
        let mut ticker = ticker(self.config.offset_interval).await;

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("stopping offset update job");
                    return;
                }
                _ = ticker.tick() => {
                    match self.update_offset_if_needed(Utc::now()).await {
                        Ok(true) => {
                            self.save();
                        }
                        Ok(false) => {}
                        Err(e) => record_failure(failure, "offset", e),
                    }
                }
            }
        }
    }

    /// Hourly: unconditional snapshot
    async fn save_job(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = ticker(self.config.save_interval).await;

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("stopping cache save job");
                    return;
                }
                _ = ticker.tick() => {
                    self.save();
                }
            }
        }
    }
}

/// First pass failure seen by any job
type Failure = StdMutex<Option<CacheError>>;

/// Logs a failed pass and keeps it if it is the first one
fn record_failure(failure: &Failure, job: &'static str, e: CacheError) {
    let parse = matches!(&e, CacheError::Fetch { source, .. } if source.is_parse());
    error!(job, error = %e, parse, "refresh pass failed, retrying on the next tick");

    let mut first = failure.lock().unwrap_or_else(PoisonError::into_inner);
    if first.is_none() {
        *first = Some(e);
    }
}

/// Interval whose first tick is one full period away
async fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first tick (immediate)
    ticker.tick().await;
    ticker
}

/// Resolves once shutdown is requested; a dropped sender counts as a request
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Handle for controlling a scheduler running on the tokio runtime
pub struct RefreshHandle {
    /// Flag to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<(), CacheError>>,
}

impl RefreshHandle {
    /// Spawns `scheduler.run` as a background task
    pub fn spawn<U: Upstream + 'static>(scheduler: Arc<Scheduler<U>>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });
        Self { shutdown_tx, task }
    }

    /// Whether the scheduler task has already exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals every job to stop and waits for them to exit
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        // Fails only if the scheduler already exited, which the join reports
        let _ = self.shutdown_tx.send(true);
        self.task.await??;
        Ok(())
    }
}
