//! Polling scheduler, snapshot cron, and frequency watcher.
//! Adapted from the original `main.rs` outer loop — dial, read
//! forever, reconnect on fault — generalized from "one connection, read
//! once per tick" to "fan out across every gateway, fan back in, classify,
//! and persist", with two independent timer-driven tasks layered on top.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregate::aggregate_readings;
use crate::classifier::classify;
use crate::config::FleetConfig;
use crate::cron::CronSchedule;
use crate::daily::{local_date, DailyCalculator};
use crate::dwell::DwellTracker;
use crate::fingerprint;
use crate::grouper::{self, FleetMachine};
use crate::license;
use crate::model::{GatewayGroup, SensorReading, SensorTask};
use crate::persistence::PersistencePort;
use crate::pool::ConnectionPool;
use crate::store::{ConditionStore, HistoryStore};

const DEFAULT_LOG_FREQ_MINUTES: u32 = 15;
const RETRY_PAUSE: StdDuration = StdDuration::from_secs(5);
const CYCLE_YIELD: StdDuration = StdDuration::from_millis(100);
const GATEWAY_READ_SPACING: StdDuration = StdDuration::from_millis(50);
const FREQUENCY_WATCH_INTERVAL: StdDuration = StdDuration::from_secs(60);

pub struct Scheduler {
    fleet_config_path: PathBuf,
    persistence: Arc<dyn PersistencePort>,
    pool: Arc<ConnectionPool>,
    dwell: DwellTracker,
    condition_store: ConditionStore,
    history_store: HistoryStore,
    daily_calculator: DailyCalculator,
    license_key: [u8; 16],
    license_iv: [u8; 16],
    fingerprint_hash: String,
    latest_readings: AsyncMutex<Vec<SensorReading>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        fleet_config_path: PathBuf,
        persistence: Arc<dyn PersistencePort>,
        pool: Arc<ConnectionPool>,
        license_key: [u8; 16],
        license_iv: [u8; 16],
        shutdown: CancellationToken,
    ) -> Self {
        Scheduler {
            condition_store: ConditionStore::new(Arc::clone(&persistence)),
            history_store: HistoryStore::new(Arc::clone(&persistence)),
            daily_calculator: DailyCalculator::new(Arc::clone(&persistence), fleet_config_path.clone()),
            fleet_config_path,
            persistence,
            pool,
            dwell: DwellTracker::new(),
            license_key,
            license_iv,
            fingerprint_hash: fingerprint::machine_fingerprint(),
            latest_readings: AsyncMutex::new(Vec::new()),
            shutdown,
        }
    }

    /// Runs until cancelled: the cycle loop, the snapshot cron, the
    /// frequency watcher, and the daily cron, all concurrently. Closes
    /// every pooled connection once all four stop.
    pub async fn run(self: Arc<Self>) {
        self.warm_dwell_tracker().await;

        let initial_freq = self
            .persistence
            .get_general_config()
            .await
            .map(|c| c.log_freq_minutes.max(1))
            .unwrap_or(DEFAULT_LOG_FREQ_MINUTES);
        let log_freq = Arc::new(RwLock::new(initial_freq));

        let cycle = tokio::spawn(Arc::clone(&self).run_cycle_loop());
        let snapshot = tokio::spawn(Arc::clone(&self).run_snapshot_cron(Arc::clone(&log_freq)));
        let watcher = tokio::spawn(Arc::clone(&self).run_frequency_watcher(log_freq));
        let daily = tokio::spawn(Arc::clone(&self).run_daily_cron());

        let _ = tokio::join!(cycle, snapshot, watcher, daily);
        self.pool.close_all().await;
        info!("scheduler stopped, all gateway connections closed");
    }

    async fn warm_dwell_tracker(&self) {
        let machines = self.load_fleet_config().map(|c| c.machines).unwrap_or_default();
        let ids: Vec<i64> = machines.iter().filter(|m| m.enabled).map(|m| m.id).collect();
        self.dwell.warm(self.persistence.as_ref(), &ids, Utc::now()).await;
    }

    fn load_fleet_config(&self) -> anyhow::Result<FleetConfig> {
        FleetConfig::load(&self.fleet_config_path)
    }

    /// The cycle loop's eight-step sequence, looped until shutdown.
    async fn run_cycle_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            if let Err(e) = self.validate_license().await {
                warn!(error = %e, "license invalid, pausing 5s before retry");
                if self.sleep_or_shutdown(RETRY_PAUSE).await {
                    return;
                }
                continue;
            }

            let machines = match self.load_fleet_config() {
                Ok(cfg) => cfg.enabled_machines().map(FleetMachine::from).collect::<Vec<_>>(),
                Err(e) => {
                    error!(error = %e, "failed to load fleet configuration, retrying in 5s");
                    if self.sleep_or_shutdown(RETRY_PAUSE).await {
                        return;
                    }
                    continue;
                }
            };

            if machines.is_empty() {
                warn!("no enabled machines, retrying in 5s");
                if self.sleep_or_shutdown(RETRY_PAUSE).await {
                    return;
                }
                continue;
            }

            let groups = grouper::group_by_gateway(&machines);
            let readings = self.poll_all_groups(groups).await;
            let aggregated = aggregate_readings(&readings);

            for reading in &aggregated {
                let hot = self
                    .dwell
                    .dwell(
                        self.persistence.as_ref(),
                        reading.machine_id,
                        reading.temperature.unwrap_or(0.0),
                        reading.timestamp,
                    )
                    .await;
                let condition = classify(reading, hot);
                let kwh = reading.kwh.unwrap_or(0.0);
                if let Err(e) = self
                    .condition_store
                    .record(
                        reading.machine_id,
                        condition,
                        kwh,
                        reading.timestamp,
                        Some(reading),
                        false,
                        false,
                    )
                    .await
                {
                    error!(machine_id = reading.machine_id, error = %e, "condition write failed");
                }
            }

            *self.latest_readings.lock().await = readings;

            if self.sleep_or_shutdown(CYCLE_YIELD).await {
                return;
            }
        }
    }

    /// Fan-out across gateways, fan-in with all-settled semantics: one
    /// gateway's failure never cancels the others.
    async fn poll_all_groups(&self, groups: Vec<GatewayGroup>) -> Vec<SensorReading> {
        let mut handles = Vec::with_capacity(groups.len());
        for group in groups {
            let pool = Arc::clone(&self.pool);
            handles.push(tokio::spawn(poll_group(pool, group)));
        }
        let results = futures::future::join_all(handles).await;
        results.into_iter().filter_map(Result::ok).flatten().collect()
    }

    /// Bulk log history write, then a forced heartbeat condition write
    /// per aggregated machine.
    async fn snapshot_tick(&self) {
        let raw = self.latest_readings.lock().await.clone();
        if raw.is_empty() {
            info!("snapshot cron fired with no cached readings, skipping");
            return;
        }

        let aggregated = aggregate_readings(&raw);
        if let Err(e) = self.history_store.save_batch(&aggregated).await {
            error!(error = %e, "snapshot log history bulk write failed");
        }

        for reading in &aggregated {
            let hot = self
                .dwell
                .dwell(
                    self.persistence.as_ref(),
                    reading.machine_id,
                    reading.temperature.unwrap_or(0.0),
                    reading.timestamp,
                )
                .await;
            let condition = classify(reading, hot);
            let kwh = reading.kwh.unwrap_or(0.0);
            if let Err(e) = self
                .condition_store
                .record(reading.machine_id, condition, kwh, reading.timestamp, None, true, true)
                .await
            {
                error!(machine_id = reading.machine_id, error = %e, "snapshot condition write failed");
            }
        }
    }

    async fn run_snapshot_cron(self: Arc<Self>, log_freq: Arc<RwLock<u32>>) {
        loop {
            let freq = *log_freq.read().await;
            let schedule = CronSchedule::EveryNMinutes(freq);
            let next = schedule.next_after(Utc::now());
            let wait = (next - Utc::now()).to_std().unwrap_or(StdDuration::from_secs(1));

            tokio::select! {
                _ = sleep(wait) => self.snapshot_tick().await,
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    /// Re-reads `log_freq` every 60s. A changed value is picked up by
    /// the snapshot cron's next schedule computation; the daily cron is
    /// never touched.
    async fn run_frequency_watcher(self: Arc<Self>, log_freq: Arc<RwLock<u32>>) {
        loop {
            tokio::select! {
                _ = sleep(FREQUENCY_WATCH_INTERVAL) => {}
                _ = self.shutdown.cancelled() => return,
            }

            match self.persistence.get_general_config().await {
                Ok(cfg) => {
                    let new_freq = cfg.log_freq_minutes.max(1);
                    let mut guard = log_freq.write().await;
                    if *guard != new_freq {
                        info!(old = *guard, new = new_freq, "snapshot cron frequency changed");
                        *guard = new_freq;
                    }
                }
                Err(e) => warn!(error = %e, "failed to refresh log_freq from configuration"),
            }
        }
    }

    async fn run_daily_cron(self: Arc<Self>) {
        let schedule = CronSchedule::DailyAt { hour: 0 };
        loop {
            let next = schedule.next_after(Utc::now());
            let wait = (next - Utc::now()).to_std().unwrap_or(StdDuration::from_secs(60));

            tokio::select! {
                _ = sleep(wait) => {
                    let target = local_date(next) - chrono::Duration::days(1);
                    if let Err(e) = self.daily_calculator.run_for_day(target).await {
                        error!(date = %target, error = %e, "daily roll-up failed");
                    }
                }
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    async fn validate_license(&self) -> anyhow::Result<()> {
        let cfg = self.persistence.get_general_config().await?;
        let payload = license::decrypt_blob(&cfg.license_key, &self.license_key, &self.license_iv)?;
        let enabled_count = self
            .load_fleet_config()?
            .enabled_machines()
            .count();
        license::validate(&payload, &self.fingerprint_hash, enabled_count)?;
        Ok(())
    }

    /// Sleeps `d` unless shutdown fires first; returns `true` if shutdown
    /// won the race, so callers can bail out of their loop immediately.
    async fn sleep_or_shutdown(&self, d: StdDuration) -> bool {
        tokio::select! {
            _ = sleep(d) => false,
            _ = self.shutdown.cancelled() => true,
        }
    }
}

/// One gateway's sequential read: acquire the client, read every task in
/// group order with 50ms spacing, and return whatever was collected even
/// if the gateway went unreachable partway through.
async fn poll_group(pool: Arc<ConnectionPool>, group: GatewayGroup) -> Vec<SensorReading> {
    let mut client = match pool.acquire(&group.endpoint).await {
        Ok(client) => client,
        Err(e) => {
            warn!(gateway = %group.endpoint, error = %e, "gateway unreachable, skipping this cycle");
            pool.mark_disconnected(&group.endpoint).await;
            return group
                .tasks
                .iter()
                .map(|t| failed_reading(t, e.to_string()))
                .collect();
        }
    };

    let mut readings = Vec::with_capacity(group.tasks.len());
    for (i, task) in group.tasks.iter().enumerate() {
        if i > 0 {
            sleep(GATEWAY_READ_SPACING).await;
        }
        let reading = crate::sensor::read_sensor_with_retry(&mut client, task).await;
        if !reading.success {
            client.mark_disconnected();
        }
        readings.push(reading);
    }
    readings
}

fn failed_reading(task: &SensorTask, error: String) -> SensorReading {
    SensorReading {
        machine_id: task.machine_id,
        machine_name: task.machine_name.clone(),
        role: task.role,
        timestamp: Utc::now(),
        values: BTreeMap::new(),
        success: false,
        error: Some(error),
    }
}
