//! Temperature dwell tracker. The predicate "temperature has been
//! >= 300 continuously for at least 1 hour", backed by the log-history
//! variant with a last-condition fallback that avoids oscillation back
//! into HeatingUp after a data gap. There is no prior precedent for a
//! temporal predicate cache in the pack; this is kept in the prevailing
//! idiom — a small struct owning a `tokio::sync::Mutex`-guarded map, the
//! same shape the connection pool (`pool.rs`) uses for its per-endpoint
//! state.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::Mutex;

use crate::model::Condition;
use crate::persistence::PersistencePort;

const DWELL_THRESHOLD: f64 = 300.0;
const LOOKBACK_WINDOW: i64 = 90; // minutes
const DWELL_REQUIRED: i64 = 60; // minutes

/// Process-local cache of `machineId -> heatingUpSince`. Read-through:
/// every `dwell()` call recomputes from log history, so callers never
/// observe a reading older than the current cycle.
pub struct DwellTracker {
    heating_up_since: Mutex<HashMap<i64, Option<DateTime<Utc>>>>,
}

impl DwellTracker {
    pub fn new() -> Self {
        DwellTracker {
            heating_up_since: Mutex::new(HashMap::new()),
        }
    }

    /// Warms the cache for every known machine at worker start.
    pub async fn warm(&self, store: &dyn PersistencePort, machine_ids: &[i64], now: DateTime<Utc>) {
        for &id in machine_ids {
            let since = compute_heating_up_since(store, id, now).await;
            self.heating_up_since.lock().await.insert(id, since);
        }
    }

    /// Evaluates the dwell predicate for `machine_id` given its current
    /// temperature reading, at time `now`.
    pub async fn dwell(
        &self,
        store: &dyn PersistencePort,
        machine_id: i64,
        current_temperature: f64,
        now: DateTime<Utc>,
    ) -> bool {
        if current_temperature < DWELL_THRESHOLD {
            self.heating_up_since.lock().await.insert(machine_id, None);
            return false;
        }

        let since = compute_heating_up_since(store, machine_id, now).await;
        self.heating_up_since.lock().await.insert(machine_id, since);

        match since {
            Some(start) => now - start >= Duration::minutes(DWELL_REQUIRED),
            None => last_condition_fallback(store, machine_id).await,
        }
    }

    #[cfg(test)]
    pub async fn cached_since(&self, machine_id: i64) -> Option<DateTime<Utc>> {
        self.heating_up_since
            .lock()
            .await
            .get(&machine_id)
            .copied()
            .flatten()
    }
}

impl Default for DwellTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks the last 90 minutes of log history ascending, tracking the start
/// of the currently active hot segment — reset to `None` the first time
/// temperature drops below 300.
async fn compute_heating_up_since(
    store: &dyn PersistencePort,
    machine_id: i64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let from = now - Duration::minutes(LOOKBACK_WINDOW);
    let rows = store
        .find_log_history_in_range(machine_id, from, now)
        .await
        .unwrap_or_default();

    let mut since = None;
    for row in rows {
        let hot = row
            .temperature
            .and_then(|t| t.to_f64())
            .map(|t| t >= DWELL_THRESHOLD)
            .unwrap_or(false);
        if hot {
            if since.is_none() {
                since = Some(row.timestamp);
            }
        } else {
            since = None;
        }
    }
    since
}

/// Restart fallback: a gap in the data must not regress an already-hot
/// machine back to `HeatingUp` just because the gap hides the qualifying
/// sample.
async fn last_condition_fallback(store: &dyn PersistencePort, machine_id: i64) -> bool {
    matches!(
        store.find_latest_condition(machine_id).await,
        Ok(Some(record))
            if matches!(
                record.current_condition,
                Condition::MachineProduction | Condition::Iddle
            )
    )
}
