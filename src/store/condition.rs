//! Condition store. Append-only condition-transition log with
//! change-detection and a 5s deduplication guard. No prior precedent for
//! a log-with-dedup exists in the pack; written the way the persistence
//! port's other callers are — a thin struct wrapping an
//! `Arc<dyn PersistencePort>`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::PersistenceError;
use crate::model::{Condition, ConditionRecord, MachineReading};
use crate::persistence::PersistencePort;
use crate::store::history::HistoryStore;

const DEDUP_WINDOW: Duration = Duration::milliseconds(5000);

pub struct ConditionStore {
    persistence: Arc<dyn PersistencePort>,
}

impl ConditionStore {
    pub fn new(persistence: Arc<dyn PersistencePort>) -> Self {
        ConditionStore { persistence }
    }

    /// Records a machine's current condition, applying change-detection
    /// and the dedup window. Returns the newly inserted record, or `None`
    /// if this call produced no write.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        machine_id: i64,
        condition: Condition,
        kwh: f64,
        timestamp: DateTime<Utc>,
        reading: Option<&MachineReading>,
        force_snapshot: bool,
        skip_log_history: bool,
    ) -> Result<Option<ConditionRecord>, PersistenceError> {
        let existing = self.persistence.find_latest_condition(machine_id).await?;

        let changed = match &existing {
            None => true,
            Some(e) => e.current_condition != condition,
        };

        if !changed && !force_snapshot {
            return Ok(None);
        }

        if let Some(e) = &existing {
            if e.current_condition == condition && (timestamp - e.current_timestamp) < DEDUP_WINDOW
            {
                debug!(
                    machine_id,
                    condition = %condition,
                    "deduplicated condition write within 5s window"
                );
                return Ok(None);
            }
        }

        let current_kwh = Decimal::from_f64(kwh).unwrap_or(Decimal::ZERO);
        let record = self
            .persistence
            .insert_condition_record(
                machine_id,
                timestamp,
                condition,
                current_kwh,
                existing.as_ref().map(|e| e.current_timestamp),
                existing.as_ref().map(|e| e.current_condition),
                existing.as_ref().map(|e| e.current_kwh),
            )
            .await?;

        if changed && !skip_log_history {
            if let Some(reading) = reading {
                HistoryStore::new(Arc::clone(&self.persistence))
                    .save_batch(std::slice::from_ref(reading))
                    .await?;
            }
        }

        Ok(Some(record))
    }
}
