//! Log history store. Aggregates raw sensor readings per machine and
//! inserts one `LogHistoryRecord` per machine in a single bulk write.
//! `on_contact`/`alarm_contact` round to the nearest integer;
//! `temperature`/`kwh`/`capstan_speed` are stored as decimal strings.

use std::sync::Arc;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::aggregate::aggregate_readings;
use crate::error::PersistenceError;
use crate::model::{LogHistoryRecord, MachineReading, SensorReading};
use crate::persistence::PersistencePort;

pub struct HistoryStore {
    persistence: Arc<dyn PersistencePort>,
}

impl HistoryStore {
    pub fn new(persistence: Arc<dyn PersistencePort>) -> Self {
        HistoryStore { persistence }
    }

    /// Aggregates `readings` per machine and bulk-inserts one row per
    /// machine. This is the entry point the polling scheduler and the
    /// snapshot cron use — both hold raw per-sensor readings for the
    /// cycle.
    pub async fn save_raw_batch(&self, readings: &[SensorReading]) -> Result<(), PersistenceError> {
        let aggregated = aggregate_readings(readings);
        self.save_batch(&aggregated).await
    }

    /// Inserts one row per already-aggregated `MachineReading`, skipping
    /// the aggregation step. Used by the condition store, which already
    /// holds a single machine's aggregated reading.
    pub async fn save_batch(&self, readings: &[MachineReading]) -> Result<(), PersistenceError> {
        let records: Vec<LogHistoryRecord> = readings.iter().map(to_log_history_record).collect();
        self.persistence.insert_log_history_batch(records).await
    }
}

fn to_log_history_record(reading: &MachineReading) -> LogHistoryRecord {
    LogHistoryRecord {
        machine_id: reading.machine_id,
        timestamp: reading.timestamp,
        on_contact: reading.on_contact.map(|v| v.round() as i32),
        alarm_contact: reading.alarm_contact.map(|v| v.round() as i32),
        temperature: reading.temperature.and_then(Decimal::from_f64),
        kwh: reading.kwh.and_then(Decimal::from_f64),
        capstan_speed: reading.capstan_speed.and_then(Decimal::from_f64),
    }
}
