//! In-memory `PersistencePort` used by unit tests across modules. A real
//! database is out of scope for the worker's own binary; this fake is the
//! seam that lets the condition store, dwell tracker, and daily calculator
//! be tested without one.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::error::PersistenceError;
use crate::model::{Condition, ConditionRecord, DailySummary, GeneralConfig, LogHistoryRecord};
use crate::persistence::PersistencePort;

#[derive(Default)]
pub struct FakeStore {
    pub general_config: Mutex<Option<GeneralConfig>>,
    pub conditions: Mutex<Vec<ConditionRecord>>,
    pub log_history: Mutex<Vec<LogHistoryRecord>>,
    pub daily_summaries: Mutex<Vec<DailySummary>>,
    next_id: Mutex<i64>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
            ..Default::default()
        }
    }

    pub fn with_general_config(self, cfg: GeneralConfig) -> Self {
        *self.general_config.lock().unwrap() = Some(cfg);
        self
    }

    pub fn conditions_snapshot(&self) -> Vec<ConditionRecord> {
        self.conditions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistencePort for FakeStore {
    async fn get_general_config(&self) -> Result<GeneralConfig, PersistenceError> {
        self.general_config
            .lock()
            .unwrap()
            .clone()
            .ok_or(PersistenceError::ConfigMissing)
    }

    async fn insert_condition_record(
        &self,
        machine_id: i64,
        current_timestamp: DateTime<Utc>,
        current_condition: Condition,
        current_kwh: Decimal,
        last_timestamp: Option<DateTime<Utc>>,
        last_condition: Option<Condition>,
        last_kwh: Option<Decimal>,
    ) -> Result<ConditionRecord, PersistenceError> {
        let mut next_id = self.next_id.lock().unwrap();
        let record = ConditionRecord {
            id: *next_id,
            machine_id,
            current_timestamp,
            current_condition,
            current_kwh,
            last_timestamp,
            last_condition,
            last_kwh,
        };
        *next_id += 1;
        self.conditions.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn find_latest_condition(
        &self,
        machine_id: i64,
    ) -> Result<Option<ConditionRecord>, PersistenceError> {
        Ok(self
            .conditions
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.machine_id == machine_id)
            .max_by_key(|r| r.current_timestamp)
            .cloned())
    }

    async fn find_conditions_in_range(
        &self,
        machine_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ConditionRecord>, PersistenceError> {
        let mut rows: Vec<ConditionRecord> = self
            .conditions
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.machine_id == machine_id && r.current_timestamp >= from && r.current_timestamp <= to
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.current_timestamp);
        Ok(rows)
    }

    async fn insert_log_history_batch(
        &self,
        records: Vec<LogHistoryRecord>,
    ) -> Result<(), PersistenceError> {
        self.log_history.lock().unwrap().extend(records);
        Ok(())
    }

    async fn find_log_history_in_range(
        &self,
        machine_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LogHistoryRecord>, PersistenceError> {
        let mut rows: Vec<LogHistoryRecord> = self
            .log_history
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.machine_id == machine_id && r.timestamp >= from && r.timestamp <= to)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn upsert_daily_summary(&self, summary: DailySummary) -> Result<(), PersistenceError> {
        let mut summaries = self.daily_summaries.lock().unwrap();
        if let Some(existing) = summaries
            .iter_mut()
            .find(|s| s.machine_id == summary.machine_id && s.date == summary.date)
        {
            *existing = summary;
        } else {
            summaries.push(summary);
        }
        Ok(())
    }

    async fn find_daily_summary(
        &self,
        machine_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>, PersistenceError> {
        Ok(self
            .daily_summaries
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.machine_id == machine_id && s.date == date)
            .cloned())
    }
}
