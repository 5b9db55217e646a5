//! Persistence port. The concrete schema is owned by the surrounding
//! deployment; this crate only depends on an abstract async trait, with
//! dependencies injected into the scheduler at construction. `PgStore` is
//! the one real implementation, built the way `adamtc007-ob-poc` wires
//! `sqlx::PgPool` behind an async-trait port.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::error::PersistenceError;
use crate::model::{Condition, ConditionRecord, DailySummary, GeneralConfig, LogHistoryRecord};

/// The operations the scheduler, dwell tracker, condition store, and
/// daily calculator need, spelled out as one trait so they depend on a
/// port instead of a concrete database.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn get_general_config(&self) -> Result<GeneralConfig, PersistenceError>;

    #[allow(clippy::too_many_arguments)]
    async fn insert_condition_record(
        &self,
        machine_id: i64,
        current_timestamp: DateTime<Utc>,
        current_condition: Condition,
        current_kwh: Decimal,
        last_timestamp: Option<DateTime<Utc>>,
        last_condition: Option<Condition>,
        last_kwh: Option<Decimal>,
    ) -> Result<ConditionRecord, PersistenceError>;

    async fn find_latest_condition(
        &self,
        machine_id: i64,
    ) -> Result<Option<ConditionRecord>, PersistenceError>;

    async fn find_conditions_in_range(
        &self,
        machine_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ConditionRecord>, PersistenceError>;

    async fn insert_log_history_batch(
        &self,
        records: Vec<LogHistoryRecord>,
    ) -> Result<(), PersistenceError>;

    async fn find_log_history_in_range(
        &self,
        machine_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LogHistoryRecord>, PersistenceError>;

    async fn upsert_daily_summary(&self, summary: DailySummary) -> Result<(), PersistenceError>;

    async fn find_daily_summary(
        &self,
        machine_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>, PersistenceError>;
}

/// Postgres-backed implementation. Schema is owned by the surrounding
/// deployment; this assumes tables `machines`, `general_config`, `condition_records`,
/// `log_history_records`, `daily_summaries` already exist with the obvious
/// column names mirroring `model.rs`.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        Ok(PgStore { pool })
    }
}

#[async_trait]
impl PersistencePort for PgStore {
    async fn get_general_config(&self) -> Result<GeneralConfig, PersistenceError> {
        let row = sqlx::query_as::<_, (i32, String)>(
            "SELECT log_freq_minutes, license_key FROM general_config LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;

        match row {
            Some((log_freq_minutes, license_key)) => Ok(GeneralConfig {
                log_freq_minutes: log_freq_minutes.max(0) as u32,
                license_key,
            }),
            None => Err(PersistenceError::ConfigMissing),
        }
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
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO condition_records
                (machine_id, current_timestamp, current_condition, current_kwh,
                 last_timestamp, last_condition, last_kwh)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(machine_id)
        .bind(current_timestamp)
        .bind(current_condition)
        .bind(current_kwh)
        .bind(last_timestamp)
        .bind(last_condition)
        .bind(last_kwh)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;

        Ok(ConditionRecord {
            id,
            machine_id,
            current_timestamp,
            current_condition,
            current_kwh,
            last_timestamp,
            last_condition,
            last_kwh,
        })
    }

    async fn find_latest_condition(
        &self,
        machine_id: i64,
    ) -> Result<Option<ConditionRecord>, PersistenceError> {
        sqlx::query_as::<_, ConditionRecord>(
            r#"
            SELECT id, machine_id, current_timestamp, current_condition, current_kwh,
                   last_timestamp, last_condition, last_kwh
            FROM condition_records
            WHERE machine_id = $1
            ORDER BY current_timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))
    }

    async fn find_conditions_in_range(
        &self,
        machine_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ConditionRecord>, PersistenceError> {
        sqlx::query_as::<_, ConditionRecord>(
            r#"
            SELECT id, machine_id, current_timestamp, current_condition, current_kwh,
                   last_timestamp, last_condition, last_kwh
            FROM condition_records
            WHERE machine_id = $1 AND current_timestamp >= $2 AND current_timestamp <= $3
            ORDER BY current_timestamp ASC
            "#,
        )
        .bind(machine_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))
    }

    async fn insert_log_history_batch(
        &self,
        records: Vec<LogHistoryRecord>,
    ) -> Result<(), PersistenceError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        for r in &records {
            sqlx::query(
                r#"
                INSERT INTO log_history_records
                    (machine_id, timestamp, on_contact, alarm_contact, temperature, kwh, capstan_speed)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(r.machine_id)
            .bind(r.timestamp)
            .bind(r.on_contact)
            .bind(r.alarm_contact)
            .bind(r.temperature)
            .bind(r.kwh)
            .bind(r.capstan_speed)
            .execute(&mut *tx)
            .await
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        Ok(())
    }

    async fn find_log_history_in_range(
        &self,
        machine_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LogHistoryRecord>, PersistenceError> {
        sqlx::query_as::<_, LogHistoryRecord>(
            r#"
            SELECT machine_id, timestamp, on_contact, alarm_contact, temperature, kwh, capstan_speed
            FROM log_history_records
            WHERE machine_id = $1 AND timestamp >= $2 AND timestamp <= $3
            ORDER BY timestamp ASC
            "#,
        )
        .bind(machine_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))
    }

    async fn upsert_daily_summary(&self, summary: DailySummary) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO daily_summaries
                (machine_id, date, total_hours, total_kwh, heating_up_hours, heating_up_kwh,
                 iddle_hours, iddle_kwh, production_hours, production_kwh, is_one_block)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (machine_id, date) DO UPDATE SET
                total_hours = EXCLUDED.total_hours,
                total_kwh = EXCLUDED.total_kwh,
                heating_up_hours = EXCLUDED.heating_up_hours,
                heating_up_kwh = EXCLUDED.heating_up_kwh,
                iddle_hours = EXCLUDED.iddle_hours,
                iddle_kwh = EXCLUDED.iddle_kwh,
                production_hours = EXCLUDED.production_hours,
                production_kwh = EXCLUDED.production_kwh,
                is_one_block = EXCLUDED.is_one_block
            "#,
        )
        .bind(summary.machine_id)
        .bind(summary.date)
        .bind(summary.total_hours)
        .bind(summary.total_kwh)
        .bind(summary.heating_up_hours)
        .bind(summary.heating_up_kwh)
        .bind(summary.iddle_hours)
        .bind(summary.iddle_kwh)
        .bind(summary.production_hours)
        .bind(summary.production_kwh)
        .bind(summary.is_one_block)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;
        Ok(())
    }

    async fn find_daily_summary(
        &self,
        machine_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>, PersistenceError> {
        sqlx::query_as::<_, DailySummary>(
            r#"
            SELECT machine_id, date, total_hours, total_kwh, heating_up_hours, heating_up_kwh,
                   iddle_hours, iddle_kwh, production_hours, production_kwh, is_one_block
            FROM daily_summaries
            WHERE machine_id = $1 AND date = $2
            "#,
        )
        .bind(machine_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))
    }
}
