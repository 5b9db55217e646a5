//! Daily calculator. Once-per-day roll-up of hours and energy per
//! condition, with the shared-power-meter split. No prior precedent in
//! the pack for segment-based time/energy accounting; the exact boundary
//! convention for segment energy is pinned down by a worked example (see
//! `kwh_by_condition` below).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::info;

use crate::config::FleetConfig;
use crate::error::PersistenceError;
use crate::model::{Condition, ConditionRecord, DailySummary, Machine};
use crate::persistence::PersistencePort;

/// Server timezone is fixed at UTC+7.
const LOCAL_OFFSET_SECONDS: i32 = 7 * 3600;

pub struct DailyCalculator {
    persistence: Arc<dyn PersistencePort>,
    fleet_config_path: PathBuf,
}

impl DailyCalculator {
    pub fn new(persistence: Arc<dyn PersistencePort>, fleet_config_path: PathBuf) -> Self {
        DailyCalculator {
            persistence,
            fleet_config_path,
        }
    }

    /// Rolls up `date` (intended to be called with "yesterday" — no
    /// historical back-fill beyond the previous calendar day) for every
    /// enabled machine. The fleet layout, not the persistence port, is the
    /// source of truth for which machines those are — the same file the
    /// cycle loop reads every iteration, so a machine disabled mid-day
    /// still rolls up against the layout the worker was actually running.
    pub async fn run_for_day(&self, date: NaiveDate) -> Result<(), PersistenceError> {
        let fleet = FleetConfig::load(&self.fleet_config_path)
            .map_err(|e| PersistenceError::FleetConfig(e.to_string()))?;
        let machines: Vec<Machine> = fleet.enabled_machines().cloned().collect();
        for machine in &machines {
            let summary = self.compute_for_machine(machine, &machines, date).await?;
            self.persistence.upsert_daily_summary(summary).await?;
        }
        info!(date = %date, machines = machines.len(), "daily roll-up complete");
        Ok(())
    }

    async fn compute_for_machine(
        &self,
        machine: &Machine,
        all_machines: &[Machine],
        date: NaiveDate,
    ) -> Result<DailySummary, PersistenceError> {
        let (from, to) = local_day_bounds_utc(date);
        let records = self
            .persistence
            .find_conditions_in_range(machine.id, from, to)
            .await?;

        if records.is_empty() {
            return Ok(zero_summary(machine.id, date));
        }

        let hours = hours_by_condition(&records);
        let kwh = kwh_by_condition(&records);

        let total_hours = hours.heating_up + hours.iddle + hours.production;
        let mut total_kwh = kwh.heating_up + kwh.iddle + kwh.production;
        let mut heating_up_kwh = kwh.heating_up;
        let mut iddle_kwh = kwh.iddle;
        let mut production_kwh = kwh.production;

        let is_one_block = self
            .is_one_block(machine, all_machines, hours.production, from, to)
            .await?;

        if !is_one_block {
            total_kwh /= 2.0;
            heating_up_kwh /= 2.0;
            iddle_kwh /= 2.0;
            production_kwh /= 2.0;
        }

        Ok(DailySummary {
            machine_id: machine.id,
            date,
            total_hours,
            total_kwh,
            heating_up_hours: hours.heating_up,
            heating_up_kwh,
            iddle_hours: hours.iddle,
            iddle_kwh,
            production_hours: hours.production,
            production_kwh,
            is_one_block,
        })
    }

    /// Shared power meter / block split.
    async fn is_one_block(
        &self,
        machine: &Machine,
        all_machines: &[Machine],
        production_hours: f64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        let sharing: Vec<&Machine> = all_machines
            .iter()
            .filter(|m| m.power_meter_id == machine.power_meter_id && m.id != machine.id)
            .collect();

        if sharing.is_empty() || production_hours <= 0.0 {
            return Ok(true);
        }

        for other in sharing {
            let other_records = self
                .persistence
                .find_conditions_in_range(other.id, from, to)
                .await?;
            if other_records
                .iter()
                .any(|r| r.current_condition == Condition::MachineProduction)
            {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn zero_summary(machine_id: i64, date: NaiveDate) -> DailySummary {
    DailySummary {
        machine_id,
        date,
        total_hours: 0.0,
        total_kwh: 0.0,
        heating_up_hours: 0.0,
        heating_up_kwh: 0.0,
        iddle_hours: 0.0,
        iddle_kwh: 0.0,
        production_hours: 0.0,
        production_kwh: 0.0,
        is_one_block: true,
    }
}

/// The server-local (UTC+7) calendar date a UTC instant falls on. Used by
/// the daily cron to turn "just fired at local midnight" into "the day
/// that just ended".
pub fn local_date(t: DateTime<Utc>) -> NaiveDate {
    let offset = FixedOffset::east_opt(LOCAL_OFFSET_SECONDS).expect("fixed +7h offset is valid");
    t.with_timezone(&offset).date_naive()
}

/// `[00:00:00.000, 23:59:59.999]` local (UTC+7), converted to UTC instants.
fn local_day_bounds_utc(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let offset = FixedOffset::east_opt(LOCAL_OFFSET_SECONDS).expect("fixed +7h offset is valid");
    let start_local = date.and_hms_milli_opt(0, 0, 0, 0).expect("valid time");
    let end_local = date.and_hms_milli_opt(23, 59, 59, 999).expect("valid time");
    let start = offset
        .from_local_datetime(&start_local)
        .single()
        .expect("unambiguous fixed-offset datetime")
        .with_timezone(&Utc);
    let end = offset
        .from_local_datetime(&end_local)
        .single()
        .expect("unambiguous fixed-offset datetime")
        .with_timezone(&Utc);
    (start, end)
}

#[derive(Default)]
struct HoursByCondition {
    heating_up: f64,
    iddle: f64,
    production: f64,
}

/// Hours accounting: attributes `duration = end − start` to
/// `current.currentCondition` for each adjacent pair. `MachineOFF` and
/// `UNKNOWN` are excluded; the last record contributes no duration.
fn hours_by_condition(records: &[ConditionRecord]) -> HoursByCondition {
    let mut acc = HoursByCondition::default();
    for i in 0..records.len().saturating_sub(1) {
        let current = &records[i];
        let next = &records[i + 1];
        let start = if i == 0 {
            current.last_timestamp.unwrap_or(current.current_timestamp)
        } else {
            current.current_timestamp
        };
        let end = next.current_timestamp;
        let hours = (end - start).num_milliseconds() as f64 / 3_600_000.0;

        match current.current_condition {
            Condition::HeatingUp => acc.heating_up += hours,
            Condition::Iddle => acc.iddle += hours,
            Condition::MachineProduction => acc.production += hours,
            Condition::MachineOff | Condition::Unknown => {}
        }
    }
    acc
}

#[derive(Default)]
struct KwhByCondition {
    heating_up: f64,
    iddle: f64,
    production: f64,
}

/// Energy accounting: segment-based. A segment is a maximal run of
/// consecutive records with the same target condition. Its energy is
/// `end.currentKwh − start.lastKwh`, where `end` is the record
/// immediately *after* the segment (the transition record whose timestamp
/// the hours accounting also uses as that segment's end) — or the
/// segment's own last record when the segment runs to the end of the
/// day's record list, since no transition record exists to anchor it.
/// This reading is pinned down by a worked seed scenario, not by prose
/// alone: `(110−98)` in that scenario is the Iddle record's kwh (the
/// record right after a single-record Production segment) minus the
/// Production record's `lastKwh`, not the Production record's own kwh.
fn kwh_by_condition(records: &[ConditionRecord]) -> KwhByCondition {
    let mut acc = KwhByCondition::default();
    let mut i = 0;
    while i < records.len() {
        let condition = records[i].current_condition;
        let is_target = matches!(
            condition,
            Condition::HeatingUp | Condition::Iddle | Condition::MachineProduction
        );
        let is_segment_start = i == 0 || records[i - 1].current_condition != condition;

        if is_target && is_segment_start {
            let mut seg_end = i;
            while seg_end + 1 < records.len() && records[seg_end + 1].current_condition == condition
            {
                seg_end += 1;
            }
            let boundary = if seg_end + 1 < records.len() {
                seg_end + 1
            } else {
                seg_end
            };

            let start_last_kwh = records[i].last_kwh.unwrap_or(Decimal::ZERO);
            let energy = (records[boundary].current_kwh - start_last_kwh)
                .to_f64()
                .unwrap_or(0.0);

            match condition {
                Condition::HeatingUp => acc.heating_up += energy,
                Condition::Iddle => acc.iddle += energy,
                Condition::MachineProduction => acc.production += energy,
                _ => unreachable!("is_target already filtered to the three counted conditions"),
            }

            i = seg_end + 1;
        } else {
            i += 1;
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeStore;
    use chrono::Duration;
    use std::io::Write;

    /// A single `[[machines]]` TOML block with all five sensor roles
    /// stubbed in, enough to satisfy `FleetConfig::load`'s enabled-machine
    /// validation without needing a real gateway.
    fn machine_toml(id: i64, name: &str, power_meter_id: i64) -> String {
        format!(
            r#"
            [[machines]]
            id = {id}
            name = "{name}"
            enabled = true
            power_meter_id = {power_meter_id}

            [machines.sensors.power_meter]
            slave_id = 1
            gateway = {{ ip = "10.0.0.1", port = 502 }}
            params = [
                {{ name = "kwh", address = 100, length = 2, encoding = "float32-be" }}
            ]

            [machines.sensors.temperature]
            slave_id = 2
            gateway = {{ ip = "10.0.0.1", port = 502 }}
            params = [
                {{ name = "temperature", address = 200, length = 1, encoding = "uint16-be" }}
            ]

            [machines.sensors.on_contact]
            slave_id = 3
            gateway = {{ ip = "10.0.0.1", port = 502 }}
            params = [
                {{ name = "on_contact", address = 300, length = 1, encoding = "uint16-be" }}
            ]

            [machines.sensors.alarm_contact]
            slave_id = 4
            gateway = {{ ip = "10.0.0.1", port = 502 }}
            params = [
                {{ name = "alarm_contact", address = 400, length = 1, encoding = "uint16-be" }}
            ]

            [machines.sensors.capstan_speed]
            slave_id = 5
            gateway = {{ ip = "10.0.0.1", port = 502 }}
            params = [
                {{ name = "capstan_speed", address = 500, length = 1, encoding = "uint16-be" }}
            ]
            "#,
            id = id,
            name = name,
            power_meter_id = power_meter_id,
        )
    }

    fn write_fleet_config(blocks: &[String]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for block in blocks {
            write!(f, "{}", block).unwrap();
        }
        f
    }

    fn rec(
        id: i64,
        machine_id: i64,
        ts: DateTime<Utc>,
        condition: Condition,
        kwh: i64,
        last_ts: Option<DateTime<Utc>>,
        last_condition: Option<Condition>,
        last_kwh: Option<i64>,
    ) -> ConditionRecord {
        ConditionRecord {
            id,
            machine_id,
            current_timestamp: ts,
            current_condition: condition,
            current_kwh: Decimal::new(kwh, 0),
            last_timestamp: last_ts,
            last_condition,
            last_kwh: last_kwh.map(|v| Decimal::new(v, 0)),
        }
    }

    fn seed_scenario_5(base: DateTime<Utc>) -> Vec<ConditionRecord> {
        vec![
            rec(
                1,
                1,
                base + Duration::hours(10),
                Condition::MachineProduction,
                100,
                None,
                None,
                Some(98),
            ),
            rec(
                2,
                1,
                base + Duration::hours(12),
                Condition::Iddle,
                110,
                None,
                None,
                Some(110),
            ),
            rec(
                3,
                1,
                base + Duration::hours(14),
                Condition::MachineProduction,
                115,
                None,
                None,
                Some(115),
            ),
            rec(
                4,
                1,
                base + Duration::hours(16),
                Condition::MachineProduction,
                125,
                None,
                None,
                Some(115),
            ),
        ]
    }

    #[test]
    fn seed_scenario_5_hours_and_kwh() {
        let base = Utc::now();
        let records = seed_scenario_5(base);

        let hours = hours_by_condition(&records);
        assert_eq!(hours.production, 4.0);
        assert_eq!(hours.iddle, 2.0);
        assert_eq!(hours.heating_up, 0.0);
        assert_eq!(hours.production + hours.iddle + hours.heating_up, 6.0);

        let kwh = kwh_by_condition(&records);
        assert_eq!(kwh.production, 22.0);
        assert_eq!(kwh.iddle, 5.0);
        assert_eq!(kwh.heating_up, 0.0);
        assert_eq!(kwh.production + kwh.iddle + kwh.heating_up, 27.0);
    }

    #[test]
    fn machine_off_time_is_excluded_from_totals() {
        let base = Utc::now();
        let records = vec![
            rec(1, 1, base, Condition::MachineOff, 0, None, None, None),
            rec(
                2,
                1,
                base + Duration::hours(3),
                Condition::Iddle,
                10,
                None,
                None,
                Some(10),
            ),
            rec(
                3,
                1,
                base + Duration::hours(5),
                Condition::Iddle,
                15,
                None,
                None,
                Some(15),
            ),
        ];
        let hours = hours_by_condition(&records);
        assert_eq!(hours.iddle, 2.0);
        assert_eq!(hours.heating_up + hours.production, 0.0);
    }

    #[test]
    fn lead_in_uses_last_timestamp_of_the_first_record() {
        let base = Utc::now();
        let records = vec![
            rec(
                1,
                1,
                base + Duration::hours(1),
                Condition::HeatingUp,
                0,
                Some(base), // lead-in from before the window
                None,
                None,
            ),
            rec(
                2,
                1,
                base + Duration::hours(2),
                Condition::Iddle,
                5,
                None,
                None,
                Some(5),
            ),
        ];
        let hours = hours_by_condition(&records);
        // start = last_timestamp (base), end = next.current_timestamp (base+2h)
        assert_eq!(hours.heating_up, 2.0);
    }

    #[tokio::test]
    async fn empty_day_writes_zeros() {
        let store = Arc::new(FakeStore::new());
        let fleet = write_fleet_config(&[machine_toml(1, "M1", 1)]);
        let calc = DailyCalculator::new(store.clone(), fleet.path().to_path_buf());
        let date = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        calc.run_for_day(date).await.unwrap();
        let summary = store.find_daily_summary(1, date).await.unwrap().unwrap();
        assert_eq!(summary.total_hours, 0.0);
        assert_eq!(summary.total_kwh, 0.0);
        assert!(summary.is_one_block);
    }

    #[tokio::test]
    async fn disabled_machine_is_skipped() {
        let store = Arc::new(FakeStore::new());
        let fleet = write_fleet_config(&[r#"
            [[machines]]
            id = 2
            name = "Disabled"
            enabled = false
            power_meter_id = 1
            "#
        .to_string()]);
        let calc = DailyCalculator::new(store.clone(), fleet.path().to_path_buf());
        let date = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        calc.run_for_day(date).await.unwrap();
        assert!(store.find_daily_summary(2, date).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shared_meter_with_two_production_blocks_splits_kwh_not_hours() {
        let store = Arc::new(FakeStore::new());
        let fleet = write_fleet_config(&[machine_toml(1, "A", 7), machine_toml(2, "B", 7)]);
        let calc = DailyCalculator::new(store.clone(), fleet.path().to_path_buf());

        let date = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        let (from, _to) = local_day_bounds_utc(date);

        {
            let mut conditions = store.conditions.lock().unwrap();
            conditions.push(rec(
                1,
                1,
                from + Duration::hours(2),
                Condition::MachineProduction,
                50,
                None,
                None,
                Some(40),
            ));
            conditions.push(rec(
                2,
                1,
                from + Duration::hours(4),
                Condition::Iddle,
                60,
                None,
                None,
                Some(60),
            ));
            conditions.push(rec(
                3,
                2,
                from + Duration::hours(1),
                Condition::MachineProduction,
                20,
                None,
                None,
                Some(10),
            ));
            conditions.push(rec(
                4,
                2,
                from + Duration::hours(3),
                Condition::Iddle,
                25,
                None,
                None,
                Some(25),
            ));
        }

        calc.run_for_day(date).await.unwrap();
        let summary_a = store.find_daily_summary(1, date).await.unwrap().unwrap();
        assert!(!summary_a.is_one_block);
        assert_eq!(summary_a.production_hours, 2.0); // hours untouched
        assert_eq!(summary_a.production_kwh, (60.0 - 40.0) / 2.0);
    }

    #[test]
    fn local_date_of_a_fresh_local_midnight_is_the_new_day() {
        let midnight_local_as_utc = Utc.with_ymd_and_hms(2026, 7, 31, 17, 0, 0).unwrap();
        assert_eq!(
            local_date(midnight_local_as_utc),
            NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
        );
    }

    #[test]
    fn local_day_bounds_are_seven_hours_ahead_of_utc() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let (start, end) = local_day_bounds_utc(date);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 7, 31, 17, 0, 0).unwrap());
        assert_eq!(
            end.date_naive(),
            NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
        );
    }
}
