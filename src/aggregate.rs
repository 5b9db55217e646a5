//! Folds a cycle's per-sensor `SensorReading`s into one `MachineReading`
//! per machine. Shared by the polling scheduler and the log history store,
//! which performs this same aggregation over its batch before writing.

use std::collections::BTreeMap;

use crate::model::{MachineReading, SensorReading, SensorRole};

/// Per-machine aggregation produces the union of `values` maps across that
/// machine's five sensor readings (last writer wins on key collision; only
/// successful readings contribute); the machine timestamp is the first
/// successful reading's timestamp.
pub fn aggregate_readings(readings: &[SensorReading]) -> Vec<MachineReading> {
    let mut by_machine: BTreeMap<i64, MachineReading> = BTreeMap::new();

    for reading in readings.iter().filter(|r| r.success) {
        let entry = by_machine.entry(reading.machine_id).or_insert_with(|| {
            MachineReading {
                machine_id: reading.machine_id,
                machine_name: reading.machine_name.clone(),
                timestamp: reading.timestamp,
                kwh: None,
                temperature: None,
                on_contact: None,
                alarm_contact: None,
                capstan_speed: None,
            }
        });

        match reading.role {
            SensorRole::PowerMeter => {
                if let Some(v) = reading.values.get("kwh") {
                    entry.kwh = Some(*v);
                }
            }
            SensorRole::Temperature => {
                if let Some(v) = reading.values.get("temperature") {
                    entry.temperature = Some(*v);
                }
            }
            SensorRole::OnContact => {
                if let Some(v) = reading.values.get("on_contact") {
                    entry.on_contact = Some(*v);
                }
            }
            SensorRole::AlarmContact => {
                if let Some(v) = reading.values.get("alarm_contact") {
                    entry.alarm_contact = Some(*v);
                }
            }
            SensorRole::CapstanSpeed => {
                if let Some(v) = reading
                    .values
                    .get("capstan_speed")
                    .or_else(|| reading.values.get("capstand_speed"))
                {
                    entry.capstan_speed = Some(*v);
                }
            }
        }
    }

    by_machine.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap as Map;

    fn reading(machine_id: i64, role: SensorRole, key: &str, value: f64, success: bool) -> SensorReading {
        let mut values = Map::new();
        if success {
            values.insert(key.to_string(), value);
        }
        SensorReading {
            machine_id,
            machine_name: "M".into(),
            role,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            values,
            success,
            error: None,
        }
    }

    #[test]
    fn merges_all_five_roles_into_one_machine_reading() {
        let readings = vec![
            reading(1, SensorRole::PowerMeter, "kwh", 10.0, true),
            reading(1, SensorRole::Temperature, "temperature", 300.0, true),
            reading(1, SensorRole::OnContact, "on_contact", 1.0, true),
            reading(1, SensorRole::AlarmContact, "alarm_contact", 1.0, true),
            reading(1, SensorRole::CapstanSpeed, "capstan_speed", 1.0, true),
        ];
        let agg = aggregate_readings(&readings);
        assert_eq!(agg.len(), 1);
        assert_eq!(agg[0].kwh, Some(10.0));
        assert_eq!(agg[0].temperature, Some(300.0));
        assert_eq!(agg[0].capstan_speed, Some(1.0));
    }

    #[test]
    fn failed_readings_do_not_contribute() {
        let readings = vec![
            reading(1, SensorRole::OnContact, "on_contact", 1.0, false),
            reading(1, SensorRole::AlarmContact, "alarm_contact", 1.0, true),
        ];
        let agg = aggregate_readings(&readings);
        assert_eq!(agg[0].on_contact, None);
        assert_eq!(agg[0].alarm_contact, Some(1.0));
    }

    #[test]
    fn accepts_the_capstand_speed_typo() {
        let readings = vec![reading(1, SensorRole::CapstanSpeed, "capstand_speed", 1.0, true)];
        let agg = aggregate_readings(&readings);
        assert_eq!(agg[0].capstan_speed, Some(1.0));
    }

    #[test]
    fn distinct_machines_produce_distinct_entries() {
        let readings = vec![
            reading(1, SensorRole::OnContact, "on_contact", 1.0, true),
            reading(2, SensorRole::OnContact, "on_contact", 0.0, true),
        ];
        let agg = aggregate_readings(&readings);
        assert_eq!(agg.len(), 2);
    }
}
