//! Condition classifier. Pure function from an aggregated reading and the
//! dwell predicate to one of the five conditions, evaluated via a fixed
//! precedence table. No prior precedent for a state-inference table
//! exists in the pack; kept as a free function, matching the prevailing
//! preference for small pure functions (`merge_read_regs`) over trait
//! objects where no polymorphism is needed.

use crate::model::{Condition, MachineReading};

/// Classifies `reading` given the dwell predicate result `hot`. Missing
/// numeric values are treated as 0.
pub fn classify(reading: &MachineReading, hot: bool) -> Condition {
    let on_contact = reading.on_contact_or_zero();
    let alarm_contact = reading.alarm_contact_or_zero();
    let capstan_speed = reading.capstan_speed_or_zero();

    if on_contact == 0.0 {
        return Condition::MachineOff;
    }

    if !hot {
        return Condition::HeatingUp;
    }

    if alarm_contact == 0.0 {
        return Condition::Iddle;
    }

    if capstan_speed == 1.0 {
        Condition::MachineProduction
    } else if capstan_speed == 0.0 {
        Condition::Iddle
    } else {
        Condition::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(
        on_contact: Option<f64>,
        alarm_contact: Option<f64>,
        capstan_speed: Option<f64>,
        temperature: Option<f64>,
    ) -> MachineReading {
        MachineReading {
            machine_id: 1,
            machine_name: "M1".into(),
            timestamp: Utc::now(),
            kwh: None,
            temperature,
            on_contact,
            alarm_contact,
            capstan_speed,
        }
    }

    #[test]
    fn off_takes_precedence_over_everything() {
        let r = reading(Some(0.0), Some(1.0), Some(1.0), Some(450.0));
        assert_eq!(classify(&r, true), Condition::MachineOff);
        assert_eq!(classify(&r, false), Condition::MachineOff);
    }

    #[test]
    fn heating_up_when_on_but_not_yet_hot() {
        let r = reading(Some(1.0), None, None, Some(290.0));
        assert_eq!(classify(&r, false), Condition::HeatingUp);
    }

    #[test]
    fn production_requires_hot_alarm_and_capstan_running() {
        let r = reading(Some(1.0), Some(1.0), Some(1.0), Some(310.0));
        assert_eq!(classify(&r, true), Condition::MachineProduction);
    }

    #[test]
    fn iddle_via_alarm_off() {
        let r = reading(Some(1.0), Some(0.0), Some(1.0), Some(310.0));
        assert_eq!(classify(&r, true), Condition::Iddle);
    }

    #[test]
    fn iddle_via_capstan_stopped() {
        let r = reading(Some(1.0), Some(1.0), Some(0.0), Some(310.0));
        assert_eq!(classify(&r, true), Condition::Iddle);
    }

    #[test]
    fn unknown_when_capstan_is_neither_zero_nor_one() {
        let r = reading(Some(1.0), Some(1.0), Some(0.5), Some(310.0));
        assert_eq!(classify(&r, true), Condition::Unknown);
    }

    #[test]
    fn missing_values_are_treated_as_zero() {
        let r = reading(Some(1.0), None, None, Some(310.0));
        // alarm_contact missing -> 0 -> Iddle (variant 1)
        assert_eq!(classify(&r, true), Condition::Iddle);
    }

    #[test]
    fn same_inputs_always_classify_the_same_way() {
        let r = reading(Some(1.0), Some(1.0), Some(1.0), Some(310.0));
        let a = classify(&r, true);
        let b = classify(&r, true);
        assert_eq!(a, b);
    }
}
