//! Entities from the data model: configuration trees, per-cycle readings,
//! and the persisted record shapes. Mirrors `device.rs`'s original split
//! between "declared configuration" and "resolved runtime shape", but with
//! a closed set of sensor roles instead of a free-form register map.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// A Modbus-TCP gateway, identified by `ip:port`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub struct GatewayEndpoint {
    pub ip: String,
    pub port: u16,
}

impl GatewayEndpoint {
    pub fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Numeric encoding of a parameter's register buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    Float32Be,
    Float32Le,
    Int16Be,
    Int16Le,
    Uint16Be,
    Uint16Le,
    Int32Be,
    Int32Le,
    Uint32Be,
    Uint32Le,
}

impl Encoding {
    /// Register count required to hold this encoding, used to size the read.
    pub fn register_len(self) -> u16 {
        use Encoding::*;
        match self {
            Int16Be | Int16Le | Uint16Be | Uint16Le => 1,
            Float32Be | Float32Le | Int32Be | Int32Le | Uint32Be | Uint32Le => 2,
        }
    }

    /// Parses the declared wire tag (e.g. `"float32-be"`), as written in the
    /// fleet config file. Unlike a derived `serde` enum, this surfaces an
    /// `UnsupportedEncoding` error on an unknown tag instead of a
    /// generic deserialization failure.
    pub fn parse_tag(tag: &str) -> Result<Self, crate::error::RegisterError> {
        use Encoding::*;
        Ok(match tag {
            "float32-be" => Float32Be,
            "float32-le" => Float32Le,
            "int16-be" => Int16Be,
            "int16-le" => Int16Le,
            "uint16-be" => Uint16Be,
            "uint16-le" => Uint16Le,
            "int32-be" => Int32Be,
            "int32-le" => Int32Le,
            "uint32-be" => Uint32Be,
            "uint32-le" => Uint32Le,
            other => {
                return Err(crate::error::RegisterError::UnsupportedEncoding(
                    other.to_string(),
                ))
            }
        })
    }
}

impl<'de> Deserialize<'de> for Encoding {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Encoding::parse_tag(&s).map_err(serde::de::Error::custom)
    }
}

/// One scalar parameter read from a sensor.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ParameterMapping {
    pub name: String,
    #[serde(default = "default_true")]
    pub save: bool,
    pub address: u16,
    pub length: u16,
    #[serde(default = "default_formula")]
    pub formula: f64,
    pub encoding: Encoding,
}

fn default_true() -> bool {
    true
}

fn default_formula() -> f64 {
    1.0
}

/// One Modbus unit addressed via one gateway.
#[derive(Clone, Debug, Deserialize)]
pub struct Sensor {
    pub slave_id: u8,
    pub gateway: GatewayEndpoint,
    pub params: Vec<ParameterMapping>,
}

/// The five physical sensors that make up a machine's instrumentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum SensorRole {
    PowerMeter,
    Temperature,
    OnContact,
    AlarmContact,
    CapstanSpeed,
}

impl SensorRole {
    /// Canonical discovery order used by the grouper.
    pub const ALL: [SensorRole; 5] = [
        SensorRole::PowerMeter,
        SensorRole::Temperature,
        SensorRole::OnContact,
        SensorRole::AlarmContact,
        SensorRole::CapstanSpeed,
    ];
}

impl fmt::Display for SensorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SensorRole::PowerMeter => "power_meter",
            SensorRole::Temperature => "temperature",
            SensorRole::OnContact => "on_contact",
            SensorRole::AlarmContact => "alarm_contact",
            SensorRole::CapstanSpeed => "capstan_speed",
        };
        write!(f, "{}", s)
    }
}

/// A machine in the fleet. An enabled machine must have all five
/// sensor roles populated; this is enforced at config-load time, not here.
#[derive(Clone, Debug, Deserialize)]
pub struct Machine {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub power_meter_id: i64,
    #[serde(default)]
    pub sensors: BTreeMap<SensorRoleKey, Sensor>,
}

/// `SensorRole` as a map key that deserializes from the config's role names,
/// tolerating the `capstand_speed` typo seen in real fleet files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SensorRoleKey(pub SensorRole);

impl<'de> Deserialize<'de> for SensorRoleKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let role = match s.as_str() {
            "power_meter" => SensorRole::PowerMeter,
            "temperature" => SensorRole::Temperature,
            "on_contact" => SensorRole::OnContact,
            "alarm_contact" => SensorRole::AlarmContact,
            "capstan_speed" | "capstand_speed" => SensorRole::CapstanSpeed,
            other => {
                return Err(serde::de::Error::custom(format!(
                    "unknown sensor role `{}`",
                    other
                )))
            }
        };
        Ok(SensorRoleKey(role))
    }
}

impl Machine {
    /// An enabled machine must carry all five roles; used as a config-load
    /// sanity check.
    pub fn has_all_roles(&self) -> bool {
        SensorRole::ALL
            .iter()
            .all(|role| self.sensors.contains_key(&SensorRoleKey(*role)))
    }
}

/// Derived per cycle: one sensor's worth of work for one machine.
#[derive(Clone, Debug)]
pub struct SensorTask {
    pub machine_id: i64,
    pub machine_name: String,
    pub role: SensorRole,
    pub slave_id: u8,
    pub params: Vec<ParameterMapping>,
}

/// Derived per cycle: all tasks that share a gateway.
#[derive(Clone, Debug)]
pub struct GatewayGroup {
    pub endpoint: GatewayEndpoint,
    pub tasks: Vec<SensorTask>,
}

/// Result of reading one sensor for one cycle.
#[derive(Clone, Debug)]
pub struct SensorReading {
    pub machine_id: i64,
    pub machine_name: String,
    pub role: SensorRole,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
    pub success: bool,
    pub error: Option<String>,
}

/// Aggregation across a machine's five sensor readings at one cycle.
/// Missing values are `None`, not zero — the classifier is the one place
/// that treats a missing value as 0.
#[derive(Clone, Debug)]
pub struct MachineReading {
    pub machine_id: i64,
    pub machine_name: String,
    pub timestamp: DateTime<Utc>,
    pub kwh: Option<f64>,
    pub temperature: Option<f64>,
    pub on_contact: Option<f64>,
    pub alarm_contact: Option<f64>,
    pub capstan_speed: Option<f64>,
}

impl MachineReading {
    pub fn on_contact_or_zero(&self) -> f64 {
        self.on_contact.unwrap_or(0.0)
    }

    pub fn alarm_contact_or_zero(&self) -> f64 {
        self.alarm_contact.unwrap_or(0.0)
    }

    pub fn capstan_speed_or_zero(&self) -> f64 {
        self.capstan_speed.unwrap_or(0.0)
    }
}

/// Inferred operational state of a machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "PascalCase")]
pub enum Condition {
    MachineOff,
    HeatingUp,
    Iddle,
    MachineProduction,
    Unknown,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Condition::MachineOff => "MachineOFF",
            Condition::HeatingUp => "HeatingUp",
            Condition::Iddle => "Iddle",
            Condition::MachineProduction => "MachineProduction",
            Condition::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Append-only condition-transition record.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ConditionRecord {
    pub id: i64,
    pub machine_id: i64,
    pub current_timestamp: DateTime<Utc>,
    pub current_condition: Condition,
    pub current_kwh: Decimal,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub last_condition: Option<Condition>,
    pub last_kwh: Option<Decimal>,
}

/// Append-only per-cycle raw snapshot.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct LogHistoryRecord {
    pub machine_id: i64,
    pub timestamp: DateTime<Utc>,
    pub on_contact: Option<i32>,
    pub alarm_contact: Option<i32>,
    pub temperature: Option<Decimal>,
    pub kwh: Option<Decimal>,
    pub capstan_speed: Option<Decimal>,
}

/// One machine's daily roll-up.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct DailySummary {
    pub machine_id: i64,
    pub date: NaiveDate,
    pub total_hours: f64,
    pub total_kwh: f64,
    pub heating_up_hours: f64,
    pub heating_up_kwh: f64,
    pub iddle_hours: f64,
    pub iddle_kwh: f64,
    pub production_hours: f64,
    pub production_kwh: f64,
    pub is_one_block: bool,
}

/// General, dynamically-reloadable configuration row.
#[derive(Clone, Debug)]
pub struct GeneralConfig {
    pub log_freq_minutes: u32,
    pub license_key: String,
}
