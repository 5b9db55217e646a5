//! Fleet configuration loading, used to enumerate enabled machines each
//! cycle. Adapted from the original `config.rs`, which merges a `DeviceConfig`
//! over an optional template before handing back a `Device`. Here the
//! machine tree is flat (gateways and sensors are declared inline per
//! machine) but the same "parse, then validate the domain invariant"
//! two-step survives: the static file only describes *shape*, so doubling
//! as the authority for "is this machine enabled" would be wrong — that
//! flag lives right on `Machine` and is read straight through.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::model::Machine;

#[derive(Deserialize)]
struct FleetConfigFile {
    #[serde(default)]
    machines: Vec<Machine>,
}

/// The static part of the fleet layout: gateways, sensors, and parameter
/// maps. Configuration entities are read-only to the worker and refreshed
/// every cycle, so `load` is cheap enough to call on every cycle.
#[derive(Clone, Debug)]
pub struct FleetConfig {
    pub machines: Vec<Machine>,
}

impl FleetConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading fleet config {}", path.display()))?;
        let file: FleetConfigFile = toml::from_str(&raw)
            .with_context(|| format!("parsing fleet config {}", path.display()))?;

        for machine in &file.machines {
            if machine.enabled && !machine.has_all_roles() {
                bail!(
                    "machine {} (`{}`) is enabled but missing one or more sensor roles",
                    machine.id,
                    machine.name
                );
            }
        }

        Ok(FleetConfig {
            machines: file.machines,
        })
    }

    /// Enabled machines, in file declaration order — the grouper's
    /// machine discovery order.
    pub fn enabled_machines(&self) -> impl Iterator<Item = &Machine> {
        self.machines.iter().filter(|m| m.enabled)
    }
}
