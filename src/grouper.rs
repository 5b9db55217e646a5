//! Grouper. Pure function folding a fleet configuration into
//! per-gateway task lists. Adapted from `merge_read_regs`
//! idea of turning a configuration shape into the smallest set of grouped
//! work items, generalized from "registers on one connection" to "sensor
//! tasks on one gateway, across the whole fleet".

use std::collections::BTreeMap;

use crate::model::{GatewayEndpoint, GatewayGroup, SensorRole, SensorTask};

/// A grouper-facing projection of `model::Machine` (role -> sensor as a
/// lookup instead of the config file's map representation), so this module
/// stays a pure function over plain data with no config-parsing concerns.
#[derive(Clone, Debug)]
pub struct FleetMachine {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub power_meter_id: i64,
    pub sensors: Vec<(SensorRole, FleetMachineSensor)>,
}

#[derive(Clone, Debug)]
pub struct FleetMachineSensor {
    pub slave_id: u8,
    pub gateway: GatewayEndpoint,
    pub params: Vec<crate::model::ParameterMapping>,
}

impl FleetMachine {
    pub fn sensor(&self, role: SensorRole) -> Option<&FleetMachineSensor> {
        self.sensors
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, s)| s)
    }
}

impl From<&crate::model::Machine> for FleetMachine {
    fn from(m: &crate::model::Machine) -> Self {
        FleetMachine {
            id: m.id,
            name: m.name.clone(),
            enabled: m.enabled,
            power_meter_id: m.power_meter_id,
            sensors: m
                .sensors
                .iter()
                .map(|(role_key, sensor)| {
                    (
                        role_key.0,
                        FleetMachineSensor {
                            slave_id: sensor.slave_id,
                            gateway: sensor.gateway.clone(),
                            params: sensor.params.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Folds every enabled machine's five sensors into gateway-keyed groups.
/// Order within a group follows machine discovery order (the input slice's
/// order) then the canonical role ordering (`SensorRole::ALL`). O(N).
pub fn group_by_gateway(machines: &[FleetMachine]) -> Vec<GatewayGroup> {
    let mut groups: BTreeMap<String, GatewayGroup> = BTreeMap::new();

    for machine in machines.iter().filter(|m| m.enabled) {
        for role in SensorRole::ALL {
            let Some(sensor) = machine.sensor(role) else {
                continue;
            };
            let task = SensorTask {
                machine_id: machine.id,
                machine_name: machine.name.clone(),
                role,
                slave_id: sensor.slave_id,
                params: sensor.params.clone(),
            };
            groups
                .entry(sensor.gateway.key())
                .or_insert_with(|| GatewayGroup {
                    endpoint: sensor.gateway.clone(),
                    tasks: Vec::new(),
                })
                .tasks
                .push(task);
        }
    }

    groups.into_values().collect()
}
