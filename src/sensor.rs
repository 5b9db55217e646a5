//! Sensor reader. For one sensor, issues register reads, parses,
//! applies `formula`, and collects parameter values into a `SensorReading`.
//! Adapted from `Device::read`, which looped grouped register
//! requests over one slave and built up an InfluxDB line per register; here
//! the accumulation target is a `SensorReading`'s `values` map and each
//! parameter failure is swallowed rather than aborting the whole read.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tokio_modbus::prelude::*;
use tracing::warn;

use crate::model::{ParameterMapping, SensorReading, SensorTask};
use crate::pool::PooledClient;
use crate::register;

const RETRY_ATTEMPTS: u32 = 3;

/// Reads every `save == true` parameter of `task` through `client`.
/// Per-parameter failures are logged and skipped; the reading is
/// `success == true` as long as at least one parameter value was
/// collected.
pub async fn read_sensor(client: &mut PooledClient, task: &SensorTask) -> SensorReading {
    let ctx = client.context_mut();
    ctx.set_slave(Slave(task.slave_id));

    let timestamp = Utc::now();
    let mut values = BTreeMap::new();
    let mut last_error = None;

    for param in task.params.iter().filter(|p| p.save) {
        match read_one_parameter(ctx, param).await {
            Ok(value) => {
                values.insert(param.name.clone(), value);
            }
            Err(e) => {
                warn!(
                    machine = %task.machine_name,
                    role = %task.role,
                    param = %param.name,
                    error = %e,
                    "parameter read failed"
                );
                last_error = Some(e);
            }
        }
    }

    let success = !values.is_empty();
    SensorReading {
        machine_id: task.machine_id,
        machine_name: task.machine_name.clone(),
        role: task.role,
        timestamp,
        values,
        success,
        error: if success { None } else { last_error },
    }
}

/// Retries a whole sensor read with linear backoff (`attempt * 1s`) up to
/// `RETRY_ATTEMPTS` times. Returns a failed reading (not an error) once
/// all attempts exhaust.
pub async fn read_sensor_with_retry(client: &mut PooledClient, task: &SensorTask) -> SensorReading {
    let mut reading = read_sensor(client, task).await;
    let mut attempt = 1;
    while !reading.success && attempt < RETRY_ATTEMPTS {
        tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
        reading = read_sensor(client, task).await;
        attempt += 1;
    }
    reading
}

async fn read_one_parameter(
    ctx: &mut tokio_modbus::client::Context,
    param: &ParameterMapping,
) -> Result<f64, String> {
    let words = match tokio::time::timeout(
        crate::pool::REQUEST_TIMEOUT,
        ctx.read_holding_registers(param.address, param.length),
    )
    .await
    {
        Ok(Ok(Ok(words))) => words,
        Ok(Ok(Err(exception))) => return Err(format!("modbus exception: {exception:?}")),
        Ok(Err(io_err)) => return Err(format!("modbus io error: {io_err}")),
        Err(_) => return Err("modbus request timed out".to_string()),
    };

    let buf = register::pack_registers(&words);
    register::parse(&buf, param.encoding)
        .map(|v| v * param.formula)
        .map_err(|e| e.to_string())
}
