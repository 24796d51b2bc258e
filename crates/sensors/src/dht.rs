//! DHT11 temperature/humidity through the Linux IIO subsystem.
//!
//! With the `dht11` overlay loaded the kernel exposes the sensor under
//! `/sys/bus/iio/devices/iio:deviceN/`.  Each read of `in_temp_input` or
//! `in_humidityrelative_input` triggers a fresh bus transaction and returns
//! milli-units; timing or checksum faults surface as `EIO`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Climate, ClimateSensor};

const TEMP_FILE: &str = "in_temp_input";
const HUMIDITY_FILE: &str = "in_humidityrelative_input";

/// DHT11 bound to one IIO device directory.
#[derive(Debug, Clone)]
pub struct IioDht {
    dir: PathBuf,
}

impl IioDht {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ClimateSensor for IioDht {
    fn measure(&mut self) -> Result<Climate> {
        let temperature = read_milli(&self.dir.join(TEMP_FILE))?;
        let humidity = read_milli(&self.dir.join(HUMIDITY_FILE))?;
        Ok(Climate {
            temperature,
            humidity,
        })
    }
}

/// Read an integer milli-unit sysfs attribute and scale it to units.
fn read_milli(path: &Path) -> Result<f32> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let milli: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid value {:?} in {}", raw.trim(), path.display()))?;
    Ok(milli as f32 / 1000.0)
}

// ===========================================================================
// Tests
// ===========================================================================
