//! Simulated sensor channels for running the logger without hardware.
//!
//! Every channel is a mean-reverting random walk with Gaussian read noise.
//! Each read can also fail outright with a scenario-dependent probability,
//! which exercises the per-channel isolation in [`crate::SensorFrame`].

use std::fmt;

use anyhow::bail;

use crate::{Climate, ClimateSensor, MoistureSensor, NutrientSensor, Nutrients};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profile selected by `[sensors] scenario`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Low noise, rare faults.
    Stable,
    /// Moisture drifts toward dry over the run.
    Drying,
    /// High noise and roughly one failed read in five per channel.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "drying" => Self::Drying,
            "flaky" => Self::Flaky,
            _ => Self::Stable,
        }
    }

    /// (noise multiplier, moisture drift per read, fault probability)
    fn params(self) -> (f64, f64, f32) {
        match self {
            Self::Stable => (1.0, 0.0, 0.005),
            Self::Drying => (1.0, -0.4, 0.02),
            Self::Flaky => (3.0, 0.0, 0.2),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Drying => write!(f, "drying"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Random walk
// ---------------------------------------------------------------------------

/// One evolving physical quantity.
#[derive(Debug, Clone)]
struct Walk {
    value: f64,
    center: f64,
    min: f64,
    max: f64,
    step_sigma: f64,
    noise_sigma: f64,
    drift: f64,
    mean_reversion: f64,
}

impl Walk {
    fn new(center: f64, min: f64, max: f64, step_sigma: f64, noise_sigma: f64) -> Self {
        Self {
            value: center + gaussian(0.0, step_sigma),
            center,
            min,
            max,
            step_sigma,
            noise_sigma,
            drift: 0.0,
            mean_reversion: 0.05,
        }
    }

    /// Advance one step and return the observed (noisy, clamped) value.
    fn next(&mut self) -> f64 {
        let pull = self.mean_reversion * (self.center - self.value);
        self.center = (self.center + self.drift).clamp(self.min, self.max);
        self.value = (self.value + pull + gaussian(0.0, self.step_sigma)).clamp(self.min, self.max);
        (self.value + gaussian(0.0, self.noise_sigma)).clamp(self.min, self.max)
    }
}

fn maybe_fail(prob: f32, what: &str) -> anyhow::Result<()> {
    if fastrand::f32() < prob {
        bail!("simulated {what} fault");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Simulated DHT11: integer-resolution temperature and humidity.
pub struct SimClimate {
    temperature: Walk,
    humidity: Walk,
    fault_prob: f32,
}

impl SimClimate {
    pub fn new(scenario: Scenario) -> Self {
        let (noise, _, fault_prob) = scenario.params();
        Self {
            temperature: Walk::new(24.0, 0.0, 50.0, 0.2, 0.3 * noise),
            humidity: Walk::new(55.0, 20.0, 90.0, 0.5, 1.0 * noise),
            fault_prob,
        }
    }
}

impl ClimateSensor for SimClimate {
    fn measure(&mut self) -> anyhow::Result<Climate> {
        maybe_fail(self.fault_prob, "dht11")?;
        Ok(Climate {
            temperature: self.temperature.next().round() as f32,
            humidity: self.humidity.next().round() as f32,
        })
    }
}

/// Simulated capacitive moisture probe, percent with two decimals.
pub struct SimMoisture {
    walk: Walk,
    fault_prob: f32,
}

impl SimMoisture {
    pub fn new(scenario: Scenario) -> Self {
        let (noise, drift, fault_prob) = scenario.params();
        let mut walk = Walk::new(60.0, 0.0, 100.0, 0.8, 0.5 * noise);
        walk.drift = drift;
        Self { walk, fault_prob }
    }
}

impl MoistureSensor for SimMoisture {
    fn read_percent(&mut self) -> anyhow::Result<f32> {
        maybe_fail(self.fault_prob, "moisture adc")?;
        Ok(((self.walk.next() * 100.0).round() / 100.0) as f32)
    }
}

/// Simulated NPK probe, mg/kg.
pub struct SimNutrients {
    nitrogen: Walk,
    phosphorus: Walk,
    potassium: Walk,
    fault_prob: f32,
}

impl SimNutrients {
    pub fn new(scenario: Scenario) -> Self {
        let (noise, _, fault_prob) = scenario.params();
        Self {
            nitrogen: Walk::new(40.0, 0.0, 1999.0, 1.0, 1.0 * noise),
            phosphorus: Walk::new(25.0, 0.0, 1999.0, 1.0, 1.0 * noise),
            potassium: Walk::new(80.0, 0.0, 1999.0, 2.0, 2.0 * noise),
            fault_prob,
        }
    }
}

impl NutrientSensor for SimNutrients {
    fn read(&mut self) -> anyhow::Result<Nutrients> {
        maybe_fail(self.fault_prob, "rs485 crc")?;
        Ok(Nutrients {
            nitrogen: self.nitrogen.next().round() as u16,
            phosphorus: self.phosphorus.next().round() as u16,
            potassium: self.potassium.next().round() as u16,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
