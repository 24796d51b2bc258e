use serde::Serialize;

// ---------------------------------------------------------------------------
// Driver traits
// ---------------------------------------------------------------------------

/// One combined temperature/humidity measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Climate {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity, percent.
    pub humidity: f32,
}

/// Nutrient concentrations in mg/kg as reported by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nutrients {
    pub nitrogen: u16,
    pub phosphorus: u16,
    pub potassium: u16,
}

/// A device that measures temperature and humidity in a single transaction.
/// A failed measurement blanks both channels.
pub trait ClimateSensor: Send {
    fn measure(&mut self) -> anyhow::Result<Climate>;
}

/// Soil moisture as a 0..=100 percentage.
pub trait MoistureSensor: Send {
    fn read_percent(&mut self) -> anyhow::Result<f32>;
}

/// N/P/K probe answering with all three registers at once.
pub trait NutrientSensor: Send {
    fn read(&mut self) -> anyhow::Result<Nutrients>;
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One poll of every channel.  `None` means the channel is absent or its
/// read failed; the two are deliberately indistinguishable here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub moisture: Option<f32>,
    pub nitrogen: Option<u16>,
    pub phosphorus: Option<u16>,
    pub potassium: Option<u16>,
}

impl Snapshot {
    /// Number of channels that produced a value.
    pub fn channels_present(&self) -> usize {
        [
            self.temperature.is_some(),
            self.humidity.is_some(),
            self.moisture.is_some(),
            self.nitrogen.is_some(),
            self.phosphorus.is_some(),
            self.potassium.is_some(),
        ]
        .into_iter()
        .filter(|p| *p)
        .count()
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// The set of attached sensor devices.  Any slot may be empty.
#[derive(Default)]
pub struct SensorFrame {
    climate: Option<Box<dyn ClimateSensor>>,
    moisture: Option<Box<dyn MoistureSensor>>,
    nutrients: Option<Box<dyn NutrientSensor>>,
}

impl SensorFrame {
    /// A frame with no devices attached; every sample is all-`None`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_climate(mut self, sensor: impl ClimateSensor + 'static) -> Self {
        self.climate = Some(Box::new(sensor));
        self
    }

    pub fn with_moisture(mut self, sensor: impl MoistureSensor + 'static) -> Self {
        self.moisture = Some(Box::new(sensor));
        self
    }

    pub fn with_nutrients(mut self, sensor: impl NutrientSensor + 'static) -> Self {
        self.nutrients = Some(Box::new(sensor));
        self
    }

    /// Read every attached device once.
    ///
    /// Each device is isolated: an error (or a non-finite value) from one
    /// only blanks that device's channels.  There is no retry here; the
    /// caller's sampling cadence is the retry policy.
    pub fn sample(&mut self) -> Snapshot {
        let mut snap = Snapshot::default();

        if let Some(sensor) = self.climate.as_mut() {
            match sensor.measure() {
                Ok(c) if c.temperature.is_finite() && c.humidity.is_finite() => {
                    snap.temperature = Some(c.temperature);
                    snap.humidity = Some(c.humidity);
                }
                Ok(c) => tracing::warn!(?c, "climate read returned non-finite values"),
                Err(e) => tracing::warn!("climate read failed: {e:#}"),
            }
        }

        if let Some(sensor) = self.moisture.as_mut() {
            match sensor.read_percent() {
                Ok(m) if m.is_finite() => snap.moisture = Some(m),
                Ok(m) => tracing::warn!(moisture = m, "moisture read returned non-finite value"),
                Err(e) => tracing::warn!("moisture read failed: {e:#}"),
            }
        }

        if let Some(sensor) = self.nutrients.as_mut() {
            match sensor.read() {
                Ok(n) => {
                    snap.nitrogen = Some(n.nitrogen);
                    snap.phosphorus = Some(n.phosphorus);
                    snap.potassium = Some(n.potassium);
                }
                Err(e) => tracing::warn!("npk read failed: {e:#}"),
            }
        }

        tracing::debug!(present = snap.channels_present(), ?snap, "sensor frame sampled");
        snap
    }
}

// ===========================================================================
// Tests
// ===========================================================================
