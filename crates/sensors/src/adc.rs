//! Capacitive soil moisture through an ADS1115 16-bit ADC over I2C.
//!
//! Reads one single-ended channel at PGA ±4.096 V, 128 SPS, single-shot
//! mode, and converts the raw count to a 0..=100 moisture percentage using
//! dry/wet calibration endpoints.

// ── ADS1115 config register ─────────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS       - write 1 to start single-shot conversion
//   [14:12] MUX      - input multiplexer (channel selection)
//   [11:9]  PGA      - programmable gain amplifier
//   [8]     MODE     - 0 = continuous, 1 = single-shot
//   [7:5]   DR       - data rate
//   [4:2]   COMP_*   - comparator mode/polarity/latch
//   [1:0]   COMP_QUE - 11 = disable comparator (default)

/// OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot),
/// DR=100 (128 SPS), COMP_QUE=11 (comparator off).
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

const MUX_SHIFT: u8 = 12;
/// AIN0..AIN3 against GND.
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// Highest single-ended channel index.
pub const MAX_CHANNEL: u8 = 3;

/// Largest single-ended conversion result (15-bit unsigned).
pub const ADS1115_MAX: i32 = 32767;

/// Config register value for a single-ended read on `channel`.
pub fn config_for_channel(channel: u8) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[usize::from(channel.min(MAX_CHANNEL))] << MUX_SHIFT)
}

/// Set in a config register read-back once no conversion is in progress.
const OS_READY_BIT: u16 = 1 << 15;

/// Read the config register via `read_config` up to `attempts` times,
/// sleeping `pause` between reads, until the OS bit reports ready.
/// `Ok(false)` means the device never flagged ready.
#[cfg_attr(not(feature = "adc"), allow(dead_code))]
fn poll_ready<E>(
    attempts: u32,
    pause: std::time::Duration,
    mut read_config: impl FnMut() -> Result<u16, E>,
) -> Result<bool, E> {
    for attempt in 0..attempts {
        if read_config()? & OS_READY_BIT != 0 {
            return Ok(true);
        }
        if attempt + 1 < attempts {
            std::thread::sleep(pause);
        }
    }
    Ok(false)
}

// ── Calibration ─────────────────────────────────────────────────────────────

/// Raw ADC counts measured in dry air and in water.  Capacitive probes read
/// *higher* when dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub raw_dry: i32,
    pub raw_wet: i32,
}

impl Default for Calibration {
    /// Full scale is bone dry, zero is saturated.
    fn default() -> Self {
        Self {
            raw_dry: ADS1115_MAX,
            raw_wet: 0,
        }
    }
}

/// Convert a raw reading to moisture percent, clamped to 0..=100 and
/// rounded to two decimals.  A degenerate calibration yields 0.
pub fn moisture_percent(raw: i32, cal: Calibration) -> f32 {
    let range = cal.raw_dry - cal.raw_wet;
    if range == 0 {
        return 0.0;
    }
    let pct = f64::from(cal.raw_dry - raw) * 100.0 / f64::from(range);
    ((pct.clamp(0.0, 100.0) * 100.0).round() / 100.0) as f32
}

// ── Driver ──────────────────────────────────────────────────────────────────

#[cfg(feature = "adc")]
pub use driver::Ads1115Moisture;

#[cfg(feature = "adc")]
mod driver {
    use rppal::i2c::I2c;
    use std::{thread, time::Duration};

    use super::{config_for_channel, moisture_percent, poll_ready, Calibration, MAX_CHANNEL};
    use crate::MoistureSensor;

    const REG_CONVERSION: u8 = 0x00;
    const REG_CONFIG: u8 = 0x01;

    /// ~7.8 ms at 128 SPS.
    const CONVERSION_WAIT: Duration = Duration::from_millis(9);
    const READY_POLLS: u32 = 3;
    const READY_PAUSE: Duration = Duration::from_millis(2);

    /// ADS1115 moisture channel backed by `rppal::i2c`.
    pub struct Ads1115Moisture {
        i2c: I2c,
        channel: u8,
        cal: Calibration,
    }

    impl Ads1115Moisture {
        /// Open I2C bus 1 with the ADS1115 at `addr`.
        pub fn new(addr: u16, channel: u8, cal: Calibration) -> anyhow::Result<Self> {
            anyhow::ensure!(
                channel <= MAX_CHANNEL,
                "ADS1115 channel {channel} out of range (0..={MAX_CHANNEL})"
            );

            let mut i2c = I2c::new()?;
            i2c.set_slave_address(addr)?;

            tracing::info!(
                addr = format_args!("0x{addr:02x}"),
                channel,
                ?cal,
                "ads1115 initialised"
            );

            Ok(Self { i2c, channel, cal })
        }

        fn register(&mut self, reg: u8) -> anyhow::Result<u16> {
            let mut buf = [0u8; 2];
            self.i2c.block_read(reg, &mut buf)?;
            Ok(u16::from_be_bytes(buf))
        }

        /// Start a single-shot conversion and return the signed result.
        fn read_raw(&mut self) -> anyhow::Result<i16> {
            let config = config_for_channel(self.channel);
            self.i2c.block_write(REG_CONFIG, &config.to_be_bytes())?;
            thread::sleep(CONVERSION_WAIT);

            if !poll_ready(READY_POLLS, READY_PAUSE, || self.register(REG_CONFIG))? {
                tracing::debug!(channel = self.channel, "conversion not flagged ready");
            }
            let raw = self.register(REG_CONVERSION)?;
            Ok(i16::from_be_bytes(raw.to_be_bytes()))
        }
    }

    impl MoistureSensor for Ads1115Moisture {
        fn read_percent(&mut self) -> anyhow::Result<f32> {
            let raw = i32::from(self.read_raw()?).max(0);
            Ok(moisture_percent(raw, self.cal))
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
