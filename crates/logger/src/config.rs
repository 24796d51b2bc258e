//! TOML config file loading and validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use soil_sensors::adc::{ADS1115_MAX, MAX_CHANNEL};

use crate::batch::MissingValues;
use crate::control::Settings;

/// Upper bound for every interval and timeout, in seconds.
pub const MAX_INTERVAL_SEC: u64 = 3600;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_control_table")]
    pub control_table: String,
    pub filename_url: String,
    pub sensor_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Falls back to `api_key` when unset.
    pub bearer_token: Option<String>,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

fn default_control_table() -> String {
    "current_filename".into()
}

fn default_timeout_sec() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub target_readings: u32,
    pub sensor_read_interval_sec: u64,
    pub filename_cache_sec: u64,
    pub batch_size: usize,
    pub batch_interval_sec: u64,
    pub disabled_poll_interval_sec: u64,
    pub tick_ms: u64,
    pub connect_timeout_sec: u64,
    pub filename_placeholder: String,
    pub missing_values: MissingValues,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_readings: 20,
            sensor_read_interval_sec: 5,
            filename_cache_sec: 300,
            batch_size: 5,
            batch_interval_sec: 30,
            disabled_poll_interval_sec: 5,
            tick_ms: 50,
            connect_timeout_sec: 10,
            filename_placeholder: "unknown.png".into(),
            missing_values: MissingValues::Zero,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    #[default]
    Sim,
    Hardware,
}

/// Attached hardware.  A device whose locator is unset is absent and its
/// channels always read as missing.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    pub mode: SensorMode,
    pub scenario: String,
    pub dht_iio_path: Option<String>,
    pub ads1115_addr: Option<u16>,
    pub moisture_channel: u8,
    pub raw_dry: i32,
    pub raw_wet: i32,
    pub npk_uart: Option<String>,
    pub npk_baud: u32,
    pub npk_address: u8,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            mode: SensorMode::Sim,
            scenario: "stable".into(),
            dht_iio_path: None,
            ads1115_addr: None,
            moisture_channel: 0,
            raw_dry: ADS1115_MAX,
            raw_wet: 0,
            npk_uart: None,
            npk_baud: 4800,
            npk_address: 1,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusConfig {
    pub listen: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_backend(&mut errors);
        self.validate_run(&mut errors);
        self.validate_sensors(&mut errors);
        self.validate_status(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_backend(&self, errors: &mut Vec<String>) {
        let b = &self.backend;

        for (name, url) in [
            ("base_url", &b.base_url),
            ("filename_url", &b.filename_url),
            ("sensor_url", &b.sensor_url),
        ] {
            if url.trim().is_empty() {
                errors.push(format!("backend: {name} is empty"));
            } else if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!("backend: {name} '{url}' must be an http(s) url"));
            }
        }

        if b.control_table.trim().is_empty() {
            errors.push("backend: control_table is empty".into());
        } else if b.control_table.contains(['/', '?', '&']) {
            errors.push(format!(
                "backend: control_table '{}' must be a bare table name",
                b.control_table
            ));
        }

        if b.api_key.trim().is_empty() {
            errors.push("backend: api_key is empty (set it or BACKEND_API_KEY)".into());
        }
        if b.timeout_sec == 0 {
            errors.push("backend: timeout_sec must be positive".into());
        } else if b.timeout_sec > MAX_INTERVAL_SEC {
            errors.push(format!(
                "backend: timeout_sec ({}) exceeds {MAX_INTERVAL_SEC}",
                b.timeout_sec
            ));
        }
    }

    fn validate_run(&self, errors: &mut Vec<String>) {
        let r = &self.run;

        // ── Positive counts and intervals ───────────────────
        for (name, value) in [
            ("target_readings", u64::from(r.target_readings)),
            ("sensor_read_interval_sec", r.sensor_read_interval_sec),
            ("filename_cache_sec", r.filename_cache_sec),
            ("batch_size", r.batch_size as u64),
            ("batch_interval_sec", r.batch_interval_sec),
            ("disabled_poll_interval_sec", r.disabled_poll_interval_sec),
            ("tick_ms", r.tick_ms),
            ("connect_timeout_sec", r.connect_timeout_sec),
        ] {
            if value == 0 {
                errors.push(format!("run: {name} must be positive"));
            }
        }

        // ── Upper bounds ────────────────────────────────────
        for (name, value) in [
            ("sensor_read_interval_sec", r.sensor_read_interval_sec),
            ("filename_cache_sec", r.filename_cache_sec),
            ("batch_interval_sec", r.batch_interval_sec),
            ("disabled_poll_interval_sec", r.disabled_poll_interval_sec),
            ("connect_timeout_sec", r.connect_timeout_sec),
        ] {
            if value > MAX_INTERVAL_SEC {
                errors.push(format!("run: {name} ({value}) exceeds {MAX_INTERVAL_SEC}"));
            }
        }

        if r.tick_ms > 0
            && r.sensor_read_interval_sec > 0
            && r.tick_ms >= r.sensor_read_interval_sec.saturating_mul(1000)
        {
            errors.push(format!(
                "run: tick_ms ({}) must be shorter than sensor_read_interval_sec ({}s)",
                r.tick_ms, r.sensor_read_interval_sec
            ));
        }

        if r.filename_placeholder.trim().is_empty() {
            errors.push("run: filename_placeholder is empty".into());
        }
    }

    fn validate_sensors(&self, errors: &mut Vec<String>) {
        let s = &self.sensors;
        if s.mode == SensorMode::Sim {
            return;
        }

        // ── ADC ─────────────────────────────────────────────
        if s.moisture_channel > MAX_CHANNEL {
            errors.push(format!(
                "sensors: moisture_channel {} out of range [0, {MAX_CHANNEL}]",
                s.moisture_channel
            ));
        }
        if !(0..=ADS1115_MAX).contains(&s.raw_dry) {
            errors.push(format!(
                "sensors: raw_dry {} out of ADS1115 range [0, {ADS1115_MAX}]",
                s.raw_dry
            ));
        }
        if !(0..=ADS1115_MAX).contains(&s.raw_wet) {
            errors.push(format!(
                "sensors: raw_wet {} out of ADS1115 range [0, {ADS1115_MAX}]",
                s.raw_wet
            ));
        }
        if s.raw_dry == s.raw_wet {
            errors.push(format!(
                "sensors: raw_dry and raw_wet are both {}, calibration range is zero",
                s.raw_dry
            ));
        }

        // ── Modbus ──────────────────────────────────────────
        if !(1..=247).contains(&s.npk_address) {
            errors.push(format!(
                "sensors: npk_address {} out of Modbus range [1, 247]",
                s.npk_address
            ));
        }
        if s.npk_baud == 0 {
            errors.push("sensors: npk_baud must be positive".into());
        }
    }

    fn validate_status(&self, errors: &mut Vec<String>) {
        if let Some(listen) = &self.status.listen {
            if listen.parse::<SocketAddr>().is_err() {
                errors.push(format!("status: listen '{listen}' is not a socket address"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

impl Config {
    /// Env values win over the file so secrets can stay out of it.
    pub fn apply_overrides(&mut self, api_key: Option<String>, bearer_token: Option<String>) {
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.backend.api_key = key;
        }
        if let Some(token) = bearer_token.filter(|t| !t.is_empty()) {
            self.backend.bearer_token = Some(token);
        }
    }

    pub fn bearer_token(&self) -> &str {
        self.backend
            .bearer_token
            .as_deref()
            .unwrap_or(&self.backend.api_key)
    }

    pub fn control_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.backend.base_url.trim_end_matches('/'),
            self.backend.control_table
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_sec)
    }

    /// Only meaningful after [`validate`](Self::validate) has passed.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.status.listen.as_deref().and_then(|l| l.parse().ok())
    }

    pub fn settings(&self) -> Settings {
        let r = &self.run;
        Settings {
            target: r.target_readings,
            sensor_interval: Duration::from_secs(r.sensor_read_interval_sec),
            filename_cache: Duration::from_secs(r.filename_cache_sec),
            batch_size: r.batch_size,
            batch_interval: Duration::from_secs(r.batch_interval_sec),
            disabled_poll: Duration::from_secs(r.disabled_poll_interval_sec),
            tick: Duration::from_millis(r.tick_ms),
            connect_timeout: Duration::from_secs(r.connect_timeout_sec),
            filename_placeholder: r.filename_placeholder.clone(),
            missing_values: r.missing_values,
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, apply env overrides and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let mut config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config.apply_overrides(
        std::env::var("BACKEND_API_KEY").ok(),
        std::env::var("BACKEND_BEARER_TOKEN").ok(),
    );
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[backend]
base_url = "https://abc.example.co"
filename_url = "https://abc.example.co/rest/v1/current_filename?select=filename&order=id.desc&limit=1"
sensor_url = "https://abc.example.co/rest/v1/sensor_data"
api_key = "anon"
"#;

    fn valid_config() -> Config {
        toml::from_str(MINIMAL).unwrap()
    }

    fn hardware_config() -> Config {
        let mut cfg = valid_config();
        cfg.sensors.mode = SensorMode::Hardware;
        cfg.sensors.ads1115_addr = Some(0x48);
        cfg.sensors.raw_dry = 26000;
        cfg.sensors.raw_wet = 12000;
        cfg
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn minimal_config_uses_device_defaults() {
        let cfg = valid_config();
        cfg.validate().unwrap();
        assert_eq!(cfg.settings(), Settings::default());
        assert_eq!(cfg.backend.control_table, "current_filename");
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.sensors.mode, SensorMode::Sim);
        assert_eq!(cfg.listen_addr(), None);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[backend]
base_url = "http://10.0.0.2:8000/"
control_table = "runs"
filename_url = "http://10.0.0.2:8000/rest/v1/runs?select=filename"
sensor_url = "http://10.0.0.2:8000/rest/v1/readings"
api_key = "anon"
bearer_token = "service"
timeout_sec = 4

[run]
target_readings = 3
batch_size = 2
missing_values = "null"

[sensors]
mode = "hardware"
dht_iio_path = "/sys/bus/iio/devices/iio:device0"
ads1115_addr = 72
moisture_channel = 1
raw_dry = 26000
raw_wet = 12000
npk_uart = "/dev/ttyAMA0"
npk_baud = 9600
npk_address = 2

[status]
listen = "0.0.0.0:8080"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.control_url(), "http://10.0.0.2:8000/rest/v1/runs");
        assert_eq!(cfg.bearer_token(), "service");
        let s = cfg.settings();
        assert_eq!(s.target, 3);
        assert_eq!(s.batch_size, 2);
        assert_eq!(s.missing_values, MissingValues::Null);
        assert_eq!(s.sensor_interval, Duration::from_secs(5));
        assert_eq!(cfg.sensors.npk_uart.as_deref(), Some("/dev/ttyAMA0"));
        assert_eq!(cfg.listen_addr(), Some("0.0.0.0:8080".parse().unwrap()));
    }

    #[test]
    fn missing_backend_section_is_parse_error() {
        assert!(toml::from_str::<Config>("[run]\ntarget_readings = 5\n").is_err());
    }

    #[test]
    fn bad_missing_values_policy_is_parse_error() {
        let toml_str = format!("{MINIMAL}\n[run]\nmissing_values = \"nan\"\n");
        assert!(toml::from_str::<Config>(&toml_str).is_err());
    }

    // -- Derived values ---------------------------------------------------

    #[test]
    fn bearer_defaults_to_api_key() {
        assert_eq!(valid_config().bearer_token(), "anon");
    }

    #[test]
    fn control_url_from_base() {
        assert_eq!(
            valid_config().control_url(),
            "https://abc.example.co/rest/v1/current_filename"
        );
    }

    #[test]
    fn env_overrides_win() {
        let mut cfg = valid_config();
        cfg.apply_overrides(Some("from-env".into()), Some("jwt".into()));
        assert_eq!(cfg.backend.api_key, "from-env");
        assert_eq!(cfg.bearer_token(), "jwt");
    }

    #[test]
    fn empty_env_override_is_ignored() {
        let mut cfg = valid_config();
        cfg.apply_overrides(Some(String::new()), None);
        assert_eq!(cfg.backend.api_key, "anon");
    }

    // -- Backend ----------------------------------------------------------

    #[test]
    fn backend_empty_api_key_rejected() {
        let mut cfg = valid_config();
        cfg.backend.api_key = " ".into();
        assert_validation_err(&cfg, "api_key is empty");
    }

    #[test]
    fn backend_non_http_url_rejected() {
        let mut cfg = valid_config();
        cfg.backend.sensor_url = "ftp://abc.example.co/data".into();
        assert_validation_err(&cfg, "sensor_url 'ftp://abc.example.co/data' must be an http(s) url");
    }

    #[test]
    fn backend_empty_url_rejected() {
        let mut cfg = valid_config();
        cfg.backend.filename_url = "".into();
        assert_validation_err(&cfg, "filename_url is empty");
    }

    #[test]
    fn backend_control_table_with_query_rejected() {
        let mut cfg = valid_config();
        cfg.backend.control_table = "current_filename?select=id".into();
        assert_validation_err(&cfg, "must be a bare table name");
    }

    #[test]
    fn backend_zero_timeout_rejected() {
        let mut cfg = valid_config();
        cfg.backend.timeout_sec = 0;
        assert_validation_err(&cfg, "timeout_sec must be positive");
    }

    // -- Run --------------------------------------------------------------

    #[test]
    fn run_zero_target_rejected() {
        let mut cfg = valid_config();
        cfg.run.target_readings = 0;
        assert_validation_err(&cfg, "target_readings must be positive");
    }

    #[test]
    fn run_zero_batch_size_rejected() {
        let mut cfg = valid_config();
        cfg.run.batch_size = 0;
        assert_validation_err(&cfg, "batch_size must be positive");
    }

    #[test]
    fn run_tick_longer_than_sample_interval_rejected() {
        let mut cfg = valid_config();
        cfg.run.tick_ms = 5000;
        assert_validation_err(&cfg, "tick_ms (5000) must be shorter");
    }

    #[test]
    fn run_huge_sample_interval_rejected_without_overflow() {
        let mut cfg = valid_config();
        cfg.run.sensor_read_interval_sec = i64::MAX as u64;
        assert_validation_err(&cfg, "sensor_read_interval_sec (9223372036854775807) exceeds 3600");
    }

    #[test]
    fn run_huge_connect_timeout_rejected() {
        let mut cfg = valid_config();
        cfg.run.connect_timeout_sec = i64::MAX as u64;
        assert_validation_err(&cfg, "connect_timeout_sec (9223372036854775807) exceeds 3600");
    }

    #[test]
    fn run_interval_at_bound_accepted() {
        let mut cfg = valid_config();
        cfg.run.batch_interval_sec = MAX_INTERVAL_SEC;
        cfg.run.connect_timeout_sec = MAX_INTERVAL_SEC;
        cfg.backend.timeout_sec = MAX_INTERVAL_SEC;
        cfg.validate().unwrap();
    }

    #[test]
    fn backend_huge_timeout_rejected() {
        let mut cfg = valid_config();
        cfg.backend.timeout_sec = u64::MAX;
        assert_validation_err(&cfg, "timeout_sec (18446744073709551615) exceeds 3600");
    }

    #[test]
    fn run_empty_placeholder_rejected() {
        let mut cfg = valid_config();
        cfg.run.filename_placeholder = "".into();
        assert_validation_err(&cfg, "filename_placeholder is empty");
    }

    // -- Sensors ----------------------------------------------------------

    #[test]
    fn hardware_config_passes() {
        hardware_config().validate().unwrap();
    }

    #[test]
    fn sim_mode_skips_hardware_checks() {
        let mut cfg = valid_config();
        cfg.sensors.npk_address = 0;
        cfg.validate().unwrap();
    }

    #[test]
    fn sensor_channel_out_of_range() {
        let mut cfg = hardware_config();
        cfg.sensors.moisture_channel = 4;
        assert_validation_err(&cfg, "moisture_channel 4 out of range");
    }

    #[test]
    fn sensor_raw_dry_too_high() {
        let mut cfg = hardware_config();
        cfg.sensors.raw_dry = 40000;
        assert_validation_err(&cfg, "raw_dry 40000 out of ADS1115 range");
    }

    #[test]
    fn sensor_raw_wet_negative() {
        let mut cfg = hardware_config();
        cfg.sensors.raw_wet = -100;
        assert_validation_err(&cfg, "raw_wet -100 out of ADS1115 range");
    }

    #[test]
    fn sensor_raw_dry_equals_wet() {
        let mut cfg = hardware_config();
        cfg.sensors.raw_dry = 15000;
        cfg.sensors.raw_wet = 15000;
        assert_validation_err(&cfg, "calibration range is zero");
    }

    #[test]
    fn sensor_npk_address_zero_rejected() {
        let mut cfg = hardware_config();
        cfg.sensors.npk_address = 0;
        assert_validation_err(&cfg, "npk_address 0 out of Modbus range");
    }

    #[test]
    fn sensor_npk_address_248_rejected() {
        let mut cfg = hardware_config();
        cfg.sensors.npk_address = 248;
        assert_validation_err(&cfg, "npk_address 248");
    }

    // -- Status -----------------------------------------------------------

    #[test]
    fn status_bad_listen_rejected() {
        let mut cfg = valid_config();
        cfg.status.listen = Some("localhost".into());
        assert_validation_err(&cfg, "is not a socket address");
    }

    // -- Multiple errors reported at once ---------------------------------

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = hardware_config();
        cfg.backend.api_key = "".into();
        cfg.run.batch_size = 0;
        cfg.sensors.moisture_channel = 9;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "wrong count in: {msg}");
        assert!(msg.contains("api_key is empty"), "missing api_key error in: {msg}");
        assert!(msg.contains("batch_size"), "missing batch error in: {msg}");
        assert!(msg.contains("moisture_channel"), "missing channel error in: {msg}");
    }

    // -- Load -------------------------------------------------------------

    #[test]
    fn load_missing_file_has_context() {
        let err = load("/nonexistent/logger.toml").unwrap_err();
        assert!(format!("{err:#}").contains("failed to read config"));
    }
}
