mod batch;
mod config;
mod control;
mod display;
mod error;
mod link;
mod remote;
mod state;
mod transport;
mod web;

use anyhow::{Context, Result};
use soil_sensors::SensorFrame;
use std::{env, sync::Arc};
use tracing_subscriber::EnvFilter;

use config::{Config, SensorMode, SensorsConfig};
use control::{ControlLoop, Devices, Outcome, Settings};
use display::{Display, NoDisplay, StatusPanel};
use link::HostLink;
use remote::RemoteFlagStore;
use state::{SharedState, StatusBoard};
use transport::{HttpTransport, Transport};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "logger.toml".to_string());
    let cfg = config::load(&config_path)?;
    let settings = cfg.settings();
    tracing::info!(
        path = %config_path,
        target = settings.target,
        batch_size = settings.batch_size,
        sensors = ?cfg.sensors.mode,
        "config loaded"
    );

    // ── Backend ─────────────────────────────────────────────────────
    let uploader: Arc<dyn Transport> = Arc::new(HttpTransport::new(
        &cfg.backend.api_key,
        cfg.bearer_token(),
        cfg.request_timeout(),
    )?);
    let store = RemoteFlagStore::new(
        Arc::clone(&uploader),
        cfg.control_url(),
        cfg.backend.filename_url.clone(),
    );

    // ── Shared state (ephemeral, for the status api) ────────────────
    let shared = StatusBoard::shared(settings.target);
    shared
        .write()
        .await
        .record_system("logger started".to_string());

    if let Some(addr) = cfg.listen_addr() {
        let web_state = Arc::clone(&shared);
        tokio::spawn(async move {
            if let Err(e) = web::serve(web_state, addr).await {
                tracing::error!("{e:#}");
            }
        });
    }

    // ── Devices ─────────────────────────────────────────────────────
    // The panel is only visible through the status api.
    let link = HostLink::from_url(&cfg.backend.base_url)?;
    let sensors = build_sensors(&cfg)?;
    let sensor_url = cfg.backend.sensor_url.clone();
    let outcome = if cfg.listen_addr().is_some() {
        let display = StatusPanel::new(Arc::clone(&shared));
        let devices = Devices { link, display, sensors };
        drive(settings, store, uploader, sensor_url, devices, shared).await
    } else {
        let devices = Devices { link, display: NoDisplay, sensors };
        drive(settings, store, uploader, sensor_url, devices, shared).await
    };

    match outcome {
        Outcome::Completed { readings } => {
            tracing::info!(readings, "completed, idling until shutdown")
        }
        Outcome::Halted => tracing::error!("halted, idling until shutdown"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    Ok(())
}

async fn drive<D: Display>(
    settings: Settings,
    store: RemoteFlagStore,
    uploader: Arc<dyn Transport>,
    sensor_url: String,
    devices: Devices<HostLink, D>,
    shared: SharedState,
) -> Outcome {
    let mut control = ControlLoop::new(settings, store, uploader, sensor_url, devices, shared);
    let outcome = control.run().await;
    tracing::info!(
        phase = %control.phase(),
        readings = control.reading_count(),
        unsent = control.pending(),
        row_id = ?control.control_row_id(),
        "run finished"
    );
    outcome
}

fn build_sensors(cfg: &Config) -> Result<SensorFrame> {
    match cfg.sensors.mode {
        SensorMode::Sim => sim_sensors(&cfg.sensors),
        SensorMode::Hardware => hardware_sensors(&cfg.sensors),
    }
}

#[cfg(feature = "sim")]
fn sim_sensors(s: &SensorsConfig) -> Result<SensorFrame> {
    use soil_sensors::sim::{Scenario, SimClimate, SimMoisture, SimNutrients};

    let scenario = Scenario::from_str_lossy(&s.scenario);
    tracing::info!(%scenario, "using simulated sensors");
    Ok(SensorFrame::new()
        .with_climate(SimClimate::new(scenario))
        .with_moisture(SimMoisture::new(scenario))
        .with_nutrients(SimNutrients::new(scenario)))
}

#[cfg(not(feature = "sim"))]
fn sim_sensors(_: &SensorsConfig) -> Result<SensorFrame> {
    anyhow::bail!("sensors.mode = \"sim\" requires the `sim` feature")
}

fn hardware_sensors(s: &SensorsConfig) -> Result<SensorFrame> {
    let mut frame = SensorFrame::new();

    if let Some(dir) = &s.dht_iio_path {
        tracing::info!(path = %dir, "dht11 via iio");
        frame = frame.with_climate(soil_sensors::dht::IioDht::new(dir));
    }

    if let Some(addr) = s.ads1115_addr {
        frame = with_moisture(frame, s, addr)?;
    }

    if let Some(uart) = &s.npk_uart {
        frame = with_nutrients(frame, s, uart)?;
    }

    Ok(frame)
}

#[cfg(feature = "adc")]
fn with_moisture(frame: SensorFrame, s: &SensorsConfig, addr: u16) -> Result<SensorFrame> {
    use soil_sensors::adc::{Ads1115Moisture, Calibration};

    let cal = Calibration {
        raw_dry: s.raw_dry,
        raw_wet: s.raw_wet,
    };
    let probe = Ads1115Moisture::new(addr, s.moisture_channel, cal)
        .with_context(|| format!("failed to open ADS1115 at {addr:#04x}"))?;
    Ok(frame.with_moisture(probe))
}

#[cfg(not(feature = "adc"))]
fn with_moisture(_: SensorFrame, _: &SensorsConfig, _: u16) -> Result<SensorFrame> {
    anyhow::bail!("sensors.ads1115_addr is set but the `adc` feature is not enabled")
}

#[cfg(feature = "npk")]
fn with_nutrients(frame: SensorFrame, s: &SensorsConfig, uart: &str) -> Result<SensorFrame> {
    let probe = soil_sensors::npk::NpkProbe::open(uart, s.npk_baud, s.npk_address)
        .with_context(|| format!("failed to open NPK probe on {uart}"))?;
    Ok(frame.with_nutrients(probe))
}

#[cfg(not(feature = "npk"))]
fn with_nutrients(_: SensorFrame, _: &SensorsConfig, _: &str) -> Result<SensorFrame> {
    anyhow::bail!("sensors.npk_uart is set but the `npk` feature is not enabled")
}
