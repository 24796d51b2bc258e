//! Sensor acquisition for the soil logger.
//!
//! A [`SensorFrame`] owns one optional driver per physical device and turns
//! a polling request into a [`Snapshot`] where every channel is independently
//! optional.  Drivers live in their own modules:
//!
//! - [`dht`]: temperature + humidity from the Linux IIO DHT11 driver
//! - [`adc`]: capacitive soil moisture through an ADS1115 (`adc` feature)
//! - [`npk`]: nitrogen / phosphorus / potassium over Modbus RTU (`npk` feature)
//! - [`sim`]: simulated channels for development (`sim` feature)

pub mod adc;
pub mod dht;
mod frame;
pub mod npk;
#[cfg(feature = "sim")]
pub mod sim;

pub use frame::{
    Climate, ClimateSensor, MoistureSensor, NutrientSensor, Nutrients, SensorFrame, Snapshot,
};
