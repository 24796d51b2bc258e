//! Readings and the in-memory batch they wait in before upload.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use soil_sensors::Snapshot;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::error::RemoteError;
use crate::transport::{Request, Transport};

/// HTTP status the sensor table answers a successful insert with.
const CREATED: u16 = 201;

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One sampled data point.  Channel values stay optional inside the
/// process; [`MissingValues`] decides how absent ones are uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: OffsetDateTime,
    pub filename: String,
    pub snapshot: Snapshot,
}

impl Reading {
    pub fn new(timestamp: OffsetDateTime, filename: String, snapshot: Snapshot) -> Self {
        Self {
            timestamp,
            filename,
            snapshot,
        }
    }

    pub fn to_wire(&self, missing: MissingValues) -> WireReading {
        let s = &self.snapshot;
        let f = |v: Option<f32>| match missing {
            MissingValues::Zero => Some(v.unwrap_or(0.0)),
            MissingValues::Null => v,
        };
        let u = |v: Option<u16>| match missing {
            MissingValues::Zero => Some(v.unwrap_or(0)),
            MissingValues::Null => v,
        };
        WireReading {
            timestamp: self.timestamp,
            filename: self.filename.clone(),
            temperature: f(s.temperature),
            humidity: f(s.humidity),
            moisture: f(s.moisture),
            nitrogen: u(s.nitrogen),
            phosphorus: u(s.phosphorus),
            potassium: u(s.potassium),
        }
    }
}

/// How an absent channel is written to the sensor table.
///
/// `Zero` keeps the established table contents (an absent channel and a
/// real zero look the same).  `Null` preserves the difference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingValues {
    #[default]
    Zero,
    Null,
}

/// Row shape posted to the sensor table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireReading {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub filename: String,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub moisture: Option<f32>,
    pub nitrogen: Option<u16>,
    pub phosphorus: Option<u16>,
    pub potassium: Option<u16>,
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Ordered readings awaiting upload.
///
/// `batch_size` is a soft cap: [`append`](Self::append) never rejects, the
/// control loop is expected to flush once [`should_flush`](Self::should_flush)
/// says so.  A flush either uploads and clears everything or changes nothing.
pub struct BatchAccumulator {
    readings: Vec<Reading>,
    batch_size: usize,
    interval: Duration,
    missing: MissingValues,
    sensor_url: String,
}

impl BatchAccumulator {
    pub fn new(
        sensor_url: impl Into<String>,
        batch_size: usize,
        interval: Duration,
        missing: MissingValues,
    ) -> Self {
        Self {
            readings: Vec::with_capacity(batch_size),
            batch_size,
            interval,
            missing,
            sensor_url: sensor_url.into(),
        }
    }

    pub fn append(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    #[cfg(test)]
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Full batch, or a non-empty batch whose flush interval has elapsed.
    pub fn should_flush(&self, now: Instant, last_flush: Instant) -> bool {
        self.readings.len() >= self.batch_size
            || (!self.readings.is_empty()
                && now.saturating_duration_since(last_flush) >= self.interval)
    }

    /// Upload the whole batch as one request.
    ///
    /// Returns the number of readings uploaded (0 for an empty batch, which
    /// sends nothing).  On any failure the batch is left exactly as it was so
    /// the next flush resends it; the backend may therefore see duplicates.
    pub async fn flush(&mut self, uploader: &dyn Transport) -> Result<usize, RemoteError> {
        if self.readings.is_empty() {
            return Ok(0);
        }

        let rows: Vec<WireReading> = self
            .readings
            .iter()
            .map(|r| r.to_wire(self.missing))
            .collect();
        let body = serde_json::to_value(&rows).map_err(|e| RemoteError::Protocol(e.to_string()))?;

        let reply = uploader
            .send(Request::post(self.sensor_url.clone(), body))
            .await?;
        if reply.status != CREATED {
            return Err(reply.into_status_error());
        }

        let sent = self.readings.len();
        self.readings.clear();
        Ok(sent)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
