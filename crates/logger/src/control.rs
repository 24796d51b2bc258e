//! The run state machine.
//!
//! One [`ControlLoop`] drives a single bounded run: associate with the
//! network, clear the remote success flag, then tick until `target`
//! readings have been taken, gating on the remote trigger, and finally
//! upload what is left, raise the success flag and disarm the trigger.
//!
//! ```text
//!  Connecting ──fail──────────────────────────────► Halted
//!      │ ok
//!      ▼
//!  PollingDisabled ◄──trigger──► Sampling ──count == target──► Finalizing ──► Halted
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use soil_sensors::SensorFrame;
use time::OffsetDateTime;
use tokio::time::{sleep, Instant};

use crate::batch::{BatchAccumulator, MissingValues, Reading};
use crate::display::{show, Display, Screen};
use crate::error::RemoteError;
use crate::link::Link;
use crate::remote::{RemoteFlagStore, RowId, TriggerState};
use crate::state::SharedState;
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Timing and sizing knobs for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub target: u32,
    pub sensor_interval: Duration,
    pub filename_cache: Duration,
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub disabled_poll: Duration,
    /// Floor of every enabled tick.
    pub tick: Duration,
    pub connect_timeout: Duration,
    pub filename_placeholder: String,
    pub missing_values: MissingValues,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target: 20,
            sensor_interval: Duration::from_secs(5),
            filename_cache: Duration::from_secs(300),
            batch_size: 5,
            batch_interval: Duration::from_secs(30),
            disabled_poll: Duration::from_secs(5),
            tick: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(10),
            filename_placeholder: "unknown.png".into(),
            missing_values: MissingValues::Zero,
        }
    }
}

// ---------------------------------------------------------------------------
// Phase / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Connecting,
    PollingDisabled,
    Sampling,
    Finalizing,
    Halted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::PollingDisabled => "polling_disabled",
            Self::Sampling => "sampling",
            Self::Finalizing => "finalizing",
            Self::Halted => "halted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The quota was reached and the run was finalized.
    Completed { readings: u32 },
    /// Network association failed at startup.
    Halted,
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

struct RunState {
    reading_count: u32,
    target: u32,
    batch: BatchAccumulator,
    last_sample: Instant,
    last_batch_flush: Instant,
    last_filename_fetch: Option<Instant>,
    cached_filename: Option<String>,
    /// Once set, only ever replaced by a newer observed id.
    control_row_id: Option<RowId>,
    last_disabled_log: Option<Instant>,
}

/// Hardware collaborators the loop drives.
pub struct Devices<L, D> {
    pub link: L,
    pub display: D,
    pub sensors: SensorFrame,
}

// ---------------------------------------------------------------------------
// Control loop
// ---------------------------------------------------------------------------

pub struct ControlLoop<L, D> {
    settings: Settings,
    store: RemoteFlagStore,
    uploader: Arc<dyn Transport>,
    devices: Devices<L, D>,
    board: SharedState,
    run: RunState,
    phase: Phase,
}

impl<L: Link, D: Display> ControlLoop<L, D> {
    pub fn new(
        settings: Settings,
        store: RemoteFlagStore,
        uploader: Arc<dyn Transport>,
        sensor_url: impl Into<String>,
        devices: Devices<L, D>,
        board: SharedState,
    ) -> Self {
        let now = Instant::now();
        let run = RunState {
            reading_count: 0,
            target: settings.target,
            batch: BatchAccumulator::new(
                sensor_url,
                settings.batch_size,
                settings.batch_interval,
                settings.missing_values,
            ),
            last_sample: now,
            last_batch_flush: now,
            last_filename_fetch: None,
            cached_filename: None,
            control_row_id: None,
            last_disabled_log: None,
        };
        Self {
            settings,
            store,
            uploader,
            devices,
            board,
            run,
            phase: Phase::Connecting,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn reading_count(&self) -> u32 {
        self.run.reading_count
    }

    pub fn pending(&self) -> usize {
        self.run.batch.len()
    }

    pub fn control_row_id(&self) -> Option<RowId> {
        self.run.control_row_id
    }

    /// Drive one run to completion.  Only a failed initial network
    /// association ends it early.
    pub async fn run(&mut self) -> Outcome {
        if !self.start().await {
            return Outcome::Halted;
        }

        while self.run.reading_count < self.run.target {
            self.tick().await;
        }

        self.finalize().await;
        self.enter(Phase::Halted).await;
        Outcome::Completed {
            readings: self.run.reading_count,
        }
    }

    /// Associate with the network and clear the success flag.  Returns
    /// `false` once the loop has halted.
    async fn start(&mut self) -> bool {
        self.enter(Phase::Connecting).await;
        show(&mut self.devices.display, &Screen::Boot).await;

        if !self
            .devices
            .link
            .ensure_connected(self.settings.connect_timeout)
            .await
        {
            tracing::error!(
                timeout = ?self.settings.connect_timeout,
                "network association failed, halting"
            );
            self.board
                .write()
                .await
                .record_error("network association failed".into());
            show(&mut self.devices.display, &Screen::NetworkError).await;
            self.enter(Phase::Halted).await;
            return false;
        }
        tracing::info!("network connected");

        match self.store.initialize_success_flag().await {
            Ok(Some(id)) => {
                tracing::info!(row_id = %id, "control row found");
                self.observe_row(id).await;
            }
            Ok(None) => tracing::warn!("control table is empty, no row to flag"),
            Err(e) => self.remote_failed("initialize success flag", e).await,
        }

        let now = Instant::now();
        self.run.last_sample = now;
        self.run.last_batch_flush = now;
        true
    }

    /// One pass of the main loop.
    pub async fn tick(&mut self) {
        let trigger = match self.store.poll_trigger().await {
            Ok(t) => t,
            Err(e) => {
                self.remote_failed("trigger poll", e).await;
                TriggerState::DISABLED
            }
        };
        if let Some(id) = trigger.row_id {
            self.observe_row(id).await;
        }

        if !trigger.enabled {
            self.idle_disabled().await;
            return;
        }

        self.enter(Phase::Sampling).await;
        let now = Instant::now();
        self.refresh_filename(now).await;

        if self.run.reading_count < self.run.target
            && now.saturating_duration_since(self.run.last_sample) >= self.settings.sensor_interval
        {
            self.take_sample(now).await;
        }

        if self.run.batch.should_flush(now, self.run.last_batch_flush) {
            if self
                .devices
                .link
                .ensure_connected(self.settings.connect_timeout)
                .await
            {
                if self.flush_batch().await {
                    self.run.last_batch_flush = now;
                }
            } else {
                tracing::warn!(pending = self.run.batch.len(), "network down, batch kept");
            }
        }

        sleep(self.settings.tick).await;
    }

    async fn idle_disabled(&mut self) {
        self.enter(Phase::PollingDisabled).await;

        let now = Instant::now();
        let due = self.run.last_disabled_log.map_or(true, |t| {
            now.saturating_duration_since(t) >= self.settings.disabled_poll
        });
        if due {
            tracing::info!("data collection disabled remotely");
            self.run.last_disabled_log = Some(now);
            show(&mut self.devices.display, &Screen::Disabled).await;
        }

        sleep(self.settings.disabled_poll).await;
    }

    async fn refresh_filename(&mut self, now: Instant) {
        let fresh = match (&self.run.cached_filename, self.run.last_filename_fetch) {
            (Some(_), Some(at)) => now.saturating_duration_since(at) < self.settings.filename_cache,
            _ => false,
        };
        if fresh {
            return;
        }

        let name = match self.store.fetch_filename().await {
            Ok(name) => {
                tracing::info!(filename = %name, "filename refreshed");
                name
            }
            Err(e) => {
                self.remote_failed("filename fetch", e).await;
                self.settings.filename_placeholder.clone()
            }
        };
        self.run.cached_filename = Some(name);
        self.run.last_filename_fetch = Some(now);
    }

    async fn take_sample(&mut self, now: Instant) {
        let snapshot = self.devices.sensors.sample();
        let count = self.run.reading_count + 1;
        tracing::info!(
            n = ?snapshot.nitrogen,
            p = ?snapshot.phosphorus,
            k = ?snapshot.potassium,
            "npk"
        );

        show(
            &mut self.devices.display,
            &Screen::Sample {
                count,
                target: self.run.target,
                snapshot,
            },
        )
        .await;

        let filename = self
            .run
            .cached_filename
            .clone()
            .unwrap_or_else(|| self.settings.filename_placeholder.clone());
        let reading = Reading::new(OffsetDateTime::now_utc(), filename, snapshot);
        tracing::debug!(?reading, "collected reading");

        self.run.batch.append(reading);
        self.run.reading_count = count;
        self.run.last_sample = now;

        let pending = self.run.batch.len();
        tracing::info!(reading = count, target = self.run.target, pending, "sample taken");
        self.board
            .write()
            .await
            .record_sample(count, snapshot, pending);
    }

    /// Upload the pending batch.  Returns whether the batch was cleared.
    async fn flush_batch(&mut self) -> bool {
        match self.run.batch.flush(self.uploader.as_ref()).await {
            Ok(sent) => {
                tracing::info!(sent, "batch uploaded");
                self.board.write().await.record_upload(sent, 0);
                true
            }
            Err(e) => {
                let pending = self.run.batch.len();
                tracing::error!(pending, "batch upload failed: {e}");
                self.board
                    .write()
                    .await
                    .record_error(format!("batch upload failed ({pending} pending): {e}"));
                false
            }
        }
    }

    async fn finalize(&mut self) {
        self.enter(Phase::Finalizing).await;

        if !self.run.batch.is_empty() {
            if self
                .devices
                .link
                .ensure_connected(self.settings.connect_timeout)
                .await
            {
                self.flush_batch().await;
            } else {
                tracing::warn!(
                    pending = self.run.batch.len(),
                    "network down, final batch not uploaded"
                );
            }
        }

        let row = self.run.control_row_id;
        if self.run.reading_count >= self.run.target {
            match self.store.set_success(row, true).await {
                Ok(()) => self.record_remote("success flag set").await,
                Err(e) => self.remote_failed("set success flag", e).await,
            }
        }

        tracing::info!(readings = self.run.reading_count, "run completed");
        show(
            &mut self.devices.display,
            &Screen::Complete {
                target: self.run.target,
            },
        )
        .await;

        match self.store.reset_trigger(row).await {
            Ok(()) => self.record_remote("trigger reset").await,
            Err(e) => self.remote_failed("reset trigger", e).await,
        }
    }

    async fn observe_row(&mut self, id: RowId) {
        if self.run.control_row_id == Some(id) {
            return;
        }
        tracing::debug!(row_id = %id, "control row changed");
        self.run.control_row_id = Some(id);
        let mut board = self.board.write().await;
        board.set_control_row(Some(id));
        board.record_remote(format!("control row {id}"));
    }

    async fn record_remote(&self, detail: &str) {
        self.board.write().await.record_remote(detail.to_string());
    }

    async fn remote_failed(&self, what: &str, e: RemoteError) {
        match &e {
            RemoteError::MissingRowId => tracing::error!("{what} skipped: no control row id"),
            RemoteError::Status { .. } => tracing::warn!("{what} rejected: {e}"),
            _ => tracing::error!("{what} failed: {e}"),
        }
        self.board.write().await.record_error(format!("{what}: {e}"));
    }

    async fn enter(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }
        tracing::info!(from = %self.phase, to = %phase, "phase change");
        self.phase = phase;
        self.board.write().await.set_phase(phase);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::NoDisplay;
    use crate::state::StatusBoard;
    use crate::transport::fake::{FakeBackend, Script, CONTROL_URL, FILENAME_URL, SENSOR_URL};
    use crate::transport::Method;
    use serde_json::json;
    use soil_sensors::{Climate, ClimateSensor, MoistureSensor};

    struct FakeLink {
        up: bool,
    }

    #[async_trait::async_trait]
    impl Link for FakeLink {
        async fn ensure_connected(&mut self, limit: Duration) -> bool {
            if !self.up {
                sleep(limit).await;
            }
            self.up
        }
    }

    struct RisingMoisture(f32);
    impl MoistureSensor for RisingMoisture {
        fn read_percent(&mut self) -> anyhow::Result<f32> {
            self.0 += 1.0;
            Ok(self.0)
        }
    }

    struct DeadClimate;
    impl ClimateSensor for DeadClimate {
        fn measure(&mut self) -> anyhow::Result<Climate> {
            anyhow::bail!("no response")
        }
    }

    type TestLoop = ControlLoop<FakeLink, NoDisplay>;

    fn build(script: Script, settings: Settings, link_up: bool) -> (Arc<FakeBackend>, SharedState, TestLoop) {
        let backend = Arc::new(FakeBackend::new(script));
        let board = StatusBoard::shared(settings.target);
        let store = RemoteFlagStore::new(backend.clone(), CONTROL_URL, FILENAME_URL);
        let devices = Devices {
            link: FakeLink { up: link_up },
            display: NoDisplay,
            sensors: SensorFrame::new()
                .with_climate(DeadClimate)
                .with_moisture(RisingMoisture(0.0)),
        };
        let lp = ControlLoop::new(
            settings,
            store,
            backend.clone(),
            SENSOR_URL,
            devices,
            board.clone(),
        );
        (backend, board, lp)
    }

    fn is_filename_fetch(r: &crate::transport::Request) -> bool {
        r.method == Method::Get && r.url == FILENAME_URL
    }

    // -- Full runs ------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn end_to_end_three_readings() {
        let settings = Settings {
            target: 3,
            ..Settings::default()
        };
        let (backend, board, mut lp) = build(Script::default(), settings, true);

        assert_eq!(lp.run().await, Outcome::Completed { readings: 3 });
        assert_eq!(lp.phase(), Phase::Halted);
        assert_eq!(lp.pending(), 0);

        // Interval never tripped (3 x 5s < 30s): only the final flush posts.
        let posts = backend.posts();
        assert_eq!(posts.len(), 1);
        let rows = posts[0].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row["filename"], "plot-a.png");
            assert_eq!(row["moisture"], json!((i + 1) as f64));
            assert_eq!(row["temperature"], json!(0.0), "failed channel uploads as zero");
        }

        let row = format!("{CONTROL_URL}?id=eq.7");
        assert_eq!(
            backend.patches(),
            vec![
                (row.clone(), json!({ "success": false })),
                (row.clone(), json!({ "success": true })),
                (row, json!({ "trigger_value": false })),
            ]
        );

        let st = board.read().await;
        assert_eq!(st.reading_count, 3);
        assert_eq!(st.uploaded, 3);
        assert_eq!(st.phase, Phase::Halted);
    }

    #[tokio::test(start_paused = true)]
    async fn final_flush_follows_post_before_success() {
        let settings = Settings {
            target: 2,
            ..Settings::default()
        };
        let (backend, _board, mut lp) = build(Script::default(), settings, true);
        lp.run().await;

        let reqs = backend.requests();
        let post = reqs.iter().position(|r| r.method == Method::Post).unwrap();
        let success = reqs
            .iter()
            .position(|r| r.body == Some(json!({ "success": true })))
            .unwrap();
        let reset = reqs
            .iter()
            .position(|r| r.body == Some(json!({ "trigger_value": false })))
            .unwrap();
        assert!(post < success && success < reset);
    }

    #[tokio::test(start_paused = true)]
    async fn count_never_exceeds_target() {
        let settings = Settings {
            target: 4,
            batch_size: 2,
            ..Settings::default()
        };
        let (backend, board, mut lp) = build(Script::default(), settings, true);

        assert_eq!(lp.run().await, Outcome::Completed { readings: 4 });
        let uploaded: usize = backend
            .posts()
            .iter()
            .map(|p| p.as_array().unwrap().len())
            .sum();
        assert_eq!(uploaded, 4);
        assert_eq!(backend.posts().len(), 2, "both batches flushed by size");
        assert_eq!(board.read().await.reading_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn association_failure_halts() {
        let (backend, board, mut lp) = build(Script::default(), Settings::default(), false);

        assert_eq!(lp.run().await, Outcome::Halted);
        assert_eq!(lp.phase(), Phase::Halted);
        assert!(backend.requests().is_empty());
        assert_eq!(board.read().await.phase, Phase::Halted);
    }

    #[tokio::test(start_paused = true)]
    async fn init_patch_rejection_is_not_fatal() {
        let settings = Settings {
            target: 1,
            ..Settings::default()
        };
        let (backend, _board, mut lp) = build(
            Script {
                patch_status: 500,
                ..Script::default()
            },
            settings,
            true,
        );
        assert_eq!(lp.run().await, Outcome::Completed { readings: 1 });
        assert_eq!(lp.control_row_id(), Some(RowId(7)));
        // All three flag updates were still attempted.
        assert_eq!(backend.patches().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_init_lookup_learns_row_from_first_poll() {
        let settings = Settings {
            target: 1,
            ..Settings::default()
        };
        let (backend, board, mut lp) = build(
            Script {
                fail_init: true,
                ..Script::default()
            },
            settings,
            true,
        );

        assert!(lp.start().await);
        assert_eq!(lp.phase(), Phase::Connecting);
        assert_eq!(lp.control_row_id(), None);
        assert!(board
            .read()
            .await
            .to_status()
            .events
            .iter()
            .any(|e| e.detail.contains("initialize success flag")));

        lp.tick().await;
        assert_eq!(lp.control_row_id(), Some(RowId(7)));

        while lp.reading_count() < 1 {
            lp.tick().await;
        }
        lp.finalize().await;
        let row = format!("{CONTROL_URL}?id=eq.7");
        assert_eq!(
            backend.patches(),
            vec![
                (row.clone(), json!({ "success": true })),
                (row, json!({ "trigger_value": false })),
            ],
            "no success:false is sent without a row id"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_init_lookup_still_completes_run() {
        let settings = Settings {
            target: 2,
            ..Settings::default()
        };
        let (backend, _board, mut lp) = build(
            Script {
                fail_init: true,
                ..Script::default()
            },
            settings,
            true,
        );

        assert_eq!(lp.run().await, Outcome::Completed { readings: 2 });
        assert_eq!(lp.control_row_id(), Some(RowId(7)));
        assert!(!backend
            .patches()
            .iter()
            .any(|(_, body)| body == &json!({ "success": false })));
    }

    // -- Ticks ----------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn disabled_trigger_makes_no_progress() {
        let (backend, board, mut lp) = build(
            Script {
                trigger: false,
                ..Script::default()
            },
            Settings::default(),
            true,
        );

        let start = Instant::now();
        for _ in 0..12 {
            lp.tick().await;
        }
        assert_eq!(lp.reading_count(), 0);
        assert_eq!(lp.pending(), 0);
        assert_eq!(lp.phase(), Phase::PollingDisabled);
        assert!(start.elapsed() >= Duration::from_secs(60), "sleeps the disabled interval");
        assert_eq!(backend.posts().len(), 0);
        assert_eq!(backend.count(is_filename_fetch), 0);
        assert_eq!(board.read().await.phase, Phase::PollingDisabled);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failure_keeps_row_and_continues() {
        let (backend, _board, mut lp) = build(Script::default(), Settings::default(), true);

        lp.tick().await;
        assert_eq!(lp.control_row_id(), Some(RowId(7)));
        assert_eq!(lp.phase(), Phase::Sampling);

        backend.update(|s| s.fail_polls = true);
        lp.tick().await;
        lp.tick().await;
        assert_eq!(lp.control_row_id(), Some(RowId(7)));
        assert_eq!(lp.phase(), Phase::PollingDisabled);

        backend.update(|s| {
            s.fail_polls = false;
            s.row_id = Some(9);
        });
        lp.tick().await;
        assert_eq!(lp.control_row_id(), Some(RowId(9)));
        assert_eq!(lp.phase(), Phase::Sampling);
    }

    #[tokio::test(start_paused = true)]
    async fn sampling_follows_interval() {
        let (_backend, _board, mut lp) = build(Script::default(), Settings::default(), true);

        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(4900) {
            lp.tick().await;
        }
        assert_eq!(lp.reading_count(), 0);
        while start.elapsed() < Duration::from_millis(5100) {
            lp.tick().await;
        }
        assert_eq!(lp.reading_count(), 1);
        while start.elapsed() < Duration::from_millis(10100) {
            lp.tick().await;
        }
        assert_eq!(lp.reading_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn filename_fetched_once_per_cache_window() {
        let settings = Settings {
            target: 10_000,
            ..Settings::default()
        };
        let (backend, _board, mut lp) = build(Script::default(), settings, true);

        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(299) {
            lp.tick().await;
        }
        assert_eq!(backend.count(is_filename_fetch), 1);

        while start.elapsed() < Duration::from_secs(301) {
            lp.tick().await;
        }
        assert_eq!(backend.count(is_filename_fetch), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn filename_failure_uses_placeholder() {
        let settings = Settings {
            target: 1,
            ..Settings::default()
        };
        let (backend, _board, mut lp) = build(
            Script {
                filename: None,
                ..Script::default()
            },
            settings,
            true,
        );
        lp.run().await;
        assert_eq!(backend.posts()[0][0]["filename"], "unknown.png");
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_flushes_and_stamps_time() {
        let settings = Settings {
            target: 10,
            ..Settings::default()
        };
        let (backend, _board, mut lp) = build(Script::default(), settings, true);

        while lp.reading_count() < 5 {
            lp.tick().await;
        }
        assert_eq!(lp.pending(), 0);
        assert_eq!(backend.posts().len(), 1);
        assert_eq!(lp.run.last_batch_flush, lp.run.last_sample);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_flushes_on_interval() {
        let settings = Settings {
            target: 10,
            sensor_interval: Duration::from_secs(14),
            ..Settings::default()
        };
        let (backend, _board, mut lp) = build(Script::default(), settings, true);

        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(29_900) {
            lp.tick().await;
        }
        assert_eq!(lp.pending(), 2);
        assert!(backend.posts().is_empty());

        while start.elapsed() < Duration::from_millis(30_100) {
            lp.tick().await;
        }
        assert_eq!(lp.pending(), 0);
        assert_eq!(backend.posts()[0].as_array().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_upload_keeps_batch_until_backend_recovers() {
        let settings = Settings {
            target: 10,
            ..Settings::default()
        };
        let (backend, board, mut lp) = build(
            Script {
                post_status: 500,
                ..Script::default()
            },
            settings,
            true,
        );

        while lp.reading_count() < 5 {
            lp.tick().await;
        }
        for _ in 0..10 {
            lp.tick().await;
        }
        assert_eq!(lp.pending(), 5);
        assert!(backend.posts().len() > 1, "retried on later ticks");
        assert_eq!(board.read().await.uploaded, 0);

        backend.update(|s| s.post_status = 201);
        lp.tick().await;
        assert_eq!(lp.pending(), 0);
        let last = backend.posts().pop().unwrap();
        assert_eq!(last.as_array().unwrap().len(), 5);
        assert_eq!(board.read().await.uploaded, 5);
    }
}
