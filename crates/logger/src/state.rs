use serde::Serialize;
use soil_sensors::Snapshot;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::control::Phase;
use crate::remote::RowId;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<StatusBoard>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Read-only mirror of the control loop for the status API.  The loop owns
/// the authoritative run state and only pushes copies in here.
pub struct StatusBoard {
    pub started_at: Instant,
    pub phase: Phase,
    pub reading_count: u32,
    pub target: u32,
    pub control_row_id: Option<RowId>,
    pub pending: usize,
    pub uploaded: usize,
    pub last_sample: Option<Snapshot>,
    pub panel: Vec<String>,
    pub events: VecDeque<StatusEvent>,
}

#[derive(Clone, Serialize)]
pub struct StatusEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Sample,
    Upload,
    Remote,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub phase: Phase,
    pub reading_count: u32,
    pub target: u32,
    pub control_row_id: Option<RowId>,
    pub pending: usize,
    pub uploaded: usize,
    pub last_sample: Option<Snapshot>,
    pub panel: Vec<String>,
    pub events: Vec<StatusEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl StatusBoard {
    pub fn new(target: u32) -> Self {
        Self {
            started_at: Instant::now(),
            phase: Phase::Connecting,
            reading_count: 0,
            target,
            control_row_id: None,
            pending: 0,
            uploaded: 0,
            last_sample: None,
            panel: Vec::new(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared(target: u32) -> SharedState {
        Arc::new(RwLock::new(Self::new(target)))
    }

    /// Record a phase change.  Re-entering the current phase is not an event.
    pub fn set_phase(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }
        let detail = format!("{} -> {}", self.phase, phase);
        self.phase = phase;
        self.push_event(EventKind::System, detail);
    }

    /// Record one sample appended to the batch.
    pub fn record_sample(&mut self, reading_count: u32, snapshot: Snapshot, pending: usize) {
        self.reading_count = reading_count;
        self.pending = pending;
        self.last_sample = Some(snapshot);
        self.push_event(
            EventKind::Sample,
            format!(
                "reading {reading_count}/{}: {} of 6 channels",
                self.target,
                snapshot.channels_present()
            ),
        );
    }

    /// Record a successful batch upload.
    pub fn record_upload(&mut self, sent: usize, pending: usize) {
        self.uploaded += sent;
        self.pending = pending;
        self.push_event(EventKind::Upload, format!("{sent} reading(s) uploaded"));
    }

    pub fn set_control_row(&mut self, row_id: Option<RowId>) {
        self.control_row_id = row_id;
    }

    /// Record a control-table interaction.
    pub fn record_remote(&mut self, detail: String) {
        self.push_event(EventKind::Remote, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    pub fn set_panel(&mut self, lines: Vec<String>) {
        self.panel = lines;
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            phase: self.phase,
            reading_count: self.reading_count,
            target: self.target,
            control_row_id: self.control_row_id,
            pending: self.pending,
            uploaded: self.uploaded,
            last_sample: self.last_sample,
            panel: self.panel.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(StatusEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}
