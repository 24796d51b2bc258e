//! Status display collaborator.
//!
//! The device renders short text lines at fixed pixel rows on a 128x64
//! panel.  Rendering is fire-and-forget: a missing or failing display never
//! affects the run.

use async_trait::async_trait;
use soil_sensors::Snapshot;

use crate::state::SharedState;

#[async_trait]
pub trait Display: Send {
    fn clear(&mut self);
    fn write_line(&mut self, text: &str, row: u8);
    async fn present(&mut self);
}

// ---------------------------------------------------------------------------
// Screens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    Boot,
    Disabled,
    /// `count` is the number of the reading being taken (1-based).
    Sample {
        count: u32,
        target: u32,
        snapshot: Snapshot,
    },
    Complete {
        target: u32,
    },
    NetworkError,
}

fn or_dashes<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "--".into())
}

impl Screen {
    /// `(row, text)` pairs in draw order.
    pub fn lines(&self) -> Vec<(u8, String)> {
        match self {
            Self::Boot => vec![(0, "System Starting...".into())],
            Self::Disabled => vec![(0, "Collection Off".into())],
            Self::Sample {
                count,
                target,
                snapshot: s,
            } => vec![
                (0, format!("Read {count}/{target}")),
                (16, format!("T: {}C", or_dashes(s.temperature))),
                (30, format!("H: {}%", or_dashes(s.humidity))),
                (44, format!("M: {}%", or_dashes(s.moisture))),
                (
                    56,
                    format!(
                        "N:{} P:{} K:{}",
                        or_dashes(s.nitrogen),
                        or_dashes(s.phosphorus),
                        or_dashes(s.potassium)
                    ),
                ),
            ],
            Self::Complete { target } => vec![
                (0, "Upload Complete".into()),
                (20, format!("{target} sent")),
            ],
            Self::NetworkError => vec![(0, "WiFi Error".into())],
        }
    }
}

/// Clear the display, draw `screen` and present it.
pub async fn show<D: Display + ?Sized>(display: &mut D, screen: &Screen) {
    display.clear();
    for (row, text) in screen.lines() {
        display.write_line(&text, row);
    }
    display.present().await;
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

/// Renders into the status board so the panel is visible over the status
/// API.
pub struct StatusPanel {
    state: SharedState,
    frame: Vec<(u8, String)>,
}

impl StatusPanel {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            frame: Vec::new(),
        }
    }
}

#[async_trait]
impl Display for StatusPanel {
    fn clear(&mut self) {
        self.frame.clear();
    }

    fn write_line(&mut self, text: &str, row: u8) {
        // A later write to the same row replaces the earlier one.
        self.frame.retain(|(r, _)| *r != row);
        self.frame.push((row, text.to_string()));
    }

    async fn present(&mut self) {
        self.frame.sort_by_key(|(row, _)| *row);
        let lines: Vec<String> = self.frame.iter().map(|(_, t)| t.clone()).collect();
        tracing::debug!(panel = ?lines, "display presented");
        self.state.write().await.set_panel(lines);
    }
}

/// No display attached.
pub struct NoDisplay;

#[async_trait]
impl Display for NoDisplay {
    fn clear(&mut self) {}
    fn write_line(&mut self, _text: &str, _row: u8) {}
    async fn present(&mut self) {}
}
