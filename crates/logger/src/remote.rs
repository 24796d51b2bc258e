//! Typed client over the remote control/status table.
//!
//! The table's newest row is the control row for the current run: its
//! `trigger_value` arms collection and its `success` flag reports that the
//! reading quota was met.  Every operation returns a [`RemoteError`] on
//! failure and leaves the fallback to the caller.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::RemoteError;
use crate::transport::{Request, Transport};

/// Primary key of a control row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub i64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of one trigger poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerState {
    pub enabled: bool,
    pub row_id: Option<RowId>,
}

impl TriggerState {
    /// The fail-safe reading: collection off, no row observed.
    pub const DISABLED: Self = Self {
        enabled: false,
        row_id: None,
    };
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Option<RowId>,
}

#[derive(Debug, Deserialize)]
struct TriggerRow {
    id: Option<RowId>,
    trigger_value: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FilenameRow {
    filename: Option<String>,
}

pub struct RemoteFlagStore {
    transport: Arc<dyn Transport>,
    control_url: String,
    filename_url: String,
}

impl RemoteFlagStore {
    pub fn new(
        transport: Arc<dyn Transport>,
        control_url: impl Into<String>,
        filename_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            control_url: control_url.into(),
            filename_url: filename_url.into(),
        }
    }

    /// Find the newest control row and clear its success flag.
    ///
    /// Returns `Ok(None)` when the table is empty.  A failed flag reset is
    /// logged but does not hide the row id.
    pub async fn initialize_success_flag(&self) -> Result<Option<RowId>, RemoteError> {
        let rows: Vec<IdRow> = self
            .get_json(format!(
                "{}?select=id&order=id.desc&limit=1",
                self.control_url
            ))
            .await?;
        let Some(id) = rows.first().and_then(|r| r.id) else {
            return Ok(None);
        };

        if let Err(e) = self.set_success(Some(id), false).await {
            tracing::warn!(row_id = %id, "failed to clear success flag: {e}");
        }
        Ok(Some(id))
    }

    /// Read the newest row's trigger.  An empty table or a null trigger
    /// reads as disabled.
    pub async fn poll_trigger(&self) -> Result<TriggerState, RemoteError> {
        let rows: Vec<TriggerRow> = self
            .get_json(format!(
                "{}?select=id,trigger_value&order=id.desc&limit=1",
                self.control_url
            ))
            .await?;
        Ok(rows
            .first()
            .map(|r| TriggerState {
                enabled: r.trigger_value.unwrap_or(false),
                row_id: r.id,
            })
            .unwrap_or(TriggerState::DISABLED))
    }

    pub async fn set_success(&self, row_id: Option<RowId>, value: bool) -> Result<(), RemoteError> {
        self.patch(row_id, json!({ "success": value })).await?;
        tracing::info!(row_id = ?row_id, value, "success flag set");
        Ok(())
    }

    /// Disarm the trigger so the next run has to be re-armed explicitly.
    pub async fn reset_trigger(&self, row_id: Option<RowId>) -> Result<(), RemoteError> {
        self.patch(row_id, json!({ "trigger_value": false })).await?;
        tracing::info!(row_id = ?row_id, "trigger flag reset to false");
        Ok(())
    }

    /// Fetch the filename readings should be tagged with.  An empty list or
    /// an empty name is a protocol failure.
    pub async fn fetch_filename(&self) -> Result<String, RemoteError> {
        let rows: Vec<FilenameRow> = self.get_json(self.filename_url.clone()).await?;
        rows.into_iter()
            .next()
            .and_then(|r| r.filename)
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| RemoteError::Protocol("no filename in response".into()))
    }

    async fn patch(&self, row_id: Option<RowId>, body: serde_json::Value) -> Result<(), RemoteError> {
        let id = row_id.ok_or(RemoteError::MissingRowId)?;
        self.transport
            .send(Request::patch(
                format!("{}?id=eq.{id}", self.control_url),
                body,
            ))
            .await?
            .success()?;
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, RemoteError> {
        self.transport.send(Request::get(url)).await?.success()?.json()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
