//! Session View Model
//!
//! Typed view state mirroring transport/poll state for presentation.
//! Fields are bound once by the consumer (CLI today, GUI tomorrow) and
//! re-rendered on change via the session's watch channel - there are no
//! dynamic lookups by identifier.

use serde::{Deserialize, Serialize};

use crate::summary::DetectionSummary;
use crate::types::JobId;

/// Cap on retained activity-log entries
pub const MAX_LOG_ENTRIES: usize = 200;

// =============================================================================
// Activity Log
// =============================================================================

/// Severity of a user-visible log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One user-visible activity log entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

// =============================================================================
// Action Enablement
// =============================================================================

/// Which user actions are currently enabled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSet {
    pub start: bool,
    pub cancel: bool,
    pub download: bool,
    pub view_details: bool,
}

impl Default for ActionSet {
    fn default() -> Self {
        Self {
            start: true,
            cancel: false,
            download: false,
            view_details: false,
        }
    }
}

impl ActionSet {
    /// Enablement while a job is in flight
    pub fn processing() -> Self {
        Self {
            start: false,
            cancel: true,
            download: false,
            view_details: false,
        }
    }

    /// Enablement after a successful completion
    pub fn completed() -> Self {
        Self {
            start: true,
            cancel: false,
            download: true,
            view_details: true,
        }
    }
}

// =============================================================================
// Session Phase
// =============================================================================

/// Lifecycle phase of the client session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Submitted,
    Polling,
    Completed,
    Failed,
}

impl SessionPhase {
    /// Terminal phases are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Failed)
    }
}

// =============================================================================
// View State
// =============================================================================

/// Snapshot of everything the presentation layer renders
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub phase: SessionPhase,
    /// Server-assigned id of the current job, if any
    pub job_id: Option<JobId>,
    /// Displayed completion percentage, rounded and clamped to 0-100
    pub progress_percent: u8,
    /// Raw server status string for the status label
    pub status_text: String,
    /// Number of frame results received so far
    pub frames_processed: u64,
    /// Aggregate bucket counts
    pub summary: DetectionSummary,
    /// Action button enablement
    pub actions: ActionSet,
    /// Server-side filename of the annotated output, once known
    pub output_file: Option<String>,
    /// Bounded user-visible activity log
    pub log: Vec<LogEntry>,
}

impl ViewState {
    /// Appends a timestamped entry to the activity log, dropping the oldest
    /// entries past the cap.
    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.log.push(LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            message: message.into(),
        });
        if self.log.len() > MAX_LOG_ENTRIES {
            let excess = self.log.len() - MAX_LOG_ENTRIES;
            self.log.drain(..excess);
        }
    }

    /// Mirrors a server-reported progress value into the display percentage
    pub fn set_progress(&mut self, progress: Option<f64>) {
        self.progress_percent = display_percent(progress);
    }
}

/// Converts a server progress value to a display percentage:
/// `round(value ?? 0)`, clamped to [0, 100]. Non-finite values display as 0.
pub fn display_percent(progress: Option<f64>) -> u8 {
    let value = progress.unwrap_or(0.0);
    if !value.is_finite() {
        return 0;
    }
    value.clamp(0.0, 100.0).round() as u8
}

// =============================================================================
// Tests
// =============================================================================
