//! Typed capture failures and the bounded diagnostic error history.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;

/// Oldest entries are evicted once the history holds this many records.
pub const MAX_ERROR_HISTORY: usize = 100;

/// Failure taxonomy for a capture attempt.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("hardware unavailable: {0}")]
    Hardware(String),

    #[error("speech detector failure: {0}")]
    DetectorModel(String),

    #[error("recording failed: {0}")]
    Recording(String),

    #[error("recording too short: {got_s:.2}s committed, {min_s:.2}s required")]
    RecordingTooShort { got_s: f64, min_s: f64 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unexpected capture failure: {0}")]
    Unknown(String),
}

impl CaptureError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CaptureError::Hardware(_) => ErrorCategory::Hardware,
            CaptureError::DetectorModel(_) => ErrorCategory::DetectorModel,
            CaptureError::Recording(_) | CaptureError::RecordingTooShort { .. } => {
                ErrorCategory::Recording
            }
            CaptureError::Config(_) => ErrorCategory::Config,
            CaptureError::Unknown(_) => ErrorCategory::Unknown,
        }
    }
}

/// Coarse error class stored with each history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Hardware,
    DetectorModel,
    Recording,
    Config,
    Unknown,
}

impl ErrorCategory {
    pub fn label(self) -> &'static str {
        match self {
            ErrorCategory::Hardware => "hardware_error",
            ErrorCategory::DetectorModel => "detector_model_error",
            ErrorCategory::Recording => "recording_error",
            ErrorCategory::Config => "config_error",
            ErrorCategory::Unknown => "unknown_error",
        }
    }
}

/// One diagnostic entry kept for later inspection.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Local>,
    pub category: ErrorCategory,
    pub message: String,
}

/// Bounded FIFO of recent errors, owned by the orchestrator.
#[derive(Debug, Default)]
pub struct ErrorHistory {
    entries: VecDeque<ErrorRecord>,
}

impl ErrorHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, category: ErrorCategory, message: impl Into<String>) {
        let record = ErrorRecord {
            timestamp: Local::now(),
            category,
            message: message.into(),
        };
        self.entries.push_back(record);
        while self.entries.len() > MAX_ERROR_HISTORY {
            self.entries.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.entries.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&ErrorRecord> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
