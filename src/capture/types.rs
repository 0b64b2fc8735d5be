// Core types for artifact capture

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::browser::DriverError;

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// A fault in the capture path. Never replaces a test verdict.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("context is already closed")]
    ContextClosed,

    #[error("browser error during capture: {0}")]
    Driver(DriverError),

    #[error("failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DriverError> for CaptureError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Closed => CaptureError::ContextClosed,
            other => CaptureError::Driver(other),
        }
    }
}

/// Artifacts gathered for one test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOutcome {
    /// False when any capture attempted for the test failed
    pub succeeded: bool,
    /// Screenshots in capture order; the final-state screenshot comes first
    pub screenshot_paths: Vec<PathBuf>,
    pub html_snapshot_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    /// Capture faults, as logged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<String>,
}

impl CaptureOutcome {
    pub fn new() -> Self {
        Self {
            succeeded: true,
            ..Self::default()
        }
    }

    /// Record a fault and mark the outcome as incomplete
    pub fn fault(&mut self, what: &str, err: &dyn std::fmt::Display) {
        self.succeeded = false;
        self.faults.push(format!("{what}: {err}"));
    }
}
