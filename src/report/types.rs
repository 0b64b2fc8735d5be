// Core types for the reporting boundary

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::harness::Verdict;
use crate::identity::TestIdentity;

/// Result type for reporting operations
pub type ReportResult<T> = Result<T, ReportError>;

/// A fault while talking to a report sink. Logged, never fatal to a test.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unknown test handle {0}")]
    UnknownTest(String),

    #[error("report sink rejected the call: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque reference to a test result inside a sink
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestHandle(pub String);

impl TestHandle {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TestHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// A completed step of a test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub passed: bool,
    /// Failure message when the step failed
    pub message: Option<String>,
    /// Epoch milliseconds
    pub start: i64,
    pub stop: i64,
}

/// Consumer of test results and attachments (Allure, in-memory, ...)
pub trait ReportSink: Send + Sync {
    /// Open a result for a test
    fn create_test(&self, test: &TestIdentity) -> ReportResult<TestHandle>;

    fn attach(&self, handle: &TestHandle, name: &str, mime: &str, bytes: &[u8]) -> ReportResult<()>;

    fn log(&self, handle: &TestHandle, level: LogLevel, message: &str) -> ReportResult<()>;

    fn step(&self, handle: &TestHandle, step: &StepRecord) -> ReportResult<()>;

    /// Seal the result with its verdict. The handle is invalid afterwards.
    fn finish(&self, handle: &TestHandle, verdict: &Verdict) -> ReportResult<()>;
}

/// File extension for an attachment MIME type
pub fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/gif" => "gif",
        "video/webm" => "webm",
        "video/mp4" => "mp4",
        "text/html" => "html",
        "application/json" => "json",
        "text/plain" => "txt",
        _ => "bin",
    }
}

/// MIME type for an artifact, from its file extension
pub fn mime_for_path(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webm") => "video/webm",
        Some("mp4") => "video/mp4",
        Some("html") => "text/html",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
